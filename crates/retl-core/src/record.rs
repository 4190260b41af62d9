//! Nested record model and deep key-path access.
//!
//! Records are schema-generic JSON maps. Transformers enforce shape locally
//! through [`ValueKind`] checks instead of static schemas.

use std::collections::HashMap;

use serde_json::Map;
pub use serde_json::Value;

use crate::error::EtlError;

/// The unit of flow between pipeline stages.
pub type Record = Map<String, Value>;

/// An ordered list of keys addressing a nested location in a [`Record`].
pub type KeyPath = Vec<String>;

/// Build a [`KeyPath`] from string literals.
pub fn path(parts: &[&str]) -> KeyPath {
    parts.iter().map(|p| (*p).to_owned()).collect()
}

/// Render a key path the way it appears in error messages.
pub fn path_display(keys: &[String]) -> String {
    keys.join(".")
}

/// Resolve `keys` inside `record`, or `None` when any segment is absent.
pub fn deep_get<'a>(record: &'a Record, keys: &[String]) -> Option<&'a Value> {
    let (first, rest) = keys.split_first()?;
    let mut current = record.get(first)?;
    for key in rest {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

/// Set `value` at `keys`, creating intermediate maps as needed. An
/// intervening non-map value is replaced by a map.
pub fn deep_set(record: &mut Record, keys: &[String], value: Value) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    let mut current = record;
    for key in parents {
        let slot = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
    }
    current.insert(last.clone(), value);
}

/// Remove the leaf addressed by `keys`. No-op when absent.
pub fn deep_remove(record: &mut Record, keys: &[String]) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    let mut current = record;
    for key in parents {
        match current.get_mut(key).and_then(Value::as_object_mut) {
            Some(map) => current = map,
            None => return,
        }
    }
    current.remove(last);
}

/// Runtime type expectation for transformer inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    /// Matches any value.
    Any,
}

impl ValueKind {
    pub fn of(value: &Value) -> ValueKind {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn matches(self, value: &Value) -> bool {
        self == ValueKind::Any || ValueKind::of(value) == self
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Any => "any",
        }
    }
}

/// Fail with [`EtlError::TypeMismatch`] unless `value` matches `expected`.
pub fn expect_kind(keys: &[String], expected: ValueKind, value: &Value) -> Result<(), EtlError> {
    if expected.matches(value) {
        Ok(())
    } else {
        Err(EtlError::TypeMismatch {
            path: path_display(keys),
            expected: expected.name(),
            actual: ValueKind::of(value).name(),
        })
    }
}

/// Canonical string form of a scalar value, used as bag keys and members.
pub fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reserved context key under which the chain input record is stashed.
pub const INPUT_ITEM_KEY: &str = "__input_item__";

/// Per-input scratch space scoped to one top-level record.
///
/// Transformers may stash data under reserved keys for downstream reads;
/// the map is never shared across concurrently processed inputs.
#[derive(Debug, Default)]
pub struct Context {
    entries: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Stash the top-level input record under [`INPUT_ITEM_KEY`].
    pub fn set_input_item(&mut self, item: &Record) {
        self.put(INPUT_ITEM_KEY, Value::Object(item.clone()));
    }

    pub fn input_item(&self) -> Option<&Value> {
        self.get(INPUT_ITEM_KEY)
    }

    pub fn clear_input_item(&mut self) {
        self.entries.remove(INPUT_ITEM_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        let Value::Object(map) = json!({
            "file": {"path": "/tmp/a.txt", "meta": {"size": 12}},
            "word": "alpha"
        }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn deep_get_resolves_nested_paths() {
        let rec = sample();
        assert_eq!(
            deep_get(&rec, &path(&["file", "meta", "size"])),
            Some(&json!(12))
        );
        assert_eq!(deep_get(&rec, &path(&["word"])), Some(&json!("alpha")));
        assert_eq!(deep_get(&rec, &path(&["file", "missing"])), None);
        assert_eq!(deep_get(&rec, &[]), None);
    }

    #[test]
    fn deep_get_stops_at_non_maps() {
        let rec = sample();
        assert_eq!(deep_get(&rec, &path(&["word", "deeper"])), None);
    }

    #[test]
    fn deep_set_creates_intermediate_maps() {
        let mut rec = Record::new();
        deep_set(&mut rec, &path(&["a", "b", "c"]), json!(1));
        assert_eq!(deep_get(&rec, &path(&["a", "b", "c"])), Some(&json!(1)));
    }

    #[test]
    fn deep_set_replaces_non_map_intermediates() {
        let mut rec = sample();
        deep_set(&mut rec, &path(&["word", "inner"]), json!(true));
        assert_eq!(
            deep_get(&rec, &path(&["word", "inner"])),
            Some(&json!(true))
        );
    }

    #[test]
    fn deep_remove_strips_leaves_only() {
        let mut rec = sample();
        deep_remove(&mut rec, &path(&["file", "meta", "size"]));
        assert_eq!(deep_get(&rec, &path(&["file", "meta", "size"])), None);
        assert!(deep_get(&rec, &path(&["file", "meta"])).is_some());
        // absent path is a no-op
        deep_remove(&mut rec, &path(&["nope", "nested"]));
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn kind_checks() {
        assert!(ValueKind::String.matches(&json!("x")));
        assert!(ValueKind::Any.matches(&json!({})));
        assert!(!ValueKind::Number.matches(&json!("x")));
        let err = expect_kind(&path(&["a"]), ValueKind::Number, &json!("x")).unwrap_err();
        assert!(err.to_string().contains("expected type number"));
    }

    #[test]
    fn context_stashes_input_item() {
        let mut ctx = Context::new();
        let rec = sample();
        ctx.set_input_item(&rec);
        assert_eq!(ctx.input_item(), Some(&Value::Object(rec)));
        ctx.clear_input_item();
        assert!(ctx.input_item().is_none());
    }
}
