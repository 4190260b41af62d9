//! Passthrough and key-path attribute operations.

use anyhow::Result;
use retl_core::record::{deep_get, deep_remove, deep_set, Context, KeyPath, Record, Value};
use retl_core::{Operator, Transformer};
use tracing::debug;

use crate::{apply_value_mappers, ValueMapper};

/// No-op transformation that forwards its input unchanged, with optional
/// debug logging of every record.
pub struct Passthrough {
    log: bool,
    log_prefix: String,
}

impl Passthrough {
    pub fn new() -> Self {
        Self {
            log: false,
            log_prefix: String::new(),
        }
    }

    pub fn with_logging(prefix: &str) -> Self {
        Self {
            log: true,
            log_prefix: prefix.to_owned(),
        }
    }
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }
}

impl Transformer for Passthrough {
    fn transform(&self, item: Record, _ctx: &mut Context) -> Result<Vec<Record>> {
        if self.log {
            debug!(prefix = %self.log_prefix, item = %retl_core::record::Value::Object(item.clone()), "passthrough");
        }
        Ok(vec![item])
    }
}

/// Set, derive and rewrite record attributes addressed by key paths.
///
/// Three operation lists apply in order: `static_values` write literals,
/// `derived_values` read a source path through a mapper chain into a
/// destination path, and `trans_values` rewrite a path in place. A missing
/// source or a mapper returning `None` skips that operation without failing.
/// Sources are always read from the input record, so operations do not
/// observe each other's writes.
pub struct AttributeMapper {
    static_values: Vec<(KeyPath, Value)>,
    derived_values: Vec<(KeyPath, KeyPath, Vec<ValueMapper>)>,
    trans_values: Vec<(KeyPath, Vec<ValueMapper>)>,
    remove_key_paths: Vec<KeyPath>,
}

impl AttributeMapper {
    pub fn new() -> Self {
        Self {
            static_values: Vec::new(),
            derived_values: Vec::new(),
            trans_values: Vec::new(),
            remove_key_paths: Vec::new(),
        }
    }

    /// Write `value` at `keys` on every record.
    pub fn set_static(mut self, keys: KeyPath, value: Value) -> Self {
        self.static_values.push((keys, value));
        self
    }

    /// Read `src`, run it through `mappers`, write the result at `dst`.
    pub fn derive(mut self, src: KeyPath, dst: KeyPath, mappers: Vec<ValueMapper>) -> Self {
        self.derived_values.push((src, dst, mappers));
        self
    }

    /// In-place variant of [`AttributeMapper::derive`] with `src == dst`.
    pub fn rewrite(mut self, keys: KeyPath, mappers: Vec<ValueMapper>) -> Self {
        self.trans_values.push((keys, mappers));
        self
    }

    pub fn remove_keys(mut self, keys: Vec<KeyPath>) -> Self {
        self.remove_key_paths = keys;
        self
    }
}

impl Default for AttributeMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for AttributeMapper {
    fn name(&self) -> &str {
        "attribute-mapper"
    }
}

impl Transformer for AttributeMapper {
    fn transform(&self, item: Record, _ctx: &mut Context) -> Result<Vec<Record>> {
        let mut out = item.clone();
        for (keys, value) in &self.static_values {
            deep_set(&mut out, keys, value.clone());
        }
        for (src, dst, mappers) in &self.derived_values {
            let Some(value) = deep_get(&item, src) else {
                continue;
            };
            let Some(mapped) = apply_value_mappers(value.clone(), mappers) else {
                continue;
            };
            deep_set(&mut out, dst, mapped);
        }
        for (keys, mappers) in &self.trans_values {
            let Some(value) = deep_get(&item, keys) else {
                continue;
            };
            let Some(mapped) = apply_value_mappers(value.clone(), mappers) else {
                continue;
            };
            deep_set(&mut out, keys, mapped);
        }
        for keys in &self.remove_key_paths {
            deep_remove(&mut out, keys);
        }
        Ok(vec![out])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retl_core::path;
    use serde_json::json;
    use std::sync::Arc;

    fn rec(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn upper() -> ValueMapper {
        Arc::new(|v| Some(json!(v.as_str()?.to_uppercase())))
    }

    #[test]
    fn passthrough_forwards_unchanged() {
        let t = Passthrough::new();
        let item = rec(json!({"a": 1}));
        let out = t.transform(item.clone(), &mut Context::new()).unwrap();
        assert_eq!(out, vec![item]);
    }

    #[test]
    fn operations_apply_in_declared_order() {
        let t = AttributeMapper::new()
            .set_static(path(&["tagged"]), json!(true))
            .derive(path(&["name"]), path(&["shout"]), vec![upper()])
            .rewrite(path(&["name"]), vec![upper()])
            .remove_keys(vec![path(&["tmp"])]);
        let item = rec(json!({"name": "ali", "tmp": 1}));
        let out = t.transform(item, &mut Context::new()).unwrap();
        assert_eq!(
            Value::Object(out.into_iter().next().unwrap()),
            json!({"name": "ALI", "shout": "ALI", "tagged": true})
        );
    }

    #[test]
    fn missing_source_skips_the_operation() {
        let t = AttributeMapper::new().derive(path(&["absent"]), path(&["out"]), vec![upper()]);
        let item = rec(json!({"name": "x"}));
        let out = t.transform(item.clone(), &mut Context::new()).unwrap();
        assert_eq!(out, vec![item]);
    }

    #[test]
    fn mapper_returning_none_skips_the_operation() {
        let drop_all: ValueMapper = Arc::new(|_| None);
        let t = AttributeMapper::new().rewrite(path(&["name"]), vec![drop_all]);
        let item = rec(json!({"name": "x"}));
        let out = t.transform(item.clone(), &mut Context::new()).unwrap();
        assert_eq!(out, vec![item]);
    }
}
