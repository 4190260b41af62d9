//! # RETL Transformations - Record Processing Operators
//!
//! This crate provides the transformer algebra of the RETL pipeline: the
//! one-to-many record mappers applied between the extractor and the loaders.
//!
//! ## Available Transformations
//!
//! ### Basic
//! - **Passthrough**: no-op transformation for testing and simple data flow
//! - **AttributeMapper**: set, derive and rewrite record fields by key path
//!
//! ### File readers
//! - **FileToLines**: one record per non-empty line of a text file
//! - **FileToText**: one record carrying the whole file content
//!
//! ### Tokenisation
//! - **WordTokenizer**: pattern split, character cleanup, mapper chain and
//!   word filtering
//! - **Arabic tokenizer**: Arabic letter-run extraction with diacritic
//!   stripping (see [`arabic`])
//!
//! ### Aggregating wrappers
//! - **Reduce**: fold the output of an inner chain into one record
//! - **UniqueFilter**: per-key de-duplication over an inner chain, backed by
//!   the shared concurrent bag
//!
//! ## Example Usage
//!
//! ```no_run
//! use retl_core::{path, Context, Transformer};
//! use retl_tx::FileToLines;
//!
//! let lines = FileToLines::new(".txt", Some(path(&["file_path"])), Some("_"));
//! # let mut ctx = Context::new();
//! # let record = retl_core::Record::new();
//! # let _ = lines.transform(record, &mut ctx);
//! ```

use std::sync::Arc;

use anyhow::Result;
use retl_core::error::EtlError;
use retl_core::record::{
    deep_get, deep_remove, expect_kind, path_display, Context, KeyPath, Record, Value, ValueKind,
};

pub mod aggregate;
pub mod arabic;
pub mod basic;
pub mod files;
pub mod mappers;
pub mod text;

pub use aggregate::{Reduce, Reducer, UniqueFilter};
pub use basic::{AttributeMapper, Passthrough};
pub use files::{FileToLines, FileToText};
pub use text::{WordPredicate, WordTokenizer};

/// A single step of a value mapping chain. Returning `None` drops the value
/// (the operation, token or record carrying it is skipped).
pub type ValueMapper = Arc<dyn Fn(Value) -> Option<Value> + Send + Sync>;

/// Run `value` through a mapper chain, stopping at the first `None`.
pub fn apply_value_mappers(value: Value, mappers: &[ValueMapper]) -> Option<Value> {
    let mut current = value;
    for mapper in mappers {
        current = mapper(current)?;
    }
    Some(current)
}

/// Shared configuration of the record-shaping transformers.
///
/// Governs where the primary input value is read, the expected runtime type,
/// which source fields are copied onto every output record, where the
/// produced value lands, and which paths are stripped before emission.
#[derive(Clone)]
pub struct MapConfig {
    /// Where to read the primary input value; `None` means the whole record.
    pub input_key_path: Option<KeyPath>,
    pub input_kind: ValueKind,
    /// Key at which the produced value is placed on each output record.
    pub output_key: Option<String>,
    /// `(dst_key, src_path)` pairs copied from the input record to each
    /// output record before `output_key` is written.
    pub copy_values_key_paths: Vec<(String, KeyPath)>,
    /// Paths stripped from each output record before emission.
    pub remove_key_paths: Vec<KeyPath>,
}

impl MapConfig {
    pub fn new(
        input_key_path: Option<KeyPath>,
        input_kind: ValueKind,
        output_key: Option<&str>,
    ) -> Self {
        Self {
            input_key_path,
            input_kind,
            output_key: output_key.map(str::to_owned),
            copy_values_key_paths: Vec::new(),
            remove_key_paths: Vec::new(),
        }
    }

    /// Resolve the configured input value, enforcing presence and type.
    pub fn resolve_input(&self, item: &Record) -> Result<Value, EtlError> {
        match &self.input_key_path {
            None => Ok(Value::Object(item.clone())),
            Some(keys) => {
                let value = deep_get(item, keys)
                    .ok_or_else(|| EtlError::MissingKey(path_display(keys)))?;
                expect_kind(keys, self.input_kind, value)?;
                Ok(value.clone())
            }
        }
    }

    /// Assemble one output record around `produced`: copied source fields,
    /// then the produced value at `output_key`, then the removals.
    pub fn build_output(&self, source: &Record, produced: Value) -> Record {
        let mut out = Record::new();
        for (dst, src) in &self.copy_values_key_paths {
            if let Some(value) = deep_get(source, src) {
                out.insert(dst.clone(), value.clone());
            }
        }
        if let Some(key) = &self.output_key {
            out.insert(key.clone(), produced);
        }
        for keys in &self.remove_key_paths {
            deep_remove(&mut out, keys);
        }
        out
    }

    /// Fill unset paths with wrapper-imposed defaults (see
    /// [`retl_core::Transformer::set_default_paths`]).
    pub fn apply_defaults(&mut self, input_key_path: &[String], output_key: &str) {
        if self.input_key_path.is_none() {
            self.input_key_path = Some(input_key_path.to_vec());
        }
        if self.output_key.is_none() {
            self.output_key = Some(output_key.to_owned());
        }
    }
}

/// Run the standard per-item mapping protocol: resolve the input value,
/// stash the input record in the context, collect the produced values, and
/// wrap each into an output record.
pub(crate) fn map_records<F>(
    cfg: &MapConfig,
    item: &Record,
    ctx: &mut Context,
    map: F,
) -> Result<Vec<Record>>
where
    F: FnOnce(&Value, &mut Context, &mut dyn FnMut(Value)) -> Result<()>,
{
    let input = cfg.resolve_input(item)?;
    ctx.set_input_item(item);
    let mut produced = Vec::new();
    let res = map(&input, ctx, &mut |value| produced.push(value));
    ctx.clear_input_item();
    res?;
    Ok(produced
        .into_iter()
        .map(|value| cfg.build_output(item, value))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use retl_core::path;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn resolve_input_enforces_presence_and_type() {
        let cfg = MapConfig::new(Some(path(&["a", "b"])), ValueKind::String, Some("out"));
        let item = rec(json!({"a": {"b": "x"}}));
        assert_eq!(cfg.resolve_input(&item).unwrap(), json!("x"));

        let missing = rec(json!({"a": {}}));
        assert!(matches!(
            cfg.resolve_input(&missing),
            Err(EtlError::MissingKey(_))
        ));

        let wrong = rec(json!({"a": {"b": 3}}));
        assert!(matches!(
            cfg.resolve_input(&wrong),
            Err(EtlError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn resolve_input_defaults_to_whole_record() {
        let cfg = MapConfig::new(None, ValueKind::Any, None);
        let item = rec(json!({"k": 1}));
        assert_eq!(cfg.resolve_input(&item).unwrap(), json!({"k": 1}));
    }

    #[test]
    fn build_output_copies_then_writes_then_removes() {
        let mut cfg = MapConfig::new(None, ValueKind::Any, Some("word"));
        cfg.copy_values_key_paths = vec![
            ("file".into(), path(&["meta", "file"])),
            ("gone".into(), path(&["meta", "tmp"])),
        ];
        cfg.remove_key_paths = vec![path(&["gone"])];
        let item = rec(json!({"meta": {"file": "a.txt", "tmp": 1}}));
        let out = cfg.build_output(&item, json!("alpha"));
        assert_eq!(Value::Object(out), json!({"file": "a.txt", "word": "alpha"}));
    }

    #[test]
    fn defaults_only_fill_unset_paths() {
        let mut cfg = MapConfig::new(None, ValueKind::Any, Some("kept"));
        cfg.apply_defaults(&path(&["_"]), "_");
        assert_eq!(cfg.input_key_path, Some(path(&["_"])));
        assert_eq!(cfg.output_key.as_deref(), Some("kept"));
    }

    #[test]
    fn mapper_chain_short_circuits_on_none() {
        let double: ValueMapper = Arc::new(|v| v.as_i64().map(|n| json!(n * 2)));
        let reject_big: ValueMapper =
            Arc::new(|v| if v.as_i64()? > 10 { None } else { Some(v) });
        assert_eq!(
            apply_value_mappers(json!(3), &[double.clone(), reject_big.clone()]),
            Some(json!(6))
        );
        assert_eq!(apply_value_mappers(json!(9), &[double, reject_big]), None);
    }
}
