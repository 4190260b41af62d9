//! File-reading transformers: path records in, content records out.

use std::path::Path;

use anyhow::Result;
use retl_core::record::{Context, KeyPath, Record, Value, ValueKind};
use retl_core::{Operator, Transformer};
use serde_json::Map;
use tracing::{debug, error};

use crate::{map_records, MapConfig};

fn read_file(file_path: &str, suffix: &str, what: &str) -> Result<Option<String>> {
    if !Path::new(file_path).is_file() {
        anyhow::bail!("file not found: {file_path}");
    }
    if !file_path.ends_with(suffix) {
        debug!(file = file_path, suffix, "file skipped, suffix mismatch");
        return Ok(None);
    }
    match std::fs::read_to_string(file_path) {
        Ok(content) => Ok(Some(content)),
        Err(e) => {
            // Per-record I/O failure: skip the record, keep the pipeline up.
            error!(file = file_path, error = %e, "{what} read error");
            Ok(None)
        }
    }
}

/// Reads the text file addressed by `input_key_path` and yields one record
/// per non-empty trimmed line, as `{line}` under the output key.
pub struct FileToLines {
    suffix: String,
    cfg: MapConfig,
}

impl FileToLines {
    pub fn new(suffix: &str, input_key_path: Option<KeyPath>, output_key: Option<&str>) -> Self {
        Self {
            suffix: suffix.to_owned(),
            cfg: MapConfig::new(input_key_path, ValueKind::String, output_key),
        }
    }

    pub fn copy_values(mut self, copies: Vec<(String, KeyPath)>) -> Self {
        self.cfg.copy_values_key_paths = copies;
        self
    }

    pub fn remove_keys(mut self, keys: Vec<KeyPath>) -> Self {
        self.cfg.remove_key_paths = keys;
        self
    }
}

impl Operator for FileToLines {
    fn name(&self) -> &str {
        "file-to-lines"
    }
}

impl Transformer for FileToLines {
    fn transform(&self, item: Record, ctx: &mut Context) -> Result<Vec<Record>> {
        map_records(&self.cfg, &item, ctx, |input, _ctx, emit| {
            let file_path = input.as_str().unwrap_or_default();
            let Some(content) = read_file(file_path, &self.suffix, self.name())? else {
                return Ok(());
            };
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    let mut wrapped = Map::new();
                    wrapped.insert("line".to_owned(), Value::String(line.to_owned()));
                    emit(Value::Object(wrapped));
                }
            }
            Ok(())
        })
    }

    fn set_default_paths(&mut self, input_key_path: &[String], output_key: &str) {
        self.cfg.apply_defaults(input_key_path, output_key);
    }
}

/// Reads the whole text file addressed by `input_key_path` and yields a
/// single record carrying it as `{content}` under the output key.
pub struct FileToText {
    suffix: String,
    cfg: MapConfig,
}

impl FileToText {
    pub fn new(suffix: &str, input_key_path: Option<KeyPath>, output_key: Option<&str>) -> Self {
        Self {
            suffix: suffix.to_owned(),
            cfg: MapConfig::new(input_key_path, ValueKind::String, output_key),
        }
    }

    pub fn copy_values(mut self, copies: Vec<(String, KeyPath)>) -> Self {
        self.cfg.copy_values_key_paths = copies;
        self
    }
}

impl Operator for FileToText {
    fn name(&self) -> &str {
        "file-to-text"
    }
}

impl Transformer for FileToText {
    fn transform(&self, item: Record, ctx: &mut Context) -> Result<Vec<Record>> {
        map_records(&self.cfg, &item, ctx, |input, _ctx, emit| {
            let file_path = input.as_str().unwrap_or_default();
            let Some(content) = read_file(file_path, &self.suffix, self.name())? else {
                return Ok(());
            };
            let mut wrapped = Map::new();
            wrapped.insert("content".to_owned(), Value::String(content));
            emit(Value::Object(wrapped));
            Ok(())
        })
    }

    fn set_default_paths(&mut self, input_key_path: &[String], output_key: &str) {
        self.cfg.apply_defaults(input_key_path, output_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retl_core::{deep_get, path};
    use serde_json::json;
    use std::io::Write;

    fn rec(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn fixture(content: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("sample.txt");
        let mut f = std::fs::File::create(&file_path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, file_path.display().to_string())
    }

    #[test]
    fn yields_one_record_per_non_empty_line() {
        let (_dir, file_path) = fixture("alpha beta\n\n  \nalpha\n");
        let t = FileToLines::new(".txt", Some(path(&["_"])), Some("_"))
            .copy_values(vec![("file_path".into(), path(&["_"]))]);
        let out = t
            .transform(rec(json!({"_": file_path.clone()})), &mut Context::new())
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(
            deep_get(&out[0], &path(&["_", "line"])),
            Some(&json!("alpha beta"))
        );
        assert_eq!(
            deep_get(&out[1], &path(&["_", "line"])),
            Some(&json!("alpha"))
        );
        assert_eq!(
            deep_get(&out[0], &path(&["file_path"])),
            Some(&json!(file_path))
        );
    }

    #[test]
    fn whole_file_comes_back_as_content() {
        let (_dir, file_path) = fixture("beta gamma");
        let t = FileToText::new(".txt", Some(path(&["_"])), Some("_"));
        let out = t
            .transform(rec(json!({"_": file_path})), &mut Context::new())
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            deep_get(&out[0], &path(&["_", "content"])),
            Some(&json!("beta gamma"))
        );
    }

    #[test]
    fn suffix_mismatch_skips_with_no_output() {
        let (_dir, file_path) = fixture("data");
        let t = FileToLines::new(".csv", Some(path(&["_"])), Some("_"));
        let out = t
            .transform(rec(json!({"_": file_path})), &mut Context::new())
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn missing_file_is_fatal() {
        let t = FileToLines::new(".txt", Some(path(&["_"])), Some("_"));
        let res = t.transform(rec(json!({"_": "/no/such/file.txt"})), &mut Context::new());
        assert!(res.is_err());
    }

    #[test]
    fn missing_input_key_is_fatal() {
        let t = FileToText::new(".txt", Some(path(&["_"])), Some("_"));
        let res = t.transform(rec(json!({"other": 1})), &mut Context::new());
        assert!(res.is_err());
    }
}
