//! Buffered delimited text file sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use retl_core::record::{KeyPath, Record};
use retl_core::{Loader, Operator};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::columns::{display_value, row_from_record, ColumnSpec};

/// Appends joined rows to a UTF-8 text file, one file per loader instance.
///
/// The file is named `{prefix}_{uuid}.{ext}` inside `out_dir` and carries no
/// header; rows are `\n`-terminated. Write failures are logged and the
/// in-flight batch surrendered; they never propagate past the loader.
pub struct CsvLoader {
    input_key_path: Option<KeyPath>,
    columns: Vec<ColumnSpec>,
    out_dir: PathBuf,
    col_sep: String,
    out_file_ext: String,
    out_file_name_prefix: String,
    buffer_size: usize,
    buffer: Vec<String>,
    file: Option<File>,
    instance_id: String,
}

impl CsvLoader {
    pub fn new(
        input_key_path: Option<KeyPath>,
        columns: Vec<ColumnSpec>,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_key_path,
            columns,
            out_dir: out_dir.into(),
            col_sep: ";".to_owned(),
            out_file_ext: "txt".to_owned(),
            out_file_name_prefix: "out".to_owned(),
            buffer_size: 1_000,
            buffer: Vec::new(),
            file: None,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn col_sep(mut self, sep: &str) -> Self {
        self.col_sep = sep.to_owned();
        self
    }

    pub fn file_ext(mut self, ext: &str) -> Self {
        self.out_file_ext = ext.to_owned();
        self
    }

    pub fn file_prefix(mut self, prefix: &str) -> Self {
        self.out_file_name_prefix = prefix.to_owned();
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Path of the output file owned by this instance.
    pub fn out_file_path(&self) -> PathBuf {
        self.out_dir.join(format!(
            "{}_{}.{}",
            self.out_file_name_prefix, self.instance_id, self.out_file_ext
        ))
    }

    fn open_file(&mut self) -> std::io::Result<&mut File> {
        if self.file.is_none() {
            std::fs::create_dir_all(&self.out_dir)?;
            let file_path = self.out_file_path();
            let file = OpenOptions::new().create(true).append(true).open(&file_path)?;
            info!(file = %file_path.display(), "output file opened");
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => unreachable!(),
        }
    }

    fn write_buffered_rows(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let payload = self.buffer.join("\n") + "\n";
        let count = self.buffer.len();
        let res = self
            .open_file()
            .and_then(|file| file.write_all(payload.as_bytes()));
        match res {
            Ok(()) => debug!(rows = count, "rows written to the output file"),
            Err(e) => error!(error = %e, rows = count, "file write failed, batch surrendered"),
        }
        self.buffer.clear();
    }
}

impl Operator for CsvLoader {
    fn name(&self) -> &str {
        "csv-loader"
    }
}

#[async_trait]
impl Loader for CsvLoader {
    async fn load(&mut self, _job_id: &str, items: Vec<Record>, last_call: bool) -> Result<()> {
        for item in &items {
            if let Some(row) = row_from_record(item, self.input_key_path.as_ref(), &self.columns) {
                let rendered: Vec<String> = row.iter().map(display_value).collect();
                self.buffer.push(rendered.join(&self.col_sep));
            }
        }
        if last_call || self.buffer.len() >= self.buffer_size {
            self.write_buffered_rows();
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            info!("flushing buffered rows");
            self.write_buffered_rows();
        }
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                error!(error = %e, "error flushing the output file");
            }
            info!("output file closed");
        }
        Ok(())
    }

    fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retl_core::path;
    use serde_json::{json, Value};

    fn rec(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn word_record(word: &str, file: &str) -> Record {
        rec(json!({"_": {"word": word}, "file_path": file}))
    }

    fn loader(dir: &std::path::Path) -> CsvLoader {
        CsvLoader::new(
            None,
            vec![
                ColumnSpec::required("word", path(&["_", "word"])),
                ColumnSpec::required("file", path(&["file_path"])),
            ],
            dir,
        )
    }

    #[tokio::test]
    async fn buffers_until_threshold_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = loader(dir.path()).buffer_size(3);

        csv.load("job", vec![word_record("a", "f"), word_record("b", "f")], false)
            .await
            .unwrap();
        assert!(csv.has_buffered_data());
        assert!(!csv.out_file_path().exists());

        csv.load("job", vec![word_record("c", "f")], false).await.unwrap();
        assert!(!csv.has_buffered_data());
        let content = std::fs::read_to_string(csv.out_file_path()).unwrap();
        assert_eq!(content, "a;f\nb;f\nc;f\n");
    }

    #[tokio::test]
    async fn close_flushes_the_remainder_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = loader(dir.path());
        csv.load("job", vec![word_record("x", "g")], false).await.unwrap();
        csv.close().await.unwrap();
        csv.close().await.unwrap();
        let content = std::fs::read_to_string(csv.out_file_path()).unwrap();
        assert_eq!(content, "x;g\n");
    }

    #[tokio::test]
    async fn records_missing_required_columns_contribute_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = loader(dir.path());
        csv.load(
            "job",
            vec![word_record("a", "f"), rec(json!({"_": {"word": "b"}}))],
            true,
        )
        .await
        .unwrap();
        let content = std::fs::read_to_string(csv.out_file_path()).unwrap();
        assert_eq!(content, "a;f\n");
    }

    #[tokio::test]
    async fn last_call_with_no_items_flushes_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = loader(dir.path());
        csv.load("job", vec![word_record("a", "f")], false).await.unwrap();
        csv.load("job", Vec::new(), true).await.unwrap();
        let content = std::fs::read_to_string(csv.out_file_path()).unwrap();
        assert_eq!(content, "a;f\n");
    }

    #[tokio::test]
    async fn separator_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let mut csv = loader(dir.path()).col_sep(",").file_ext("csv");
        csv.load("job", vec![word_record("a", "f")], true).await.unwrap();
        assert!(csv.out_file_path().to_string_lossy().ends_with(".csv"));
        let content = std::fs::read_to_string(csv.out_file_path()).unwrap();
        assert_eq!(content, "a,f\n");
    }
}
