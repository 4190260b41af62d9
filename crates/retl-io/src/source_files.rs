//! Filesystem walker extractors.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use glob::glob;
use retl_core::error::EtlError;
use retl_core::record::{Record, Value};
use retl_core::{Extractor, Operator, RecordIter};

fn dir_glob(dir: &PathBuf, suffix: &str) -> String {
    format!("{}/**/*{}", dir.display(), suffix)
}

fn walk(pattern: &str, output_key: String) -> Result<RecordIter> {
    let paths = glob(pattern).context("glob")?;
    Ok(Box::new(
        paths
            .filter(|entry| entry.as_ref().map(|p| p.is_file()).unwrap_or(true))
            .map(move |entry| {
                let found = entry?;
                let absolute = std::path::absolute(&found).unwrap_or(found);
                let mut record = Record::new();
                record.insert(
                    output_key.clone(),
                    Value::String(absolute.display().to_string()),
                );
                Ok(record)
            }),
    ))
}

/// Emits `{output_key: absolute_path}` for every file under `input_dir`
/// whose name ends with `suffix`.
pub struct FilesExtractor {
    input_dir: PathBuf,
    suffix: String,
    output_key: String,
}

impl FilesExtractor {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        suffix: &str,
        output_key: &str,
    ) -> Result<Self, EtlError> {
        let input_dir = input_dir.into();
        if !input_dir.is_dir() {
            return Err(EtlError::Config(format!(
                "{} should be a valid directory",
                input_dir.display()
            )));
        }
        Ok(Self {
            input_dir,
            suffix: suffix.to_owned(),
            output_key: output_key.to_owned(),
        })
    }
}

impl Operator for FilesExtractor {
    fn name(&self) -> &str {
        "files-extractor"
    }
}

impl Extractor for FilesExtractor {
    fn extract(&mut self) -> Result<RecordIter> {
        walk(&dir_glob(&self.input_dir, &self.suffix), self.output_key.clone())
    }
}

/// [`FilesExtractor`] over a list of root directories, walked in order.
pub struct MultiDirExtractor {
    input_dirs: Vec<PathBuf>,
    suffix: String,
    output_key: String,
}

impl MultiDirExtractor {
    pub fn new(
        input_dirs: Vec<PathBuf>,
        suffix: &str,
        output_key: &str,
    ) -> Result<Self, EtlError> {
        if input_dirs.is_empty() {
            return Err(EtlError::Config("at least one input directory is required".into()));
        }
        for dir in &input_dirs {
            if !dir.is_dir() {
                return Err(EtlError::Config(format!(
                    "{} should be a valid directory",
                    dir.display()
                )));
            }
        }
        Ok(Self {
            input_dirs,
            suffix: suffix.to_owned(),
            output_key: output_key.to_owned(),
        })
    }
}

impl Operator for MultiDirExtractor {
    fn name(&self) -> &str {
        "multi-dir-extractor"
    }
}

impl Extractor for MultiDirExtractor {
    fn extract(&mut self) -> Result<RecordIter> {
        let mut walks = Vec::with_capacity(self.input_dirs.len());
        for dir in &self.input_dirs {
            walks.push(walk(&dir_glob(dir, &self.suffix), self.output_key.clone())?);
        }
        Ok(Box::new(walks.into_iter().flatten()))
    }
}
