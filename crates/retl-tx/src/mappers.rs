//! Ready-made value mappers for attribute and token chains.
//!
//! String mappers return `None` for non-string inputs, which skips the
//! operation (or drops the token) at the call site.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use retl_core::record::Value;

use crate::ValueMapper;

fn string_mapper<F>(f: F) -> ValueMapper
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    Arc::new(move |value| {
        let s = value.as_str()?;
        f(s).map(Value::String)
    })
}

pub fn lowercase() -> ValueMapper {
    string_mapper(|s| Some(s.to_lowercase()))
}

pub fn trim() -> ValueMapper {
    string_mapper(|s| Some(s.trim().to_owned()))
}

/// Truncate to at most 254 characters, the width of the words table column.
pub fn truncate_255() -> ValueMapper {
    string_mapper(|s| {
        Some(match s.char_indices().nth(254) {
            Some((idx, _)) => s[..idx].to_owned(),
            None => s.to_owned(),
        })
    })
}

/// Resolve a path string to its absolute form.
pub fn absolute_path() -> ValueMapper {
    string_mapper(|s| {
        std::path::absolute(s)
            .ok()
            .map(|p| p.display().to_string())
    })
}

/// Reduce a path string to its final component.
pub fn file_name() -> ValueMapper {
    string_mapper(|s| {
        Path::new(s)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    })
}

/// Keep the last `levels` components of a path string, e.g. 2 turns
/// `/corpus/base/doc.txt` into `base/doc.txt`.
pub fn basename_backwards(levels: usize) -> ValueMapper {
    let levels = levels.max(1);
    string_mapper(move |s| {
        let components: Vec<_> = Path::new(s)
            .components()
            .map(|c| c.as_os_str().to_owned())
            .collect();
        let keep = components.len().saturating_sub(levels);
        let tail: PathBuf = components[keep..].iter().collect();
        Some(tail.display().to_string())
    })
}
