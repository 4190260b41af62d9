//! Record-to-row projection shared by the sinks.

use retl_core::record::{deep_get, KeyPath, Record, Value};

/// One output column: its title, the source path inside the (scoped) record,
/// and whether a record without it contributes a row at all.
#[derive(Clone, Debug)]
pub struct ColumnSpec {
    pub title: String,
    pub path: KeyPath,
    pub required: bool,
}

impl ColumnSpec {
    pub fn required(title: &str, path: KeyPath) -> Self {
        Self {
            title: title.to_owned(),
            path,
            required: true,
        }
    }

    pub fn optional(title: &str, path: KeyPath) -> Self {
        Self {
            title: title.to_owned(),
            path,
            required: false,
        }
    }
}

/// Project `item` (or the sub-record at `input_key_path`) into a row.
///
/// Returns `None` when the scope or any required column is absent; such a
/// record contributes zero rows.
pub fn row_from_record(
    item: &Record,
    input_key_path: Option<&KeyPath>,
    columns: &[ColumnSpec],
) -> Option<Vec<Value>> {
    let scope: &Record = match input_key_path {
        None => item,
        Some(keys) => deep_get(item, keys)?.as_object()?,
    };
    let mut row = Vec::with_capacity(columns.len());
    for column in columns {
        match deep_get(scope, &column.path) {
            Some(value) if !value.is_null() => row.push(value.clone()),
            _ if column.required => return None,
            _ => row.push(Value::Null),
        }
    }
    Some(row)
}

/// Render a value for delimited text output. Null renders empty.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
