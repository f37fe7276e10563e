//! Row-data provider: JSON Lines in, column/value mappings out
//!
//! Each non-empty line is one JSON object mapping column name to value;
//! column names are normalized by the template layer (lower-cased,
//! spaces to underscores). Non-string values are rendered with their
//! JSON representation.

use std::path::Path;

use herald_template::RowData;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while reading row data
#[derive(Debug, Error)]
pub enum RowsError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was being read
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A line is not a JSON object
    #[error("{path}:{line}: expected a JSON object: {detail}")]
    BadLine {
        /// Path that was being read
        path: String,
        /// 1-indexed line number
        line: usize,
        /// What went wrong
        detail: String,
    },
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Read all rows from a JSON-Lines file
pub fn read_rows(path: &Path) -> Result<Vec<RowData>, RowsError> {
    let text = std::fs::read_to_string(path).map_err(|source| RowsError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut rows = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(line).map_err(|error| RowsError::BadLine {
                path: path.display().to_string(),
                line: index + 1,
                detail: error.to_string(),
            })?;
        let Value::Object(map) = value else {
            return Err(RowsError::BadLine {
                path: path.display().to_string(),
                line: index + 1,
                detail: format!("got {value}"),
            });
        };
        rows.push(RowData::from_columns(
            map.iter().map(|(key, value)| (key.as_str(), render(value))),
        ));
    }

    Ok(rows)
}
