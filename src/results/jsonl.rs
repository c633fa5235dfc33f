//! JSON Lines helpers.

use std::path::Path;

use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::ResultStoreError;

/// Reads lines `[start, end)` of a JSONL file. `end = None` reads to the end.
///
/// Blank lines are skipped but still count towards the line index.
pub async fn read_jsonl(
    path: &Path,
    start: usize,
    end: Option<usize>,
) -> Result<Vec<Value>, ResultStoreError> {
    if let Some(end) = end {
        if start > end {
            return Err(ResultStoreError::InvalidRange { start, end });
        }
    }

    let content = fs::read_to_string(path).await?;
    let mut items = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if end.is_some_and(|end| idx >= end) {
            break;
        }
        if idx < start || line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(line).map_err(|e| ResultStoreError::MalformedRecord {
            line: idx + 1,
            message: e.to_string(),
        })?;
        items.push(value);
    }
    Ok(items)
}

/// Appends one line per item, creating the file if needed.
pub async fn add_jsonl(path: &Path, items: &[Value]) -> Result<(), ResultStoreError> {
    let mut buf = String::new();
    for item in items {
        buf.push_str(&serde_json::to_string(item)?);
        buf.push('\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(buf.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Pretty-prints a JSON value with four-space indentation.
pub fn format_json(value: &Value) -> String {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    match serde::Serialize::serialize(value, &mut serializer) {
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(_) => value.to_string(),
    }
}
