//! Extraction of inline `data:image` URLs from trajectories.
//!
//! Screenshots arrive as base64 data URLs under `url` keys. Before a record
//! is written they are decoded to files under `<record_path>/<task_id>/` and
//! the URL is replaced with the file's path relative to `record_path`.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ResultStoreError;

const DATA_IMAGE_PREFIX: &str = "data:image";

/// A decoded media file waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMedia {
    /// Path relative to the record directory.
    pub relative_path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Replaces every `data:image` URL in `value` and returns the files to write.
pub fn extract_media(
    value: &mut Value,
    task_id: &str,
) -> Result<Vec<PendingMedia>, ResultStoreError> {
    let mut pending = Vec::new();
    walk(value, Path::new(task_id), &mut pending)?;
    Ok(pending)
}

fn walk(
    value: &mut Value,
    dir: &Path,
    pending: &mut Vec<PendingMedia>,
) -> Result<(), ResultStoreError> {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "url" {
                    if let Value::String(url) = child {
                        if url.starts_with(DATA_IMAGE_PREFIX) {
                            let (ext, bytes) = decode_data_url(url)?;
                            let relative_path = dir.join(format!("{}.{}", Uuid::new_v4(), ext));
                            *url = relative_path.to_string_lossy().into_owned();
                            pending.push(PendingMedia {
                                relative_path,
                                bytes,
                            });
                            continue;
                        }
                    }
                }
                walk(child, dir, pending)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, dir, pending)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Splits `data:image/<subtype>;base64,<payload>` into an extension and bytes.
fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), ResultStoreError> {
    let (header, payload) = url
        .split_once(',')
        .ok_or_else(|| ResultStoreError::UnsupportedMedia("missing payload".to_string()))?;

    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default();
    if !parts.any(|p| p == "base64") {
        return Err(ResultStoreError::UnsupportedMedia(format!(
            "{} is not base64 encoded",
            mime
        )));
    }

    let ext = match mime.strip_prefix("data:image/").unwrap_or("png") {
        "jpeg" => "jpg".to_string(),
        "svg+xml" => "svg".to_string(),
        "" => "png".to_string(),
        other => other.to_string(),
    };

    let bytes = STANDARD.decode(payload.trim())?;
    Ok((ext, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replaces_nested_urls() {
        let payload = STANDARD.encode(b"png-bytes");
        let mut value = json!([
            {"role": "user", "content": [
                {
                    "type": "image_url",
                    "image_url": {"url": format!("data:image/png;base64,{}", payload)}
                },
                {"type": "text", "text": "hello"}
            ]},
            {"url": "https://example.com/a.png"}
        ]);

        let pending = extract_media(&mut value, "task-1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].bytes, b"png-bytes");

        let replaced = value[0]["content"][0]["image_url"]["url"].as_str().unwrap();
        assert!(replaced.starts_with("task-1/"));
        assert!(replaced.ends_with(".png"));
        assert_eq!(Path::new(replaced), pending[0].relative_path);
        assert_eq!(value[1]["url"], "https://example.com/a.png");
    }

    #[test]
    fn test_jpeg_extension() {
        let mut value = json!({"url": format!("data:image/jpeg;base64,{}", STANDARD.encode(b"x"))});
        let pending = extract_media(&mut value, "t").unwrap();
        assert_eq!(pending[0].relative_path.extension().unwrap(), "jpg");
    }

    #[test]
    fn test_rejects_non_base64() {
        let mut value = json!({"url": "data:image/svg+xml,<svg/>"});
        assert!(matches!(
            extract_media(&mut value, "t"),
            Err(ResultStoreError::UnsupportedMedia(_))
        ));
    }

    #[test]
    fn test_rejects_bad_payload() {
        let mut value = json!({"url": "data:image/png;base64,@@@"});
        assert!(matches!(
            extract_media(&mut value, "t"),
            Err(ResultStoreError::Decode(_))
        ));
    }
}
