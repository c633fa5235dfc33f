//! Append-only results log.
//!
//! Every finished task becomes one line of `<record_path>/<results_file>`.
//! Embedded screenshots are written next to it, one directory per task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info};

use super::jsonl::{add_jsonl, read_jsonl};
use super::media::extract_media;
use super::types::TaskResult;
use crate::config::StudioConfig;
use crate::error::ResultStoreError;

/// Local JSONL storage for task results.
#[derive(Debug, Clone)]
pub struct ResultStore {
    /// Directory holding the log and per-task media.
    record_path: PathBuf,
    results_file: String,
}

impl ResultStore {
    pub fn new(record_path: impl Into<PathBuf>, results_file: impl Into<String>) -> Self {
        Self {
            record_path: record_path.into(),
            results_file: results_file.into(),
        }
    }

    pub fn from_config(config: &StudioConfig) -> Self {
        Self::new(config.record_path.clone(), config.results_file.clone())
    }

    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    /// Path of the JSONL log.
    pub fn results_path(&self) -> PathBuf {
        self.record_path.join(&self.results_file)
    }

    /// Writes a result: media files first, then one log line.
    ///
    /// Returns the record as stored, with media URLs rewritten to paths
    /// relative to the record directory.
    pub async fn export(&self, result: &TaskResult) -> Result<TaskResult, ResultStoreError> {
        fs::create_dir_all(&self.record_path).await?;

        let mut stored = result.clone();
        if stored.recorded_at.is_none() {
            stored.recorded_at = Some(Utc::now());
        }

        let media_dir = media_dir_name(&stored.task_id)?;
        let mut trajectory = std::mem::take(&mut stored.trajectory);
        let pending = extract_media(&mut trajectory, &media_dir)?;
        stored.trajectory = trajectory;

        if !pending.is_empty() {
            fs::create_dir_all(self.record_path.join(&media_dir)).await?;
            for media in &pending {
                fs::write(self.record_path.join(&media.relative_path), &media.bytes).await?;
            }
            debug!("Saved {} media files for task {}", pending.len(), stored.task_id);
        }

        let value = serde_json::to_value(&stored)?;
        add_jsonl(&self.results_path(), &[value]).await?;
        info!(
            "Saved result for task {} to {}",
            stored.task_id,
            self.results_path().display()
        );
        Ok(stored)
    }

    /// Loads records `[start, end)`. A missing log reads as empty.
    pub async fn load(
        &self,
        start: usize,
        end: Option<usize>,
    ) -> Result<Vec<TaskResult>, ResultStoreError> {
        let path = self.results_path();
        if !path.exists() {
            if let Some(end) = end {
                if start > end {
                    return Err(ResultStoreError::InvalidRange { start, end });
                }
            }
            return Ok(Vec::new());
        }

        read_jsonl(&path, start, end)
            .await?
            .into_iter()
            .enumerate()
            .map(|(idx, value)| {
                serde_json::from_value(value).map_err(|e| ResultStoreError::MalformedRecord {
                    line: start + idx + 1,
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// Latest record of every task, keyed by task id.
    pub async fn latest_by_task(&self) -> Result<HashMap<String, TaskResult>, ResultStoreError> {
        let mut index = HashMap::new();
        for result in self.load(0, None).await? {
            index.insert(result.task_id.clone(), result);
        }
        Ok(index)
    }

    /// Latest record of one task.
    pub async fn get(&self, task_id: &str) -> Result<Option<TaskResult>, ResultStoreError> {
        Ok(self.latest_by_task().await?.remove(task_id))
    }
}

/// Task ids become directory names; path separators are flattened.
///
/// Ids that would resolve to the record directory or its parent are refused.
fn media_dir_name(task_id: &str) -> Result<String, ResultStoreError> {
    let name: String = task_id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match name.as_str() {
        "" | "." | ".." => Err(ResultStoreError::InvalidTaskId(task_id.to_string())),
        _ => Ok(name),
    }
}
