//! Result record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::eval::EvaluationReport;
use crate::task::TaskConfig;

/// Outcome of one task run, written once to the results log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub instruction: String,
    /// Agent trajectory; shape is agent-specific.
    #[serde(default)]
    pub trajectory: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub token_count: Option<u64>,
    /// Recording metadata for visual tasks.
    #[serde(default)]
    pub video: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// Creates an unscored result for a task.
    pub fn new(task: &TaskConfig, trajectory: Value) -> Self {
        Self {
            task_id: task.task_id.clone(),
            instruction: task.instruction.clone(),
            trajectory,
            score: None,
            feedback: None,
            token_count: None,
            video: None,
            recorded_at: None,
        }
    }

    /// Attaches a score and feedback.
    pub fn with_score(mut self, score: f64, feedback: impl Into<String>) -> Self {
        self.score = Some(score);
        self.feedback = Some(feedback.into());
        self
    }

    /// Attaches the score and feedback of a local evaluation.
    pub fn with_report(self, report: &EvaluationReport) -> Self {
        let feedback = report.feedback().join("\n");
        self.with_score(report.score, feedback)
    }

    pub fn with_token_count(mut self, token_count: u64) -> Self {
        self.token_count = Some(token_count);
        self
    }

    pub fn with_video(mut self, video: Value) -> Self {
        self.video = Some(video);
        self
    }
}
