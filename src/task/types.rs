//! Task configuration types.

use serde::{Deserialize, Serialize};

use super::actions::{CalendarCheck, EvalKind, FsStep, GmailCheck, ResetAction};

/// One declared evaluation step of a task.
///
/// Serialized as `{"eval_type": "...", "reference_answers": ...}`; the shape
/// of `reference_answers` depends on the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eval_type", content = "reference_answers", rename_all = "snake_case")]
pub enum EvalSpec {
    Filesystem(Vec<FsStep>),
    GoogleCalendar(Vec<CalendarCheck>),
    Gmail(Vec<GmailCheck>),
}

impl EvalSpec {
    /// The environment this evaluation runs against.
    pub fn kind(&self) -> EvalKind {
        match self {
            EvalSpec::Filesystem(_) => EvalKind::Filesystem,
            EvalSpec::GoogleCalendar(_) => EvalKind::GoogleCalendar,
            EvalSpec::Gmail(_) => EvalKind::Gmail,
        }
    }
}

/// Declarative description of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique task identifier.
    pub task_id: String,
    /// Instruction shown to the agent.
    pub instruction: String,
    /// Whether the task is recorded on screen.
    #[serde(default)]
    pub visual: bool,
    /// Evaluation steps, run in order.
    #[serde(default)]
    pub evals: Vec<EvalSpec>,
    /// Steps bringing the environments to a known baseline.
    #[serde(default)]
    pub reset_actions: Vec<ResetAction>,
    /// Weight of this task within its suite.
    #[serde(default = "default_weight")]
    pub score: f64,
    /// Scripted action sequence replayed by the scripted agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_actions: Vec<String>,
}

impl TaskConfig {
    /// Reset actions that target the given environment, in declaration order.
    pub fn reset_actions_for(&self, kind: EvalKind) -> Vec<ResetAction> {
        self.reset_actions
            .iter()
            .filter(|a| a.environment() == kind)
            .cloned()
            .collect()
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.task_id.trim().is_empty() {
            return Err("task_id cannot be empty".to_string());
        }
        if !self.score.is_finite() || self.score < 0.0 {
            return Err(format!(
                "task '{}' has invalid score weight {}",
                self.task_id, self.score
            ));
        }
        Ok(())
    }
}

/// A weighted collection of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSuite {
    pub tasks: Vec<TaskConfig>,
    /// Multiplier applied to the normalized suite score.
    #[serde(default = "default_weight")]
    pub score_weight: f64,
}

impl TaskSuite {
    /// Wraps tasks in a suite with unit weight.
    pub fn from_tasks(tasks: Vec<TaskConfig>) -> Self {
        Self {
            tasks,
            score_weight: 1.0,
        }
    }

    /// Finds a task by id.
    pub fn get(&self, task_id: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Sum of all task weights.
    pub fn total_weight(&self) -> f64 {
        self.tasks.iter().map(|t| t.score).sum()
    }
}

fn default_weight() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::actions::{FsAction, FsCheck};
    use serde_json::json;

    fn sample_task() -> serde_json::Value {
        json!({
            "task_id": "fs-1",
            "instruction": "Create tmp/test.txt",
            "evals": [{
                "eval_type": "filesystem",
                "reference_answers": [
                    {"exists": {"tmp/test.txt": true}},
                    {"content_check": {"tmp/test.txt": "Hello World!"}}
                ]
            }],
            "reset_actions": [
                {"rmdir": {"path": "tmp"}},
                {"clear_calendar": {}}
            ],
            "score": 2.0
        })
    }

    #[test]
    fn test_task_config_parses() {
        let task: TaskConfig = serde_json::from_value(sample_task()).unwrap();
        assert_eq!(task.task_id, "fs-1");
        assert!(!task.visual);
        assert_eq!(task.score, 2.0);
        assert_eq!(task.evals.len(), 1);
        assert_eq!(task.evals[0].kind(), EvalKind::Filesystem);
        match &task.evals[0] {
            EvalSpec::Filesystem(steps) => {
                assert_eq!(steps.len(), 2);
                assert!(matches!(steps[0], FsStep::Check(FsCheck::Exists(_))));
            }
            other => panic!("unexpected eval: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_eval_type_is_rejected() {
        let mut value = sample_task();
        value["evals"][0]["eval_type"] = json!("url_match");
        assert!(serde_json::from_value::<TaskConfig>(value).is_err());
    }

    #[test]
    fn test_reset_actions_for_filters_by_environment() {
        let task: TaskConfig = serde_json::from_value(sample_task()).unwrap();
        let fs = task.reset_actions_for(EvalKind::Filesystem);
        assert_eq!(
            fs,
            vec![ResetAction::Filesystem(FsAction::Rmdir {
                path: "tmp".to_string()
            })]
        );
        assert_eq!(task.reset_actions_for(EvalKind::GoogleCalendar).len(), 1);
        assert!(task.reset_actions_for(EvalKind::Gmail).is_empty());
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let mut task: TaskConfig = serde_json::from_value(sample_task()).unwrap();
        task.score = -1.0;
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_suite_defaults_and_lookup() {
        let suite: TaskSuite = serde_json::from_value(json!({
            "tasks": [sample_task()]
        }))
        .unwrap();
        assert_eq!(suite.score_weight, 1.0);
        assert_eq!(suite.total_weight(), 2.0);
        assert!(suite.get("fs-1").is_some());
        assert!(suite.get("missing").is_none());
    }
}
