//! Task evaluation.
//!
//! An [`Evaluator`] is bound to one environment through its connector. It
//! replays the task's reset actions for that environment and scores the
//! final state against reference answers. Scores are products of 0/1 check
//! results, so a single failing check or any execution error yields 0.0.
//!
//! [`EvaluatorComb`] multiplies the scores of all evaluators of a task, and
//! [`router::eval_tasks`] weights task scores into a suite score.

pub mod calendar;
pub mod comb;
pub mod filesystem;
pub mod gmail;
pub mod matching;
pub mod router;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use calendar::CalendarEvaluator;
pub use comb::EvaluatorComb;
pub use filesystem::FilesystemEvaluator;
pub use gmail::GmailEvaluator;
pub use router::{eval_tasks, evaluator_router, SuiteScore, TaskReport};

use crate::task::EvalKind;

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Name of the check, e.g. `content_check`.
    pub check_type: String,
    /// What was checked (a path, an event, a message).
    pub target: String,
    pub passed: bool,
    /// Why the check failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    pub fn pass(check_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            check_type: check_type.into(),
            target: target.into(),
            passed: true,
            message: None,
        }
    }

    pub fn fail(
        check_type: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check_type: check_type.into(),
            target: target.into(),
            passed: false,
            message: Some(message.into()),
        }
    }

    /// Builds a passing or failing result; `message` is only kept on failure.
    pub fn from_bool(
        passed: bool,
        check_type: impl Into<String>,
        target: impl Into<String>,
        message: impl FnOnce() -> String,
    ) -> Self {
        if passed {
            Self::pass(check_type, target)
        } else {
            Self::fail(check_type, target, message())
        }
    }
}

/// Score and feedback produced by one evaluator or a whole comb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Score in `[0, 1]`.
    pub score: f64,
    pub checks: Vec<CheckResult>,
    /// Errors that aborted an evaluation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Default for EvaluationReport {
    fn default() -> Self {
        Self {
            score: 1.0,
            checks: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl EvaluationReport {
    /// An empty report scoring 1.0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a check, multiplying the score by its 0/1 outcome.
    pub fn record(&mut self, check: CheckResult) {
        if !check.passed {
            self.score = 0.0;
        }
        self.checks.push(check);
    }

    /// Records an execution error. The score collapses to 0.0.
    pub fn abort(&mut self, error: impl fmt::Display) {
        self.score = 0.0;
        self.errors.push(error.to_string());
    }

    /// Folds another report into this one: scores multiply, feedback appends.
    pub fn merge(&mut self, other: EvaluationReport) {
        self.score *= other.score;
        self.checks.extend(other.checks);
        self.errors.extend(other.errors);
    }

    pub fn passed(&self) -> bool {
        self.score >= 1.0
    }

    /// Human-readable lines for failing checks and errors.
    pub fn feedback(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| {
                format!(
                    "{} failed for {}: {}",
                    c.check_type,
                    c.target,
                    c.message.as_deref().unwrap_or("no details")
                )
            })
            .chain(self.errors.iter().map(|e| format!("error: {}", e)))
            .collect()
    }
}

/// A scored checker bound to one external environment.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// The environment this evaluator checks.
    fn kind(&self) -> EvalKind;

    /// Replays the reset actions. Returns false on the first failure.
    async fn reset(&self) -> bool;

    /// Runs all checks against the current state.
    async fn evaluate(&self) -> EvaluationReport;
}
