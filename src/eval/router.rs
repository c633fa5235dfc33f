//! Building evaluators from task configurations and scoring suites.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    CalendarEvaluator, EvaluationReport, Evaluator, EvaluatorComb, FilesystemEvaluator,
    GmailEvaluator,
};
use crate::connectors::ConnectorSet;
use crate::error::TaskConfigError;
use crate::task::{EvalKind, EvalSpec, ResetAction, TaskConfig, TaskSuite};

/// Builds the evaluator comb of a task.
///
/// Each environment's reset actions go to the first evaluator bound to that
/// environment, so they are replayed once per task. Environments that only
/// appear in reset actions get an evaluator with no checks. A missing
/// connector fails the whole task.
pub fn evaluator_router(
    task: &TaskConfig,
    connectors: &ConnectorSet,
) -> Result<EvaluatorComb, TaskConfigError> {
    let mut evaluators: Vec<Box<dyn Evaluator>> = Vec::new();
    let mut reset_assigned = BTreeSet::new();

    let reset_only: Vec<EvalSpec> = task
        .reset_actions
        .iter()
        .map(ResetAction::environment)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|kind| !task.evals.iter().any(|e| e.kind() == *kind))
        .map(empty_spec)
        .collect();

    for spec in task.evals.iter().chain(reset_only.iter()) {
        let kind = spec.kind();
        let settings = connectors
            .env_settings(kind)
            .ok_or_else(|| TaskConfigError::MissingConnector(kind.to_string()))?;
        debug!("Building {} evaluator with settings {:?}", kind, settings);

        let resets = if reset_assigned.insert(kind) {
            task.reset_actions_for(kind)
        } else {
            Vec::new()
        };
        evaluators.push(build(spec, resets, connectors)?);
    }

    Ok(EvaluatorComb::new(evaluators))
}

fn empty_spec(kind: EvalKind) -> EvalSpec {
    match kind {
        EvalKind::Filesystem => EvalSpec::Filesystem(Vec::new()),
        EvalKind::GoogleCalendar => EvalSpec::GoogleCalendar(Vec::new()),
        EvalKind::Gmail => EvalSpec::Gmail(Vec::new()),
    }
}

fn build(
    spec: &EvalSpec,
    resets: Vec<ResetAction>,
    connectors: &ConnectorSet,
) -> Result<Box<dyn Evaluator>, TaskConfigError> {
    let missing = || TaskConfigError::MissingConnector(spec.kind().to_string());
    Ok(match spec {
        EvalSpec::Filesystem(steps) => {
            let connector = connectors.filesystem.clone().ok_or_else(missing)?;
            let resets = resets
                .into_iter()
                .filter_map(|a| match a {
                    ResetAction::Filesystem(action) => Some(action),
                    _ => None,
                })
                .collect();
            Box::new(FilesystemEvaluator::new(connector, steps.clone(), resets))
        }
        EvalSpec::GoogleCalendar(checks) => {
            let calendar = connectors.calendar.clone().ok_or_else(missing)?;
            let resets = resets
                .into_iter()
                .filter_map(|a| match a {
                    ResetAction::Calendar(action) => Some(action),
                    _ => None,
                })
                .collect();
            Box::new(CalendarEvaluator::new(calendar, checks.clone(), resets))
        }
        EvalSpec::Gmail(checks) => {
            let mail = connectors.gmail.clone().ok_or_else(missing)?;
            let resets = resets
                .into_iter()
                .filter_map(|a| match a {
                    ResetAction::Gmail(action) => Some(action),
                    _ => None,
                })
                .collect();
            Box::new(GmailEvaluator::new(mail, checks.clone(), resets))
        }
    })
}

/// Weighted score of a task suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteScore {
    /// `gained / total * score_weight`.
    pub score: f64,
    pub gained: f64,
    pub total: f64,
    pub reports: Vec<TaskReport>,
}

/// Evaluation outcome of one task within a suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub weight: f64,
    pub report: EvaluationReport,
}

/// Evaluates every task of a suite against the current environment state.
///
/// All combs are built before anything is evaluated, so a configuration
/// error leaves the environments untouched.
pub async fn eval_tasks(
    suite: &TaskSuite,
    connectors: &ConnectorSet,
) -> Result<SuiteScore, TaskConfigError> {
    let total = suite.total_weight();
    if suite.tasks.is_empty() || total <= 0.0 {
        return Err(TaskConfigError::EmptySuite);
    }

    let combs = suite
        .tasks
        .iter()
        .map(|task| evaluator_router(task, connectors).map(|comb| (task, comb)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut gained = 0.0;
    let mut reports = Vec::with_capacity(combs.len());
    for (task, comb) in combs {
        let report = comb.evaluate().await;
        info!("Task {} scored {} (weight {})", task.task_id, report.score, task.score);
        gained += report.score * task.score;
        reports.push(TaskReport {
            task_id: task.task_id.clone(),
            weight: task.score,
            report,
        });
    }

    let score = gained / total * suite.score_weight;
    info!("Suite score: {:.3} ({}/{})", score, gained, total);
    Ok(SuiteScore {
        score,
        gained,
        total,
        reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::FilesystemConnector;
    use crate::eval::calendar::tests::FakeCalendar;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn task(value: serde_json::Value) -> TaskConfig {
        serde_json::from_value(value).unwrap()
    }

    fn fs_connectors(dir: &TempDir) -> ConnectorSet {
        let root = Some(dir.path().to_path_buf());
        ConnectorSet::new().with_filesystem(FilesystemConnector::new(root))
    }

    #[test]
    fn test_missing_connector_is_config_error() {
        let t = task(json!({
            "task_id": "cal",
            "instruction": "i",
            "evals": [{"eval_type": "google_calendar", "reference_answers": []}]
        }));
        let err = evaluator_router(&t, &ConnectorSet::new()).err().unwrap();
        assert!(matches!(
            err,
            TaskConfigError::MissingConnector(kind) if kind == "google_calendar"
        ));
    }

    #[tokio::test]
    async fn test_resets_run_once_per_environment() {
        let dir = TempDir::new().unwrap();
        let t = task(json!({
            "task_id": "twice",
            "instruction": "i",
            "evals": [
                {"eval_type": "filesystem", "reference_answers": [{"exists": {"log.txt": true}}]},
                {
                    "eval_type": "filesystem",
                    "reference_answers": [{"content_check": {"log.txt": "a"}}]
                }
            ],
            "reset_actions": [{"create_file": {"path": "log.txt", "content": "a"}}]
        }));
        let comb = evaluator_router(&t, &fs_connectors(&dir)).unwrap();
        assert_eq!(comb.len(), 2);
        assert!(comb.reset().await);
        assert_eq!(comb.evaluate().await.score, 1.0);
    }

    #[tokio::test]
    async fn test_reset_only_environment_gets_evaluator() {
        let dir = TempDir::new().unwrap();
        let calendar = Arc::new(FakeCalendar::default());
        let connectors = fs_connectors(&dir).with_calendar(calendar.clone());
        let t = task(json!({
            "task_id": "mixed",
            "instruction": "i",
            "evals": [{"eval_type": "filesystem", "reference_answers": []}],
            "reset_actions": [{"create_event": {
                "start_time": "2024-01-01T10:00:00Z",
                "end_time": "2024-01-01T11:00:00Z"
            }}]
        }));
        let comb = evaluator_router(&t, &connectors).unwrap();
        assert_eq!(comb.kinds(), vec![EvalKind::Filesystem, EvalKind::GoogleCalendar]);
        assert!(comb.reset().await);
        assert_eq!(calendar.events.lock().unwrap().len(), 1);
        assert_eq!(comb.evaluate().await.score, 1.0);
    }

    #[tokio::test]
    async fn test_eval_tasks_weights_scores() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("present.txt"), "").unwrap();
        let suite = TaskSuite {
            tasks: vec![
                task(json!({
                    "task_id": "a", "instruction": "i", "score": 1.0,
                    "evals": [{
                        "eval_type": "filesystem",
                        "reference_answers": [{"exists": {"absent.txt": true}}]
                    }]
                })),
                task(json!({
                    "task_id": "b", "instruction": "i", "score": 3.0,
                    "evals": [{
                        "eval_type": "filesystem",
                        "reference_answers": [{"exists": {"present.txt": true}}]
                    }]
                })),
            ],
            score_weight: 2.0,
        };
        let result = eval_tasks(&suite, &fs_connectors(&dir)).await.unwrap();
        assert_eq!(result.gained, 3.0);
        assert_eq!(result.total, 4.0);
        assert_eq!(result.score, 1.5);
        assert_eq!(result.reports.len(), 2);
        assert_eq!(result.reports[0].report.score, 0.0);
    }

    #[tokio::test]
    async fn test_empty_suite_is_error() {
        let suite = TaskSuite::from_tasks(Vec::new());
        assert!(matches!(
            eval_tasks(&suite, &ConnectorSet::new()).await,
            Err(TaskConfigError::EmptySuite)
        ));
    }
}
