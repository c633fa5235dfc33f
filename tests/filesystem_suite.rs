//! End-to-end evaluation of a filesystem task suite loaded from disk.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use agent_studio::connectors::ConnectorSet;
use agent_studio::eval::{eval_tasks, evaluator_router};
use agent_studio::results::{ResultStore, TaskResult};
use agent_studio::task::load_suite;
use agent_studio::{StudioConfig, TaskConfigError};
use serde_json::json;
use tempfile::TempDir;

fn write_suite(dir: &Path) -> std::path::PathBuf {
    let suite = json!({
        "score_weight": 1.0,
        "tasks": [
            {
                "task_id": "file_task",
                "instruction": "Write Hello into ${ROOT}/tmp/test.txt",
                "score": 1.0,
                "evals": [{
                    "eval_type": "filesystem",
                    "reference_answers": [
                        {"exists": {"tmp/test.txt": true}},
                        {"content_check": {"tmp/test.txt": "Hello"}}
                    ]
                }]
            },
            {
                "task_id": "folder_task",
                "instruction": "Create the tmp folder",
                "score": 2.0,
                "evals": [{
                    "eval_type": "filesystem",
                    "reference_answers": [{"type_check": {"tmp": "folder"}}]
                }]
            }
        ]
    });
    let path = dir.join("suite.json");
    fs::write(&path, serde_json::to_string_pretty(&suite).unwrap()).unwrap();
    path
}

fn vars(root: &Path) -> HashMap<String, String> {
    HashMap::from([("ROOT".to_string(), root.display().to_string())])
}

#[tokio::test]
async fn test_suite_score_tracks_filesystem_state() {
    let config_dir = TempDir::new().unwrap();
    let playground = TempDir::new().unwrap();
    fs::create_dir(playground.path().join("tmp")).unwrap();
    fs::write(playground.path().join("tmp/test.txt"), "Hello").unwrap();

    let suite = load_suite(&write_suite(config_dir.path()), &vars(playground.path())).unwrap();
    assert!(suite.tasks[0].instruction.starts_with("Write Hello into /"));
    let config = StudioConfig::default().with_filesystem_root(playground.path());
    let connectors = ConnectorSet::for_tasks(&config, &suite.tasks).unwrap();

    let full = eval_tasks(&suite, &connectors).await.unwrap();
    assert_eq!(full.score, 1.0);

    fs::remove_file(playground.path().join("tmp/test.txt")).unwrap();
    let partial = eval_tasks(&suite, &connectors).await.unwrap();
    assert!((partial.score - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(partial.reports[0].report.score, 0.0);
    assert_eq!(partial.reports[1].report.score, 1.0);

    fs::remove_dir(playground.path().join("tmp")).unwrap();
    let none = eval_tasks(&suite, &connectors).await.unwrap();
    assert_eq!(none.score, 0.0);
}

#[tokio::test]
async fn test_missing_variable_fails_load() {
    let config_dir = TempDir::new().unwrap();
    let path = write_suite(config_dir.path());
    assert!(matches!(
        load_suite(&path, &HashMap::new()),
        Err(TaskConfigError::MissingVariable(name)) if name == "ROOT"
    ));
}

#[tokio::test]
async fn test_unknown_eval_type_fails_load() {
    let config_dir = TempDir::new().unwrap();
    let path = config_dir.path().join("task.json");
    fs::write(
        &path,
        json!({
            "task_id": "bad",
            "instruction": "i",
            "evals": [{"eval_type": "slack", "reference_answers": []}]
        })
        .to_string(),
    )
    .unwrap();
    assert!(matches!(
        load_suite(&path, &HashMap::new()),
        Err(TaskConfigError::Malformed { .. })
    ));
}

#[tokio::test]
async fn test_reset_then_evaluate_and_persist() {
    let playground = TempDir::new().unwrap();
    let records = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.jsonl");
    let task = json!({
        "task_id": "seeded",
        "instruction": "Keep notes.txt",
        "reset_actions": [
            {"mkdir": {"path": "${ROOT}/docs"}},
            {"create_file": {"path": "${ROOT}/docs/notes.txt", "content": "draft"}}
        ],
        "evals": [{
            "eval_type": "filesystem",
            "reference_answers": [
                {"content_check": {"docs/notes.txt": "draft"}},
                {"type_check": {"docs": "folder"}}
            ]
        }]
    });
    fs::write(&path, format!("{}\n\n", task)).unwrap();

    let suite = load_suite(&path, &vars(playground.path())).unwrap();
    let config = StudioConfig::default().with_filesystem_root(playground.path());
    let connectors = ConnectorSet::for_tasks(&config, &suite.tasks).unwrap();

    let comb = evaluator_router(&suite.tasks[0], &connectors).unwrap();
    assert!(comb.reset().await);
    let report = comb.evaluate().await;
    assert_eq!(report.score, 1.0);

    let store = ResultStore::new(records.path(), "results.jsonl");
    let result = TaskResult::new(&suite.tasks[0], json!([])).with_report(&report);
    store.export(&result).await.unwrap();

    let loaded = store.load(0, None).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].task_id, "seeded");
    assert_eq!(loaded[0].score, result.score);
    assert_eq!(loaded[0].feedback, result.feedback);
}
