//! Loading task configurations from disk.
//!
//! Accepted inputs:
//! - a JSON suite `{"tasks": [...], "score_weight": ...}`
//! - a single JSON task object
//! - a JSONL file with one task object per line
//! - a directory, walked recursively for `.json` and `.jsonl` files

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use super::types::{TaskConfig, TaskSuite};
use crate::error::TaskConfigError;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}").expect("valid placeholder pattern"));

/// Loads a task suite from a file or directory, substituting `${VAR}`
/// placeholders from `vars` before parsing.
pub fn load_suite(
    path: &Path,
    vars: &HashMap<String, String>,
) -> Result<TaskSuite, TaskConfigError> {
    let suite = if path.is_dir() {
        let mut tasks = Vec::new();
        let mut files: Vec<_> = WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("json") | Some("jsonl")
                )
            })
            .collect();
        files.sort();

        for file in files {
            tasks.extend(load_file(&file, vars)?.tasks);
        }
        TaskSuite::from_tasks(tasks)
    } else {
        load_file(path, vars)?
    };

    check_suite(&suite, path)?;
    debug!("Loaded {} tasks from {}", suite.tasks.len(), path.display());
    Ok(suite)
}

/// Loads every task of a file or directory, ignoring suite weights.
pub fn load_tasks(
    path: &Path,
    vars: &HashMap<String, String>,
) -> Result<Vec<TaskConfig>, TaskConfigError> {
    Ok(load_suite(path, vars)?.tasks)
}

fn load_file(path: &Path, vars: &HashMap<String, String>) -> Result<TaskSuite, TaskConfigError> {
    let content = fs::read_to_string(path).map_err(|source| TaskConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        let mut tasks = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line).map_err(|e| TaskConfigError::Malformed {
                path: path.to_path_buf(),
                message: format!("line {}: {}", idx + 1, e),
            })?;
            tasks.push(parse_task(apply_env_vars(value, vars)?, path)?);
        }
        return Ok(TaskSuite::from_tasks(tasks));
    }

    let value: Value = serde_json::from_str(&content).map_err(|e| TaskConfigError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_document(apply_env_vars(value, vars)?, path)
}

/// Parses either a suite object or a single task object.
fn parse_document(value: Value, path: &Path) -> Result<TaskSuite, TaskConfigError> {
    if value.get("tasks").is_some() {
        serde_json::from_value(value).map_err(|e| TaskConfigError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    } else {
        Ok(TaskSuite::from_tasks(vec![parse_task(value, path)?]))
    }
}

fn parse_task(value: Value, path: &Path) -> Result<TaskConfig, TaskConfigError> {
    serde_json::from_value(value).map_err(|e| TaskConfigError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn check_suite(suite: &TaskSuite, path: &Path) -> Result<(), TaskConfigError> {
    for task in &suite.tasks {
        task.validate().map_err(|message| TaskConfigError::Malformed {
            path: path.to_path_buf(),
            message,
        })?;
    }
    if !suite.score_weight.is_finite() {
        return Err(TaskConfigError::Malformed {
            path: path.to_path_buf(),
            message: format!("invalid score_weight {}", suite.score_weight),
        });
    }
    Ok(())
}

/// Replaces `${NAME}` placeholders in every string of a JSON document.
///
/// Fails on the first placeholder with no entry in `vars`.
pub fn apply_env_vars(
    value: Value,
    vars: &HashMap<String, String>,
) -> Result<Value, TaskConfigError> {
    replace_placeholders(value, vars, &PLACEHOLDER_RE)
}

fn replace_placeholders(
    value: Value,
    vars: &HashMap<String, String>,
    pattern: &Regex,
) -> Result<Value, TaskConfigError> {
    match value {
        Value::String(text) => {
            if let Some(missing) = pattern
                .captures_iter(&text)
                .map(|c| c[1].to_string())
                .find(|name| !vars.contains_key(name))
            {
                return Err(TaskConfigError::MissingVariable(missing));
            }
            let replaced = pattern.replace_all(&text, |caps: &Captures| {
                vars.get(&caps[1]).cloned().unwrap_or_default()
            });
            Ok(Value::String(replaced.into_owned()))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| replace_placeholders(item, vars, pattern))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| Ok((k, replace_placeholders(v, vars, pattern)?)))
            .collect::<Result<serde_json::Map<_, _>, TaskConfigError>>()
            .map(Value::Object),
        other => Ok(other),
    }
}

/// Parses `KEY=VALUE` pairs into a variable map.
pub fn parse_var_assignments(pairs: &[String]) -> Result<HashMap<String, String>, TaskConfigError> {
    let mut vars = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| TaskConfigError::MissingVariable(pair.clone()))?;
        vars.insert(key.trim().to_string(), value.to_string());
    }
    Ok(vars)
}
