//! Wire types of the remote control plane.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ControlPlaneError;
use crate::task::TaskConfig;

/// Progress of the remote task, as reported by `GET /task/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Pending,
    InProgress,
    WaitForInput,
    Finished,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Pending => "pending",
            RemoteStatus::InProgress => "in_progress",
            RemoteStatus::WaitForInput => "wait_for_input",
            RemoteStatus::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RemoteStatus::Pending),
            "in_progress" => Some(RemoteStatus::InProgress),
            "wait_for_input" => Some(RemoteStatus::WaitForInput),
            "finished" => Some(RemoteStatus::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plain acknowledgement envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
    #[serde(default)]
    pub message: Option<Value>,
}

/// Body of `GET /task/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    /// Prompt text when the remote waits for input.
    #[serde(default)]
    pub content: Option<String>,
}

impl StatusResponse {
    /// Parses the status field; unknown values are protocol errors.
    pub fn remote_status(&self) -> Result<RemoteStatus, ControlPlaneError> {
        RemoteStatus::parse(&self.status).ok_or_else(|| ControlPlaneError::UnexpectedStatus {
            endpoint: "/task/status".to_string(),
            expected: "pending|in_progress|wait_for_input|finished".to_string(),
            actual: self.status.clone(),
        })
    }
}

/// Body of `GET /task/result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultResponse {
    pub status: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub message: Option<Value>,
}

/// Score and feedback computed by the remote evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvaluation {
    pub score: f64,
    #[serde(default)]
    pub feedback: String,
}

impl ResultResponse {
    /// Checks that a reset finished successfully.
    pub fn into_reset_outcome(self) -> Result<(), ControlPlaneError> {
        if self.status != RemoteStatus::Finished.as_str() {
            return Err(unexpected("/task/result", "finished", &self.status));
        }
        match self.result.as_deref() {
            Some("success") => Ok(()),
            other => Err(ControlPlaneError::TaskFailed(format!(
                "reset ended with result '{}'{}",
                other.unwrap_or("none"),
                self.message
                    .as_ref()
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            ))),
        }
    }

    /// Extracts the `{score, feedback}` object of a finished evaluation.
    pub fn into_evaluation(self) -> Result<RemoteEvaluation, ControlPlaneError> {
        if self.status != RemoteStatus::Finished.as_str() {
            return Err(unexpected("/task/result", "finished", &self.status));
        }
        match self.message {
            Some(message @ Value::Object(_)) => {
                serde_json::from_value(message).map_err(|e| ControlPlaneError::ParseError {
                    endpoint: "/task/result".to_string(),
                    message: e.to_string(),
                })
            }
            other => Err(ControlPlaneError::ParseError {
                endpoint: "/task/result".to_string(),
                message: format!("expected an evaluation object, got {:?}", other),
            }),
        }
    }
}

/// Body of `POST /task/reset` and `POST /task/eval`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRequest<'a> {
    pub task_config: &'a TaskConfig,
}

/// Body of `POST /task/confirm`.
#[derive(Debug, Clone, Serialize)]
pub struct TextRequest<'a> {
    pub message: &'a str,
}

pub(crate) fn unexpected(endpoint: &str, expected: &str, actual: &str) -> ControlPlaneError {
    ControlPlaneError::UnexpectedStatus {
        endpoint: endpoint.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parsing() {
        let response: StatusResponse = serde_json::from_value(json!({
            "status": "wait_for_input",
            "content": "Proceed?"
        }))
        .unwrap();
        assert_eq!(response.remote_status().unwrap(), RemoteStatus::WaitForInput);

        let unknown = StatusResponse {
            status: "exploded".to_string(),
            content: None,
        };
        assert!(matches!(
            unknown.remote_status(),
            Err(ControlPlaneError::UnexpectedStatus { actual, .. }) if actual == "exploded"
        ));
    }

    #[test]
    fn test_evaluation_requires_object() {
        let ok = ResultResponse {
            status: "finished".to_string(),
            result: None,
            message: Some(json!({"score": 1.0, "feedback": "good"})),
        };
        assert_eq!(
            ok.into_evaluation().unwrap(),
            RemoteEvaluation {
                score: 1.0,
                feedback: "good".to_string()
            }
        );

        let text = ResultResponse {
            status: "finished".to_string(),
            result: Some("success".to_string()),
            message: Some(json!("done")),
        };
        assert!(matches!(text.into_evaluation(), Err(ControlPlaneError::ParseError { .. })));
    }

    #[test]
    fn test_reset_outcome() {
        let failed = ResultResponse {
            status: "finished".to_string(),
            result: Some("failure".to_string()),
            message: Some(json!("disk full")),
        };
        assert!(matches!(failed.into_reset_outcome(), Err(ControlPlaneError::TaskFailed(_))));

        let pending = ResultResponse {
            status: "pending".to_string(),
            result: None,
            message: None,
        };
        assert!(matches!(
            pending.into_reset_outcome(),
            Err(ControlPlaneError::UnexpectedStatus { .. })
        ));
    }
}
