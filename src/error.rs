//! Error types for agent-studio operations.
//!
//! Defines error types for each major subsystem:
//! - Task configuration loading and validation
//! - Evaluator construction and execution
//! - Connectors to external systems (filesystem, Google APIs)
//! - The remote control plane
//! - Result persistence
//! - Task session orchestration

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or validating task configurations.
///
/// These are fatal: a task that fails to load is never evaluated.
#[derive(Debug, Error)]
pub enum TaskConfigError {
    #[error("Failed to read task config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed task config '{path}': {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Variable '{0}' not found in environment variables")]
    MissingVariable(String),

    #[error("No connector registered for environment '{0}'")]
    MissingConnector(String),

    #[error("Task suite has no tasks or a zero total weight")]
    EmptySuite,

    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while an evaluator executes its steps or checks.
///
/// These never escape an evaluator: they are logged and turned into a
/// score of 0.0.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Filesystem error on '{path}': {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid file mode '{0}'")]
    InvalidMode(String),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),
}

/// Errors from connectors to external systems.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Missing Google access token: set GOOGLE_ACCESS_TOKEN or provide a token file")]
    MissingToken,

    #[error("Failed to read token file '{path}': {message}")]
    TokenFile { path: PathBuf, message: String },

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error("Message is missing header '{0}'")]
    MissingHeader(String),

    #[error("Failed to decode message body: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the remote control plane.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("HTTP request to {endpoint} failed: {message}")]
    RequestFailed { endpoint: String, message: String },

    #[error("{endpoint} returned HTTP {code}: {body}")]
    HttpStatus {
        endpoint: String,
        code: u16,
        body: String,
    },

    #[error("{endpoint} returned unexpected status '{actual}', expected '{expected}'")]
    UnexpectedStatus {
        endpoint: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to parse response from {endpoint}: {message}")]
    ParseError { endpoint: String, message: String },

    #[error("Remote task did not finish: {0}")]
    TaskFailed(String),
}

/// Errors from result persistence.
#[derive(Debug, Error)]
pub enum ResultStoreError {
    #[error("start_idx ({start}) must be less or equal to end_idx ({end})")]
    InvalidRange { start: usize, end: usize },

    #[error("Task id '{0}' cannot name a media directory")]
    InvalidTaskId(String),

    #[error("Unsupported embedded media: {0}")]
    UnsupportedMedia(String),

    #[error("Failed to decode embedded image: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Malformed record on line {line}: {message}")]
    MalformedRecord { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that end a task session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Timed out after {0:?} while {1}")]
    Timeout(Duration, String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Input channel closed")]
    InputClosed,

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("Result store error: {0}")]
    Results(#[from] ResultStoreError),
}
