//! Runtime configuration for agent-studio.
//!
//! A single [`StudioConfig`] value is built once (defaults, then environment,
//! then CLI overrides) and handed to every component that needs it.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration shared by the evaluators, connectors and the task session.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    // Control plane
    /// Address of the remote environment server.
    pub env_server_addr: String,
    /// Port of the remote environment server.
    pub env_server_port: u16,
    /// Delay between two `/task/status` polls.
    pub poll_interval: Duration,
    /// Maximum time to wait for a remote task to reach `finished`.
    pub poll_timeout: Duration,
    /// Maximum time to wait for the user to answer a prompt.
    pub input_timeout: Duration,
    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
    /// Whether remote `wait_for_input` prompts and agent actions need a human.
    pub need_human_confirmation: bool,
    /// Maximum number of agent steps per task.
    pub max_step: usize,

    // Results
    /// Directory where results and per-task media are written.
    pub record_path: PathBuf,
    /// Name of the JSONL results log inside `record_path`.
    pub results_file: String,

    // Google
    /// Path of the OAuth token file used by the Google connectors.
    pub google_token_path: PathBuf,
    /// Calendar the calendar evaluator operates on.
    pub google_calendar_id: String,
    /// Recipient used when a gmail reset action names none.
    pub gmail_recipient: String,
    /// Base URL of the Google Calendar v3 API.
    pub calendar_api_base: String,
    /// Base URL of the Gmail v1 API.
    pub gmail_api_base: String,

    // Filesystem
    /// Root against which relative filesystem paths are resolved.
    pub filesystem_root: Option<PathBuf>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            env_server_addr: "127.0.0.1".to_string(),
            env_server_port: 8000,
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(600),
            input_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            need_human_confirmation: true,
            max_step: 30,

            record_path: PathBuf::from("playground_data/trajectories"),
            results_file: "results.jsonl".to_string(),

            google_token_path: PathBuf::from("config/google_token.json"),
            google_calendar_id: "primary".to_string(),
            gmail_recipient: "gduser1@workspacesamples.dev".to_string(),
            calendar_api_base: "https://www.googleapis.com/calendar/v3".to_string(),
            gmail_api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),

            filesystem_root: None,
        }
    }
}

impl StudioConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `STUDIO_ENV_SERVER_ADDR`: control plane address (default: 127.0.0.1)
    /// - `STUDIO_ENV_SERVER_PORT`: control plane port (default: 8000)
    /// - `STUDIO_POLL_INTERVAL_MS`: status poll interval (default: 1000)
    /// - `STUDIO_POLL_TIMEOUT_SECS`: remote task timeout (default: 600)
    /// - `STUDIO_INPUT_TIMEOUT_SECS`: user input timeout (default: 300)
    /// - `STUDIO_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
    /// - `STUDIO_NEED_HUMAN_CONFIRMATION`: require a human (default: true)
    /// - `STUDIO_MAX_STEP`: maximum agent steps (default: 30)
    /// - `STUDIO_RECORD_PATH`: results directory
    /// - `STUDIO_RESULTS_FILE`: results log name (default: results.jsonl)
    /// - `STUDIO_GOOGLE_TOKEN_PATH`: Google OAuth token file
    /// - `STUDIO_GOOGLE_CALENDAR_ID`: calendar id (default: primary)
    /// - `STUDIO_GMAIL_RECIPIENT`: default gmail recipient
    /// - `STUDIO_CALENDAR_API_BASE` / `STUDIO_GMAIL_API_BASE`: API base URLs
    /// - `STUDIO_FILESYSTEM_ROOT`: root for relative filesystem paths
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("STUDIO_ENV_SERVER_ADDR") {
            config.env_server_addr = val;
        }

        if let Ok(val) = std::env::var("STUDIO_ENV_SERVER_PORT") {
            config.env_server_port = parse_env_value(&val, "STUDIO_ENV_SERVER_PORT")?;
        }

        if let Ok(val) = std::env::var("STUDIO_POLL_INTERVAL_MS") {
            let ms: u64 = parse_env_value(&val, "STUDIO_POLL_INTERVAL_MS")?;
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("STUDIO_POLL_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "STUDIO_POLL_TIMEOUT_SECS")?;
            config.poll_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("STUDIO_INPUT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "STUDIO_INPUT_TIMEOUT_SECS")?;
            config.input_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("STUDIO_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "STUDIO_REQUEST_TIMEOUT_SECS")?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("STUDIO_NEED_HUMAN_CONFIRMATION") {
            config.need_human_confirmation =
                parse_env_bool(&val, "STUDIO_NEED_HUMAN_CONFIRMATION")?;
        }

        if let Ok(val) = std::env::var("STUDIO_MAX_STEP") {
            config.max_step = parse_env_value(&val, "STUDIO_MAX_STEP")?;
        }

        if let Ok(val) = std::env::var("STUDIO_RECORD_PATH") {
            config.record_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("STUDIO_RESULTS_FILE") {
            config.results_file = val;
        }

        if let Ok(val) = std::env::var("STUDIO_GOOGLE_TOKEN_PATH") {
            config.google_token_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("STUDIO_GOOGLE_CALENDAR_ID") {
            config.google_calendar_id = val;
        }

        if let Ok(val) = std::env::var("STUDIO_GMAIL_RECIPIENT") {
            config.gmail_recipient = val;
        }

        if let Ok(val) = std::env::var("STUDIO_CALENDAR_API_BASE") {
            config.calendar_api_base = val;
        }

        if let Ok(val) = std::env::var("STUDIO_GMAIL_API_BASE") {
            config.gmail_api_base = val;
        }

        if let Ok(val) = std::env::var("STUDIO_FILESYSTEM_ROOT") {
            config.filesystem_root = Some(PathBuf::from(val));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.env_server_addr.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "env_server_addr cannot be empty".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.poll_timeout < self.poll_interval {
            return Err(ConfigError::ValidationFailed(
                "poll_timeout must be at least poll_interval".to_string(),
            ));
        }

        if self.input_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "input_timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_step == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_step must be greater than 0".to_string(),
            ));
        }

        if self.results_file.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "results_file cannot be empty".to_string(),
            ));
        }

        if self.google_calendar_id.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "google_calendar_id cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Base URL of the remote control plane.
    pub fn control_plane_url(&self) -> String {
        format!("http://{}:{}", self.env_server_addr, self.env_server_port)
    }

    /// Path of the JSONL results log.
    pub fn results_path(&self) -> PathBuf {
        self.record_path.join(&self.results_file)
    }

    /// Builder method to set the control plane address and port.
    pub fn with_env_server(mut self, addr: impl Into<String>, port: u16) -> Self {
        self.env_server_addr = addr.into();
        self.env_server_port = port;
        self
    }

    /// Builder method to set the status poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the remote task timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Builder method to set the user input timeout.
    pub fn with_input_timeout(mut self, timeout: Duration) -> Self {
        self.input_timeout = timeout;
        self
    }

    /// Builder method to enable or disable human confirmation.
    pub fn with_human_confirmation(mut self, enabled: bool) -> Self {
        self.need_human_confirmation = enabled;
        self
    }

    /// Builder method to set the maximum number of agent steps.
    pub fn with_max_step(mut self, max: usize) -> Self {
        self.max_step = max;
        self
    }

    /// Builder method to set the results directory.
    pub fn with_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = path.into();
        self
    }

    /// Builder method to set the Google token file.
    pub fn with_google_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.google_token_path = path.into();
        self
    }

    /// Builder method to set the filesystem root.
    pub fn with_filesystem_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.filesystem_root = Some(root.into());
        self
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parses a boolean environment variable value.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", value),
        }),
    }
}
