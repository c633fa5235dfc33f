//! Connectors binding evaluators to live external systems.
//!
//! - [`FilesystemConnector`]: direct OS file operations
//! - [`GoogleCalendarService`]: Calendar v3 over [`GoogleClient`]
//! - [`GmailService`]: Gmail v1 over [`GoogleClient`]
//!
//! Calendar and mail access go through the [`CalendarApi`] and [`MailApi`]
//! traits so evaluators can be exercised against in-memory fakes.

pub mod calendar;
pub mod filesystem;
pub mod gmail;
pub mod google;

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

pub use calendar::{CalendarApi, GoogleCalendarService};
pub use filesystem::{FileStat, FilesystemConnector};
pub use gmail::{GmailService, MailApi, MailFolder, MailMessage};
pub use google::GoogleClient;

use crate::config::StudioConfig;
use crate::error::ConnectorError;
use crate::task::{EvalKind, TaskConfig};

/// Common surface of every connector.
pub trait Connector: Send + Sync {
    /// The environment this connector serves.
    fn kind(&self) -> EvalKind;

    /// Settings the connector reports to the evaluators built on it.
    fn env_settings(&self) -> Map<String, Value>;
}

/// The live connectors available to one evaluation run, keyed by environment.
#[derive(Clone, Default)]
pub struct ConnectorSet {
    pub filesystem: Option<FilesystemConnector>,
    pub calendar: Option<Arc<dyn CalendarApi>>,
    pub gmail: Option<Arc<dyn MailApi>>,
}

impl std::fmt::Debug for ConnectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorSet")
            .field("filesystem", &self.filesystem)
            .field("calendar", &self.calendar.is_some())
            .field("gmail", &self.gmail.is_some())
            .finish()
    }
}

impl ConnectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filesystem(mut self, connector: FilesystemConnector) -> Self {
        self.filesystem = Some(connector);
        self
    }

    pub fn with_calendar(mut self, connector: Arc<dyn CalendarApi>) -> Self {
        self.calendar = Some(connector);
        self
    }

    pub fn with_gmail(mut self, connector: Arc<dyn MailApi>) -> Self {
        self.gmail = Some(connector);
        self
    }

    /// Builds the connectors the given tasks need. Google connectors are only
    /// created (and a token only required) when a task touches them.
    pub fn for_tasks(config: &StudioConfig, tasks: &[TaskConfig]) -> Result<Self, ConnectorError> {
        let needs = |kind: EvalKind| {
            tasks.iter().any(|t| {
                t.evals.iter().any(|e| e.kind() == kind)
                    || t.reset_actions.iter().any(|a| a.environment() == kind)
            })
        };

        let mut set =
            Self::new().with_filesystem(FilesystemConnector::new(config.filesystem_root.clone()));

        let needs_calendar = needs(EvalKind::GoogleCalendar);
        let needs_gmail = needs(EvalKind::Gmail);
        if needs_calendar || needs_gmail {
            let client =
                GoogleClient::from_token_file(&config.google_token_path, config.request_timeout)?;
            if needs_calendar {
                set = set.with_calendar(Arc::new(GoogleCalendarService::new(
                    client.clone(),
                    config.calendar_api_base.clone(),
                    config.google_calendar_id.clone(),
                )));
            }
            if needs_gmail {
                set = set.with_gmail(Arc::new(GmailService::new(
                    client,
                    config.gmail_api_base.clone(),
                    config.gmail_recipient.clone(),
                )));
            }
        }

        info!(
            "Initialized connectors: {:?}",
            set.kinds().iter().map(EvalKind::as_str).collect::<Vec<_>>()
        );
        Ok(set)
    }

    /// Whether a connector is registered for `kind`.
    pub fn has(&self, kind: EvalKind) -> bool {
        match kind {
            EvalKind::Filesystem => self.filesystem.is_some(),
            EvalKind::GoogleCalendar => self.calendar.is_some(),
            EvalKind::Gmail => self.gmail.is_some(),
        }
    }

    /// Registered environments.
    pub fn kinds(&self) -> Vec<EvalKind> {
        [EvalKind::Filesystem, EvalKind::GoogleCalendar, EvalKind::Gmail]
            .into_iter()
            .filter(|k| self.has(*k))
            .collect()
    }

    /// Settings reported by the connector for `kind`, if registered.
    pub fn env_settings(&self, kind: EvalKind) -> Option<Map<String, Value>> {
        match kind {
            EvalKind::Filesystem => self.filesystem.as_ref().map(|c| c.env_settings()),
            EvalKind::GoogleCalendar => self.calendar.as_ref().map(|c| c.env_settings()),
            EvalKind::Gmail => self.gmail.as_ref().map(|c| c.env_settings()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn fs_task() -> TaskConfig {
        serde_json::from_value(json!({
            "task_id": "t",
            "instruction": "i",
            "evals": [{"eval_type": "filesystem", "reference_answers": []}]
        }))
        .unwrap()
    }

    #[test]
    fn test_for_tasks_skips_google_when_unused() {
        let config = StudioConfig::new()
            .with_filesystem_root("/data")
            .with_google_token_path("/nonexistent/token.json");
        let set = ConnectorSet::for_tasks(&config, &[fs_task()]).unwrap();
        assert_eq!(set.kinds(), vec![EvalKind::Filesystem]);
        assert_eq!(
            set.env_settings(EvalKind::Filesystem).unwrap()["root"],
            "/data"
        );
        assert!(set.env_settings(EvalKind::Gmail).is_none());
    }

    #[test]
    fn test_empty_set_has_nothing() {
        let set = ConnectorSet::new();
        assert!(set.kinds().is_empty());
        let set = set.with_filesystem(FilesystemConnector::new(Some(PathBuf::from("/x"))));
        assert!(set.has(EvalKind::Filesystem));
        assert!(!set.has(EvalKind::GoogleCalendar));
    }
}
