//! Google Calendar connector.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::google::GoogleClient;
use super::Connector;
use crate::error::ConnectorError;
use crate::eval::matching::event_match_left;
use crate::task::{EvalKind, EventSpec};

/// Calendar operations used by the calendar evaluator, bound to one calendar.
#[async_trait]
pub trait CalendarApi: Connector {
    /// Lists every event of the calendar.
    async fn list_events(&self) -> Result<Vec<Value>, ConnectorError>;

    /// Lists single events overlapping `[start_time, end_time)`.
    async fn search_events_by_time_range(
        &self,
        start_time: &str,
        end_time: &str,
    ) -> Result<Vec<Value>, ConnectorError>;

    async fn insert_event(&self, spec: &EventSpec) -> Result<Value, ConnectorError>;

    async fn delete_event(&self, event_id: &str) -> Result<(), ConnectorError>;

    /// Events whose fields match every comparable field of `reference`.
    async fn search_events_by_info(
        &self,
        reference: &Map<String, Value>,
    ) -> Result<Vec<Value>, ConnectorError> {
        let events = self.list_events().await?;
        Ok(events
            .into_iter()
            .filter(|event| event_match_left(reference, event))
            .collect())
    }

    /// Deletes every event of the calendar.
    async fn clear_calendar(&self) -> Result<(), ConnectorError> {
        for event in self.list_events().await? {
            if let Some(id) = event.get("id").and_then(Value::as_str) {
                self.delete_event(id).await?;
            }
        }
        Ok(())
    }
}

/// Builds the request body for an event insert.
pub fn event_body(spec: &EventSpec) -> Value {
    let attendees: Vec<Value> = spec
        .attendees
        .iter()
        .map(|email| json!({"email": email}))
        .collect();
    json!({
        "summary": spec.summary,
        "location": spec.location,
        "description": spec.description,
        "start": {"dateTime": spec.start_time, "timeZone": spec.time_zone},
        "end": {"dateTime": spec.end_time, "timeZone": spec.time_zone},
        "attendees": attendees,
    })
}

/// Calendar v3 REST connector.
#[derive(Debug, Clone)]
pub struct GoogleCalendarService {
    client: GoogleClient,
    api_base: String,
    calendar_id: String,
}

impl GoogleCalendarService {
    pub fn new(
        client: GoogleClient,
        api_base: impl Into<String>,
        calendar_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            calendar_id: calendar_id.into(),
        }
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(&self.calendar_id)
        )
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(event_id))
    }

    /// Lists the calendars visible to the authenticated user.
    pub async fn list_calendars(&self) -> Result<Vec<Value>, ConnectorError> {
        let url = format!("{}/users/me/calendarList", self.api_base);
        self.client.list_all(&url, &[], "items").await
    }

    /// Creates a secondary calendar from a calendar resource body.
    pub async fn create_calendar(&self, calendar: &Value) -> Result<Value, ConnectorError> {
        let url = format!("{}/calendars", self.api_base);
        self.client.post_json(&url, calendar).await
    }

    pub async fn delete_calendar(&self, calendar_id: &str) -> Result<(), ConnectorError> {
        let url = format!(
            "{}/calendars/{}",
            self.api_base,
            urlencoding::encode(calendar_id)
        );
        self.client.delete(&url).await
    }

    pub async fn find_calendar_by_id(
        &self,
        calendar_id: &str,
    ) -> Result<Option<Value>, ConnectorError> {
        Ok(self
            .list_calendars()
            .await?
            .into_iter()
            .find(|c| c.get("id").and_then(Value::as_str) == Some(calendar_id)))
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Value, ConnectorError> {
        self.client.get_json(&self.event_url(event_id)).await
    }

    pub async fn update_event(
        &self,
        event_id: &str,
        event: &Value,
    ) -> Result<Value, ConnectorError> {
        self.client.put_json(&self.event_url(event_id), event).await
    }
}

impl Connector for GoogleCalendarService {
    fn kind(&self) -> EvalKind {
        EvalKind::GoogleCalendar
    }

    fn env_settings(&self) -> Map<String, Value> {
        let mut settings = Map::new();
        settings.insert("calendar_id".to_string(), json!(self.calendar_id));
        settings
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendarService {
    async fn list_events(&self) -> Result<Vec<Value>, ConnectorError> {
        self.client.list_all(&self.events_url(), &[], "items").await
    }

    async fn search_events_by_time_range(
        &self,
        start_time: &str,
        end_time: &str,
    ) -> Result<Vec<Value>, ConnectorError> {
        let params = [
            ("timeMin", start_time.to_string()),
            ("timeMax", end_time.to_string()),
            ("singleEvents", "true".to_string()),
        ];
        self.client.list_all(&self.events_url(), &params, "items").await
    }

    async fn insert_event(&self, spec: &EventSpec) -> Result<Value, ConnectorError> {
        let event = self
            .client
            .post_json(&self.events_url(), &event_body(spec))
            .await?;
        let event_id = event.get("id").and_then(Value::as_str).unwrap_or("?");
        info!("Created event {} in calendar {}", event_id, self.calendar_id);
        Ok(event)
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), ConnectorError> {
        debug!("Deleting event {} from calendar {}", event_id, self.calendar_id);
        self.client.delete(&self.event_url(event_id)).await
    }
}
