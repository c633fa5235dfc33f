//! Field comparison rules shared by the match-based evaluators.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;
use serde_json::{Map, Value};

use crate::connectors::MailMessage;
use crate::error::EvalError;
use crate::task::MessageInfo;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parses an ISO 8601 timestamp. Timestamps without an offset are taken to
/// be in local time.
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, EvalError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed);
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| EvalError::InvalidTimestamp(value.to_string()))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| EvalError::InvalidTimestamp(value.to_string()))
}

/// Whether two timestamps denote the same instant.
pub fn match_time(reference: &str, actual: &str) -> bool {
    match (parse_timestamp(reference), parse_timestamp(actual)) {
        (Ok(r), Ok(a)) => r == a,
        _ => false,
    }
}

/// Whether `event` matches every comparable field of `reference`.
///
/// `summary`, `description` and `location` must be equal; `start` and `end`
/// compare their `dateTime` as instants. Other reference keys are ignored.
pub fn event_match_left(reference: &Map<String, Value>, event: &Value) -> bool {
    reference.iter().all(|(key, expected)| match key.as_str() {
        "summary" | "description" | "location" => {
            event.get(key).unwrap_or(&Value::Null) == expected
        }
        "start" | "end" => {
            let expected_time = expected.get("dateTime").and_then(Value::as_str);
            let actual_time = event
                .get(key)
                .and_then(|v| v.get("dateTime"))
                .and_then(Value::as_str);
            match (expected_time, actual_time) {
                (Some(r), Some(a)) => match_time(r, a),
                _ => false,
            }
        }
        _ => true,
    })
}

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w\.-]+@[\w\.-]+").expect("valid e-mail pattern"));

/// First e-mail address found in `text`.
pub fn extract_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}

/// Whether `message` matches every field set in `reference`.
pub fn message_match(message: &MailMessage, reference: &MessageInfo) -> bool {
    if let Some(recipient) = &reference.recipient {
        if extract_email(&message.recipient) != extract_email(recipient) {
            return false;
        }
    }
    if let Some(body) = &reference.body {
        if message.body.trim() != body.trim() {
            return false;
        }
    }
    if let Some(subject) = &reference.subject {
        if &message.subject != subject {
            return false;
        }
    }
    if reference.attachment.is_some() && message.attachment != reference.attachment {
        return false;
    }
    if reference.cc.is_some() && message.cc != reference.cc {
        return false;
    }
    true
}
