//! Google Calendar evaluator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use super::{CheckResult, EvaluationReport, Evaluator};
use crate::connectors::CalendarApi;
use crate::error::EvalError;
use crate::task::{CalendarAction, CalendarCheck, EvalKind};

pub struct CalendarEvaluator {
    calendar: Arc<dyn CalendarApi>,
    checks: Vec<CalendarCheck>,
    reset_actions: Vec<CalendarAction>,
}

impl CalendarEvaluator {
    pub fn new(
        calendar: Arc<dyn CalendarApi>,
        checks: Vec<CalendarCheck>,
        reset_actions: Vec<CalendarAction>,
    ) -> Self {
        Self {
            calendar,
            checks,
            reset_actions,
        }
    }

    async fn apply(&self, action: &CalendarAction) -> Result<(), EvalError> {
        match action {
            CalendarAction::CreateEvent(spec) => {
                self.calendar.insert_event(spec).await?;
            }
            CalendarAction::DeleteEvent { event } => {
                for found in self.calendar.search_events_by_info(event).await? {
                    if let Some(id) = found.get("id").and_then(Value::as_str) {
                        self.calendar.delete_event(id).await?;
                    }
                }
            }
            CalendarAction::ClearCalendar {} => self.calendar.clear_calendar().await?,
        }
        Ok(())
    }

    async fn run(&self, report: &mut EvaluationReport) -> Result<(), EvalError> {
        for check in &self.checks {
            match check {
                CalendarCheck::CheckEventExists { event, exists } => {
                    let found = !self.calendar.search_events_by_info(event).await?.is_empty();
                    report.record(CheckResult::from_bool(
                        found == *exists,
                        "check_event_exists",
                        Value::Object(event.clone()).to_string(),
                        || format!("event existence should be {}", exists),
                    ));
                }
                CalendarCheck::CheckEventCount {
                    start_time,
                    end_time,
                    count,
                } => {
                    let actual = self
                        .calendar
                        .search_events_by_time_range(start_time, end_time)
                        .await?
                        .len();
                    report.record(CheckResult::from_bool(
                        actual == *count,
                        "check_event_count",
                        format!("{} .. {}", start_time, end_time),
                        || format!("expected {} events, found {}", count, actual),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Evaluator for CalendarEvaluator {
    fn kind(&self) -> EvalKind {
        EvalKind::GoogleCalendar
    }

    async fn reset(&self) -> bool {
        for action in &self.reset_actions {
            if let Err(e) = self.apply(action).await {
                error!("Calendar reset action {:?} failed: {}", action, e);
                return false;
            }
        }
        true
    }

    async fn evaluate(&self) -> EvaluationReport {
        let mut report = EvaluationReport::new();
        if let Err(e) = self.run(&mut report).await {
            error!("An error occurred in Google Calendar env: {}", e);
            report.abort(e);
        }
        info!("Google Calendar evaluation score: {}", report.score);
        report
    }
}
