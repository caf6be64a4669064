use crate::domain::models::{CalendarSource, Event, EventStatus, parse_timestamp};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event record as handed over by the device calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub id: String,
    pub calendar_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub recurrence_rule: Option<String>,
}

#[async_trait]
pub trait DeviceCalendarSource: Send + Sync {
    async fn request_permission(&self) -> Result<bool, InfraError>;

    async fn list_calendars(&self) -> Result<Vec<CalendarSource>, InfraError>;

    async fn list_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, InfraError>;
}

/// Maps a device record onto the store's event shape. Records without an id
/// are not ours to track and yield `Ok(None)`.
pub fn normalize_raw_event(raw: &RawEvent) -> Result<Option<Event>, InfraError> {
    let id = raw.id.trim();
    if id.is_empty() {
        return Ok(None);
    }

    let start_time = parse_raw_timestamp(&raw.start_date, "startDate")?;
    let end_time = parse_raw_timestamp(&raw.end_date, "endDate")?;

    Ok(Some(Event {
        id: id.to_string(),
        calendar_id: raw.calendar_id.trim().to_string(),
        title: raw
            .title
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("(No title)")
            .to_string(),
        description: raw.notes.clone().unwrap_or_default(),
        start_time,
        end_time,
        is_all_day: raw.all_day,
        location_name: non_empty(raw.location.as_deref()),
        recurrence_rule: non_empty(raw.recurrence_rule.as_deref()),
        linked_task_id: None,
        status: EventStatus::Confirmed,
    }))
}

fn parse_raw_timestamp(value: &str, field_name: &str) -> Result<DateTime<Utc>, InfraError> {
    parse_timestamp(value).ok_or_else(|| {
        InfraError::Calendar(format!("invalid device event {field_name} '{value}'"))
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
