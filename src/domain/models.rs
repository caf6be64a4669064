use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const BUCKET_KEY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub calendar_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    /// Kept verbatim; occurrences are never expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_task_id: Option<String>,
    #[serde(default)]
    pub status: EventStatus,
}

impl Event {
    /// Checks the structural fields. `end_time > start_time` is reported here
    /// but the stores accept events that fail it.
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "event.id")?;
        validate_non_empty(&self.calendar_id, "event.calendar_id")?;
        if self.end_time <= self.start_time {
            return Err("event.end_time must be after event.start_time".to_string());
        }
        Ok(())
    }

    pub fn bucket_key(&self, tz: Tz) -> String {
        bucket_key(self.start_time, tz)
    }

    /// Length in minutes, with seconds kept as a fraction.
    pub fn duration_minutes(&self) -> f64 {
        (self.end_time - self.start_time).num_seconds() as f64 / 60.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSource {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub is_device: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Active,
    Completed,
    Migrated,
    Cancelled,
}

/// Declared low to high so that `Priority::P1 > Priority::P3`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    None,
    P3,
    P2,
    P1,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnergyLevel {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub energy_level: EnergyLevel,
    /// `None` means the task sits in the inbox.
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub context_tags: Vec<String>,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        match (self.status, self.completed_at) {
            (TaskStatus::Completed, None) => {
                Err("task.completed_at must be set when status is completed".to_string())
            }
            (status, Some(_)) if status != TaskStatus::Completed => {
                Err("task.completed_at must be empty unless status is completed".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.context_tags
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: String,
    pub title: String,
    pub current_progress: u32,
    pub target: u32,
    pub streak: u32,
    /// Bucket keys of the days the habit was completed.
    #[serde(default)]
    pub history: BTreeSet<String>,
}

impl Habit {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "habit.id")?;
        validate_non_empty(&self.title, "habit.title")?;
        if self.target == 0 {
            return Err("habit.target must be > 0".to_string());
        }
        for key in &self.history {
            validate_date(key, "habit.history[]")?;
        }
        Ok(())
    }

    pub fn is_target_reached(&self) -> bool {
        self.current_progress >= self.target
    }
}

/// Derived render projection; never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaidOutEvent {
    pub event: Event,
    pub column_index: usize,
    pub column_count: usize,
    pub top: f64,
    pub height: f64,
    /// Horizontal offset as a percentage of the day column width.
    pub left: f64,
    /// Width as a percentage of the day column width.
    pub width: f64,
}

pub fn bucket_key(timestamp: DateTime<Utc>, tz: Tz) -> String {
    date_key(timestamp.with_timezone(&tz).date_naive())
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(BUCKET_KEY_FORMAT).to_string()
}

pub fn parse_date_key(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, BUCKET_KEY_FORMAT).ok()
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    parse_hhmm(value)
        .map(|_| ())
        .ok_or_else(|| format!("{field_name} must be HH:MM"))
}

pub(crate) fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    parse_date_key(value)
        .map(|_| ())
        .ok_or_else(|| format!("{field_name} must be YYYY-MM-DD"))
}

pub(crate) fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let (hour, minute) = value.trim().split_once(':')?;
    if minute.contains(':') {
        return None;
    }
    let hour = hour.parse::<u32>().ok()?;
    let minute = minute.parse::<u32>().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}
