use crate::domain::models::{Event, parse_hhmm, validate_hhmm};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Daily span, in local wall-clock time, in which free slots may be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for WorkingWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).expect("valid fixed time"),
            end: NaiveTime::from_hms_opt(22, 0, 0).expect("valid fixed time"),
        }
    }
}

/// `HH:MM` form used by the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkingWindowSpec {
    pub start: String,
    pub end: String,
}

impl Default for WorkingWindowSpec {
    fn default() -> Self {
        Self {
            start: "08:00".to_string(),
            end: "22:00".to_string(),
        }
    }
}

impl WorkingWindowSpec {
    pub fn validate(&self) -> Result<(), String> {
        validate_hhmm(&self.start, "workingWindow.start")?;
        validate_hhmm(&self.end, "workingWindow.end")?;
        self.resolve().map(|_| ())
    }

    pub fn resolve(&self) -> Result<WorkingWindow, String> {
        let start = parse_hhmm(&self.start).ok_or("workingWindow.start must be HH:MM")?;
        let end = parse_hhmm(&self.end).ok_or("workingWindow.end must be HH:MM")?;
        if end <= start {
            return Err("workingWindow.end must be after workingWindow.start".to_string());
        }
        Ok(WorkingWindow { start, end })
    }
}

impl WorkingWindow {
    pub fn bounds_on(&self, day: NaiveDate, tz: Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let open = local_to_utc(day, self.start, tz)?;
        let close = local_to_utc(day, self.end, tz)?;
        Some((open, close))
    }
}

/// Returns the start of the earliest gap of at least `duration_minutes` inside
/// the working window, or `None` when the day has no such gap.
///
/// The searched day is the local date of the earliest event. With no events it
/// falls back to `today`, whatever day the caller had in mind.
pub fn find_slot(
    duration_minutes: u32,
    day_events: &[Event],
    window: WorkingWindow,
    tz: Tz,
    today: NaiveDate,
) -> Option<DateTime<Utc>> {
    let mut sorted: Vec<&Event> = day_events.iter().collect();
    sorted.sort_by_key(|event| event.start_time);

    let reference_day = sorted
        .first()
        .map(|event| event.start_time.with_timezone(&tz).date_naive())
        .unwrap_or(today);
    let Some((window_open, window_close)) = window.bounds_on(reference_day, tz) else {
        tracing::warn!(day = %reference_day, "working window does not exist on this day");
        return None;
    };
    let required = Duration::minutes(i64::from(duration_minutes));

    let mut cursor = window_open;
    for event in sorted {
        if event.end_time <= cursor {
            continue;
        }
        let gap_end = event.start_time.max(cursor).min(window_close);
        if gap_end - cursor >= required {
            return Some(cursor);
        }
        cursor = cursor.max(event.end_time);
    }

    (window_close - cursor >= required).then_some(cursor)
}

fn local_to_utc(day: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&day.and_time(time))
        .earliest()
        .map(|value| value.with_timezone(&Utc))
}
