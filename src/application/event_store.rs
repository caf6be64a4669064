use crate::application::next_id;
use crate::domain::models::{CalendarSource, Event, EventStatus, bucket_key, date_key};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_CALENDAR_ID: &str = "local";
const DEFAULT_EVENT_MINUTES: i64 = 60;

/// Events grouped by the local date of their start. Buckets keep insertion
/// order and are never left empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventState {
    pub buckets: BTreeMap<String, Vec<Event>>,
    #[serde(default)]
    pub calendars: Vec<CalendarSource>,
}

#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    pub id: Option<String>,
    pub calendar_id: Option<String>,
    pub title: String,
    pub description: String,
    pub start_time: Option<DateTime<Utc>>,
    /// Defaults to one hour after `start_time`.
    pub end_time: Option<DateTime<Utc>>,
    pub is_all_day: Option<bool>,
    pub location_name: Option<String>,
    pub recurrence_rule: Option<String>,
    pub linked_task_id: Option<String>,
    pub status: Option<EventStatus>,
}

/// Shallow field overrides. For nullable fields the outer `Option` says
/// whether to touch the field and the inner one is the new value.
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub calendar_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_all_day: Option<bool>,
    pub location_name: Option<Option<String>>,
    pub recurrence_rule: Option<Option<String>>,
    pub linked_task_id: Option<Option<String>>,
    pub status: Option<EventStatus>,
}

impl EventPatch {
    fn apply(self, mut event: Event) -> Event {
        if let Some(calendar_id) = self.calendar_id {
            event.calendar_id = calendar_id;
        }
        if let Some(title) = self.title {
            event.title = title;
        }
        if let Some(description) = self.description {
            event.description = description;
        }
        if let Some(start_time) = self.start_time {
            event.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            event.end_time = end_time;
        }
        if let Some(is_all_day) = self.is_all_day {
            event.is_all_day = is_all_day;
        }
        if let Some(location_name) = self.location_name {
            event.location_name = location_name;
        }
        if let Some(recurrence_rule) = self.recurrence_rule {
            event.recurrence_rule = recurrence_rule;
        }
        if let Some(linked_task_id) = self.linked_task_id {
            event.linked_task_id = linked_task_id;
        }
        if let Some(status) = self.status {
            event.status = status;
        }
        event
    }
}

#[derive(Debug, Clone)]
pub enum EventCommand {
    Insert(EventDraft),
    /// `day_key` is the event's current bucket when the caller knows it.
    /// Without it every bucket is scanned.
    Update {
        id: String,
        day_key: Option<String>,
        patch: EventPatch,
    },
    Delete {
        id: String,
        day_key: Option<String>,
    },
    MergeExternal {
        events: Vec<Event>,
        calendars: Option<Vec<CalendarSource>>,
    },
}

pub fn reduce_events(state: &EventState, command: EventCommand, tz: Tz) -> EventState {
    match command {
        EventCommand::Insert(draft) => insert(state, draft, tz),
        EventCommand::Update { id, day_key, patch } => {
            update(state, &id, day_key.as_deref(), patch, tz)
        }
        EventCommand::Delete { id, day_key } => delete(state, &id, day_key.as_deref()),
        EventCommand::MergeExternal { events, calendars } => {
            merge_external(state, events, calendars, tz)
        }
    }
}

fn insert(state: &EventState, draft: EventDraft, tz: Tz) -> EventState {
    let Some(start_time) = draft.start_time else {
        tracing::warn!(title = %draft.title, "event insert ignored: start_time is missing");
        return state.clone();
    };

    let event = Event {
        id: draft
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| next_id("evt")),
        calendar_id: draft
            .calendar_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CALENDAR_ID.to_string()),
        title: draft.title,
        description: draft.description,
        start_time,
        end_time: draft
            .end_time
            .unwrap_or(start_time + Duration::minutes(DEFAULT_EVENT_MINUTES)),
        is_all_day: draft.is_all_day.unwrap_or(false),
        location_name: draft.location_name,
        recurrence_rule: draft.recurrence_rule,
        linked_task_id: draft.linked_task_id,
        status: draft.status.unwrap_or_default(),
    };

    if state.find(&event.id).is_some() {
        tracing::warn!(event_id = %event.id, "event insert ignored: id already present");
        return state.clone();
    }
    if let Err(message) = event.validate() {
        tracing::debug!(event_id = %event.id, %message, "inserting event that fails validation");
    }

    let mut next = state.clone();
    let key = event.bucket_key(tz);
    tracing::debug!(event_id = %event.id, day_key = %key, "event inserted");
    next.buckets.entry(key).or_default().push(event);
    next
}

fn update(
    state: &EventState,
    id: &str,
    day_key: Option<&str>,
    patch: EventPatch,
    tz: Tz,
) -> EventState {
    let Some((old_key, index)) = state.locate(id, day_key) else {
        tracing::warn!(event_id = %id, "event update ignored: event not found");
        return state.clone();
    };

    let mut next = state.clone();
    let Some(bucket) = next.buckets.get_mut(&old_key) else {
        return state.clone();
    };
    let updated = patch.apply(bucket[index].clone());
    let new_key = updated.bucket_key(tz);

    if new_key == old_key {
        bucket[index] = updated;
        return next;
    }

    bucket.remove(index);
    if bucket.is_empty() {
        next.buckets.remove(&old_key);
    }
    tracing::debug!(event_id = %id, from = %old_key, to = %new_key, "event moved to another day");
    next.buckets.entry(new_key).or_default().push(updated);
    next
}

fn delete(state: &EventState, id: &str, day_key: Option<&str>) -> EventState {
    let Some((key, index)) = state.locate(id, day_key) else {
        tracing::warn!(event_id = %id, "event delete ignored: event not found");
        return state.clone();
    };

    let mut next = state.clone();
    if let Some(bucket) = next.buckets.get_mut(&key) {
        bucket.remove(index);
        if bucket.is_empty() {
            next.buckets.remove(&key);
        }
    }
    tracing::debug!(event_id = %id, day_key = %key, "event deleted");
    next
}

/// First occurrence of an id wins, both against stored events and within the
/// incoming batch, so replaying a sync is harmless.
fn merge_external(
    state: &EventState,
    events: Vec<Event>,
    calendars: Option<Vec<CalendarSource>>,
    tz: Tz,
) -> EventState {
    let mut next = state.clone();
    if let Some(calendars) = calendars {
        next.calendars = calendars;
    }

    let mut known: HashSet<String> = next.all_events().map(|event| event.id.clone()).collect();
    let mut added = 0usize;
    let mut skipped = 0usize;
    for event in events {
        if !known.insert(event.id.clone()) {
            skipped += 1;
            continue;
        }
        let key = event.bucket_key(tz);
        next.buckets.entry(key).or_default().push(event);
        added += 1;
    }

    tracing::info!(added, skipped, "merged external events");
    next
}

impl EventState {
    pub fn events_on(&self, day_key: &str) -> &[Event] {
        self.buckets
            .get(day_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn events_on_date(&self, date: NaiveDate) -> &[Event] {
        self.events_on(&date_key(date))
    }

    pub fn find(&self, id: &str) -> Option<&Event> {
        self.all_events().find(|event| event.id == id)
    }

    pub fn all_events(&self) -> impl Iterator<Item = &Event> {
        self.buckets.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Checks that every event sits in the bucket of its own start date, that
    /// no bucket is empty and that ids are unique across buckets.
    pub fn check_invariants(&self, tz: Tz) -> Result<(), String> {
        let mut seen = HashSet::new();
        for (key, bucket) in &self.buckets {
            if bucket.is_empty() {
                return Err(format!("bucket {key} is empty"));
            }
            for event in bucket {
                let expected = bucket_key(event.start_time, tz);
                if &expected != key {
                    return Err(format!(
                        "event {} is in bucket {key} but starts on {expected}",
                        event.id
                    ));
                }
                if !seen.insert(event.id.as_str()) {
                    return Err(format!("event {} appears more than once", event.id));
                }
            }
        }
        Ok(())
    }

    /// With a key only that bucket is searched first; the full scan is the
    /// fallback and costs O(total events).
    fn locate(&self, id: &str, day_key: Option<&str>) -> Option<(String, usize)> {
        if let Some(key) = day_key {
            let found = self
                .buckets
                .get(key)
                .and_then(|bucket| bucket.iter().position(|event| event.id == id));
            if let Some(index) = found {
                return Some((key.to_string(), index));
            }
            tracing::debug!(event_id = %id, day_key = %key, "event not in given bucket, scanning");
        }

        self.buckets.iter().find_map(|(key, bucket)| {
            bucket
                .iter()
                .position(|event| event.id == id)
                .map(|index| (key.clone(), index))
        })
    }
}
