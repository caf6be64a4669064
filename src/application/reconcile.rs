//! Task to event propagation. Tasks are the source of truth; events linked to
//! a task only ever follow it.

use crate::application::event_store::{EventCommand, EventDraft, EventState, reduce_events};
use crate::application::task_store::{TaskCommand, TaskPatch, TaskState, reduce_tasks};
use crate::domain::free_slot::{WorkingWindow, find_slot};
use crate::domain::models::{EventStatus, TaskStatus, bucket_key};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

/// Zone, working window and clock shared by the scheduling helpers.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleContext {
    pub tz: Tz,
    pub window: WorkingWindow,
    pub now: DateTime<Utc>,
}

/// Marks events completed when their linked task is completed and puts them
/// back to confirmed when it no longer is. Cancelled events stay cancelled
/// unless the task completes; events pointing at unknown tasks are left alone.
pub fn reconcile_linked_events(events: &EventState, tasks: &TaskState) -> EventState {
    let mut next = events.clone();
    let mut changed = 0usize;
    for event in next.buckets.values_mut().flatten() {
        let Some(task) = event
            .linked_task_id
            .as_deref()
            .and_then(|task_id| tasks.find(task_id))
        else {
            continue;
        };

        let target = match (task.is_completed(), event.status) {
            (true, status) if status != EventStatus::Completed => EventStatus::Completed,
            (false, EventStatus::Completed) => EventStatus::Confirmed,
            _ => continue,
        };
        event.status = target;
        changed += 1;
    }

    if changed > 0 {
        tracing::debug!(changed, "reconciled linked events");
    }
    next
}

/// Turns a task into a calendar block starting at `start`. The new event links
/// back to the task and the task is marked migrated.
pub fn schedule_task(
    events: &EventState,
    tasks: &TaskState,
    task_id: &str,
    start: DateTime<Utc>,
    duration_minutes: u32,
    calendar_id: Option<String>,
    context: ScheduleContext,
) -> (EventState, TaskState) {
    let Some(task) = tasks.find(task_id) else {
        tracing::warn!(task_id = %task_id, "schedule ignored: task not found");
        return (events.clone(), tasks.clone());
    };

    let draft = EventDraft {
        calendar_id,
        title: task.title.clone(),
        description: task.notes.clone(),
        start_time: Some(start),
        end_time: Some(start + Duration::minutes(i64::from(duration_minutes))),
        linked_task_id: Some(task.id.clone()),
        ..EventDraft::default()
    };
    let next_events = reduce_events(events, EventCommand::Insert(draft), context.tz);
    let next_tasks = reduce_tasks(
        tasks,
        TaskCommand::Update {
            id: task.id.clone(),
            patch: TaskPatch {
                status: Some(TaskStatus::Migrated),
                ..TaskPatch::default()
            },
        },
        context.now,
    );

    tracing::info!(task_id = %task_id, start = %start, "task scheduled");
    (next_events, next_tasks)
}

/// Like [`schedule_task`], placing the block in the first free gap of the
/// task's due day (today for inbox tasks). Leaves both stores untouched when
/// the day has no room.
pub fn schedule_task_next_free_slot(
    events: &EventState,
    tasks: &TaskState,
    task_id: &str,
    duration_minutes: u32,
    context: ScheduleContext,
) -> (EventState, TaskState) {
    let Some(task) = tasks.find(task_id) else {
        tracing::warn!(task_id = %task_id, "schedule ignored: task not found");
        return (events.clone(), tasks.clone());
    };

    let ScheduleContext { tz, window, now } = context;
    let anchor = task.due_date.unwrap_or(now);
    let day = anchor.with_timezone(&tz).date_naive();
    let day_events = events.events_on(&bucket_key(anchor, tz));
    let Some(start) = find_slot(duration_minutes, day_events, window, tz, day) else {
        tracing::warn!(
            task_id = %task_id,
            day = %day,
            duration_minutes,
            "schedule ignored: no free slot"
        );
        return (events.clone(), tasks.clone());
    };

    schedule_task(events, tasks, task_id, start, duration_minutes, None, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::task_store::TaskDraft;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, hour, minute, 0)
            .single()
            .expect("valid fixed time")
    }

    fn now() -> DateTime<Utc> {
        at(7, 0)
    }

    fn context() -> ScheduleContext {
        ScheduleContext {
            tz: Tz::UTC,
            window: WorkingWindow::default(),
            now: now(),
        }
    }

    fn tasks_with(id: &str) -> TaskState {
        reduce_tasks(
            &TaskState::default(),
            TaskCommand::Create(TaskDraft {
                id: Some(id.to_string()),
                title: "Write report".to_string(),
                notes: "quarterly".to_string(),
                ..TaskDraft::default()
            }),
            now(),
        )
    }

    fn linked_status(events: &EventState, task_id: &str) -> Option<EventStatus> {
        events
            .all_events()
            .find(|event| event.linked_task_id.as_deref() == Some(task_id))
            .map(|event| event.status)
    }

    #[test]
    fn schedule_task_links_event_and_migrates_task() {
        let tasks = tasks_with("t1");
        let (events, tasks) = schedule_task(
            &EventState::default(),
            &tasks,
            "t1",
            at(14, 0),
            45,
            None,
            context(),
        );

        let event = events.events_on("2026-02-16").first().expect("event created");
        assert_eq!(event.linked_task_id.as_deref(), Some("t1"));
        assert_eq!(event.title, "Write report");
        assert_eq!(event.description, "quarterly");
        assert_eq!(event.end_time, at(14, 45));
        assert_eq!(tasks.find("t1").map(|task| task.status), Some(TaskStatus::Migrated));
    }

    #[test]
    fn next_free_slot_scheduling_uses_due_day() {
        let tasks = tasks_with("t1");
        let events = reduce_events(
            &EventState::default(),
            EventCommand::Insert(EventDraft {
                id: Some("busy".to_string()),
                title: "Busy morning".to_string(),
                start_time: Some(at(8, 0)),
                end_time: Some(at(12, 0)),
                ..EventDraft::default()
            }),
            Tz::UTC,
        );

        let (events, _) = schedule_task_next_free_slot(&events, &tasks, "t1", 60, context());
        let scheduled = events
            .all_events()
            .find(|event| event.linked_task_id.as_deref() == Some("t1"))
            .expect("scheduled event");
        assert_eq!(scheduled.start_time, at(12, 0));
    }

    #[test]
    fn unknown_task_leaves_both_stores_untouched() {
        let tasks = tasks_with("t1");
        let events = EventState::default();
        let (next_events, next_tasks) =
            schedule_task(&events, &tasks, "ghost", at(9, 0), 30, None, context());
        assert_eq!(next_events, events);
        assert_eq!(next_tasks, tasks);
    }

    #[test]
    fn completion_propagates_and_reverts() {
        let tasks = tasks_with("t1");
        let (events, tasks) = schedule_task(
            &EventState::default(),
            &tasks,
            "t1",
            at(9, 0),
            30,
            None,
            context(),
        );
        assert_eq!(linked_status(&events, "t1"), Some(EventStatus::Confirmed));

        let completed = reduce_tasks(&tasks, TaskCommand::Complete { id: "t1".to_string() }, now());
        let events = reconcile_linked_events(&events, &completed);
        assert_eq!(linked_status(&events, "t1"), Some(EventStatus::Completed));

        let reopened = reduce_tasks(
            &completed,
            TaskCommand::Update {
                id: "t1".to_string(),
                patch: TaskPatch {
                    status: Some(TaskStatus::Active),
                    ..TaskPatch::default()
                },
            },
            now(),
        );
        let events = reconcile_linked_events(&events, &reopened);
        assert_eq!(linked_status(&events, "t1"), Some(EventStatus::Confirmed));
    }

    #[test]
    fn reconcile_leaves_cancelled_and_orphaned_events() {
        let tasks = tasks_with("t1");
        let events = reduce_events(
            &EventState::default(),
            EventCommand::Insert(EventDraft {
                id: Some("cancelled".to_string()),
                start_time: Some(at(9, 0)),
                linked_task_id: Some("t1".to_string()),
                status: Some(EventStatus::Cancelled),
                ..EventDraft::default()
            }),
            Tz::UTC,
        );
        let events = reduce_events(
            &events,
            EventCommand::Insert(EventDraft {
                id: Some("orphan".to_string()),
                start_time: Some(at(10, 0)),
                linked_task_id: Some("deleted-task".to_string()),
                status: Some(EventStatus::Completed),
                ..EventDraft::default()
            }),
            Tz::UTC,
        );

        let reconciled = reconcile_linked_events(&events, &tasks);
        assert_eq!(reconciled, events);
    }
}
