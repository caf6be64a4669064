use crate::application::calendar_sync::{DeviceCalendarSync, sync_range};
use crate::application::event_store::{EventCommand, EventState, reduce_events};
use crate::application::next_id;
use crate::application::reconcile::{
    ScheduleContext, reconcile_linked_events, schedule_task, schedule_task_next_free_slot,
};
use crate::application::task_store::{TaskCommand, TaskDraft, TaskState, reduce_tasks};
use crate::domain::free_slot::{WorkingWindow, find_slot};
use crate::domain::layout::layout;
use crate::domain::models::{LaidOutEvent, Task};
use crate::domain::quick_capture::parse;
use crate::infrastructure::config::{DaybookConfig, SyncWindow};
use crate::infrastructure::device_calendar::DeviceCalendarSource;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::KeyValueStore;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const EVENTS_KEY: &str = "daybook.events";
pub const TASKS_KEY: &str = "daybook.tasks";

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Immutable view of both stores at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub events: Arc<EventState>,
    pub tasks: Arc<TaskState>,
}

/// Owns the event and task stores. Commands are applied one at a time; every
/// change replaces the snapshot and is written back to the key-value store.
pub struct Planner<K>
where
    K: KeyValueStore,
{
    store: Arc<K>,
    state: Mutex<Snapshot>,
    tz: Tz,
    window: WorkingWindow,
    sync_window: SyncWindow,
    now_provider: NowProvider,
}

impl<K> Planner<K>
where
    K: KeyValueStore,
{
    /// Reads both snapshots once. Missing or unreadable state starts empty.
    pub async fn load(store: Arc<K>, config: &DaybookConfig) -> Result<Self, InfraError> {
        let tz = config.time_zone()?;
        let window = config.working_window()?;
        let events: EventState = load_snapshot(store.as_ref(), EVENTS_KEY).await;
        let tasks: TaskState = load_snapshot(store.as_ref(), TASKS_KEY).await;
        if let Err(violation) = events.check_invariants(tz) {
            tracing::warn!(%violation, "stored events violate bucket invariant");
        }

        tracing::info!(
            events = events.len(),
            tasks = tasks.tasks.len(),
            habits = tasks.habits.len(),
            timezone = %tz,
            "planner loaded"
        );
        Ok(Self {
            store,
            state: Mutex::new(Snapshot {
                events: Arc::new(events),
                tasks: Arc::new(tasks),
            }),
            tz,
            window,
            sync_window: config.sync_window.clone(),
            now_provider: Arc::new(Utc::now),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.clone()
    }

    pub async fn dispatch_event(&self, command: EventCommand) -> Arc<EventState> {
        let mut state = self.state.lock().await;
        let next = reduce_events(&state.events, command, self.tz);
        self.replace(&mut state, next, None).await;
        Arc::clone(&state.events)
    }

    /// Applies a task command, then brings linked events in line with the
    /// resulting task statuses.
    pub async fn dispatch_task(&self, command: TaskCommand) -> Arc<TaskState> {
        let mut state = self.state.lock().await;
        let tasks = reduce_tasks(&state.tasks, command, self.now());
        let events = reconcile_linked_events(&state.events, &tasks);
        self.replace(&mut state, events, Some(tasks)).await;
        Arc::clone(&state.tasks)
    }

    /// Parses free-form text into a new task. Text made only of tokens still
    /// creates a task, with an empty title.
    pub async fn capture(&self, text: &str) -> Option<Task> {
        let parsed = parse(text);
        let now = self.now();
        let today = now.with_timezone(&self.tz).date_naive();
        let id = next_id("tsk");
        let draft = TaskDraft {
            id: Some(id.clone()),
            ..TaskDraft::from_capture(&parsed, today, self.tz)
        };
        let tasks = self.dispatch_task(TaskCommand::Create(draft)).await;
        tasks.find(&id).cloned()
    }

    pub async fn schedule_task(
        &self,
        task_id: &str,
        start: DateTime<Utc>,
        duration_minutes: u32,
        calendar_id: Option<String>,
    ) -> Snapshot {
        let mut state = self.state.lock().await;
        let (events, tasks) = schedule_task(
            &state.events,
            &state.tasks,
            task_id,
            start,
            duration_minutes,
            calendar_id,
            self.context(),
        );
        self.replace(&mut state, events, Some(tasks)).await;
        state.clone()
    }

    pub async fn schedule_task_next_free_slot(
        &self,
        task_id: &str,
        duration_minutes: u32,
    ) -> Snapshot {
        let mut state = self.state.lock().await;
        let (events, tasks) = schedule_task_next_free_slot(
            &state.events,
            &state.tasks,
            task_id,
            duration_minutes,
            self.context(),
        );
        self.replace(&mut state, events, Some(tasks)).await;
        state.clone()
    }

    pub async fn day_layout(&self, day: NaiveDate, hour_height_px: f64) -> Vec<LaidOutEvent> {
        let events = Arc::clone(&self.state.lock().await.events);
        layout(events.events_on_date(day), hour_height_px, self.tz)
    }

    pub async fn find_slot(&self, duration_minutes: u32, day: NaiveDate) -> Option<DateTime<Utc>> {
        let events = Arc::clone(&self.state.lock().await.events);
        find_slot(
            duration_minutes,
            events.events_on_date(day),
            self.window,
            self.tz,
            day,
        )
    }

    /// Pulls the configured window from the device calendar and merges it.
    /// Returns how many events were new.
    pub async fn sync_device_calendar<C>(&self, sync: &DeviceCalendarSync<C>) -> usize
    where
        C: DeviceCalendarSource,
    {
        let (window_start, window_end) = sync_range(self.now(), &self.sync_window);
        let batch = sync.fetch(window_start, window_end).await;

        let mut state = self.state.lock().await;
        let before = state.events.len();
        let next = reduce_events(
            &state.events,
            EventCommand::MergeExternal {
                events: batch.events,
                calendars: batch.calendars,
            },
            self.tz,
        );
        let added = next.len().saturating_sub(before);
        self.replace(&mut state, next, None).await;
        tracing::info!(added, "device calendar merged");
        added
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn context(&self) -> ScheduleContext {
        ScheduleContext {
            tz: self.tz,
            window: self.window,
            now: self.now(),
        }
    }

    async fn replace(&self, state: &mut Snapshot, events: EventState, tasks: Option<TaskState>) {
        if events != *state.events {
            state.events = Arc::new(events);
            persist(self.store.as_ref(), EVENTS_KEY, state.events.as_ref()).await;
        }
        if let Some(tasks) = tasks.filter(|tasks| tasks != state.tasks.as_ref()) {
            state.tasks = Arc::new(tasks);
            persist(self.store.as_ref(), TASKS_KEY, state.tasks.as_ref()).await;
        }
    }
}

async fn load_snapshot<K, T>(store: &K, key: &str) -> T
where
    K: KeyValueStore,
    T: DeserializeOwned + Default,
{
    match store.get(key).await {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|error| {
            tracing::warn!(key, %error, "stored snapshot is corrupt; starting empty");
            T::default()
        }),
        Ok(None) => T::default(),
        Err(error) => {
            tracing::error!(key, %error, "failed to read stored snapshot; starting empty");
            T::default()
        }
    }
}

async fn persist<K, T>(store: &K, key: &str, value: &T)
where
    K: KeyValueStore,
    T: serde::Serialize,
{
    let encoded = match serde_json::to_string(value) {
        Ok(encoded) => encoded,
        Err(error) => {
            tracing::error!(key, %error, "failed to encode snapshot");
            return;
        }
    };
    if let Err(error) = store.set(key, &encoded).await {
        tracing::error!(key, %error, "failed to persist snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::calendar_sync::RetryPolicy;
    use crate::application::event_store::EventDraft;
    use crate::domain::models::{CalendarSource, EventStatus, Priority, TaskStatus};
    use crate::infrastructure::device_calendar::RawEvent;
    use crate::infrastructure::kv_store::InMemoryKeyValueStore;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, hour, minute, 0)
            .single()
            .expect("valid fixed time")
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date")
    }

    async fn planner_with(store: Arc<InMemoryKeyValueStore>) -> Planner<InMemoryKeyValueStore> {
        Planner::load(store, &DaybookConfig::default())
            .await
            .expect("default config loads")
            .with_now_provider(Arc::new(|| at(7, 0)))
    }

    fn insert(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> EventCommand {
        EventCommand::Insert(EventDraft {
            id: Some(id.to_string()),
            title: id.to_string(),
            start_time: Some(start),
            end_time: Some(end),
            ..EventDraft::default()
        })
    }

    struct FixedDeviceCalendar {
        events: Vec<RawEvent>,
    }

    #[async_trait]
    impl DeviceCalendarSource for FixedDeviceCalendar {
        async fn request_permission(&self) -> Result<bool, InfraError> {
            Ok(true)
        }

        async fn list_calendars(&self) -> Result<Vec<CalendarSource>, InfraError> {
            Ok(vec![CalendarSource {
                id: "phone".to_string(),
                title: "Phone".to_string(),
                color: Some("#336699".to_string()),
                is_device: true,
            }])
        }

        async fn list_events(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<RawEvent>, InfraError> {
            Ok(self.events.clone())
        }
    }

    fn raw(id: &str, start: &str, end: &str) -> RawEvent {
        RawEvent {
            id: id.to_string(),
            calendar_id: "phone".to_string(),
            title: Some("Device".to_string()),
            notes: None,
            start_date: start.to_string(),
            end_date: end.to_string(),
            all_day: false,
            location: None,
            recurrence_rule: None,
        }
    }

    #[tokio::test]
    async fn dispatch_persists_and_reload_restores() {
        let store = Arc::new(InMemoryKeyValueStore::default());
        let planner = planner_with(Arc::clone(&store)).await;
        planner.dispatch_event(insert("standup", at(9, 0), at(9, 15))).await;
        planner
            .dispatch_task(TaskCommand::Create(TaskDraft {
                id: Some("t1".to_string()),
                title: "Water plants".to_string(),
                ..TaskDraft::default()
            }))
            .await;

        let reloaded = planner_with(store).await;
        let snapshot = reloaded.snapshot().await;
        assert!(snapshot.events.find("standup").is_some());
        assert_eq!(
            snapshot.tasks.find("t1").map(|task| task.title.as_str()),
            Some("Water plants")
        );
    }

    #[tokio::test]
    async fn corrupt_state_starts_empty() {
        let store = Arc::new(InMemoryKeyValueStore::with_entries([
            (EVENTS_KEY, "{not json"),
            (TASKS_KEY, "[]"),
        ]));
        let planner = planner_with(store).await;
        let snapshot = planner.snapshot().await;
        assert!(snapshot.events.is_empty());
        assert!(snapshot.tasks.tasks.is_empty());
    }

    #[tokio::test]
    async fn noop_commands_do_not_write() {
        let store = Arc::new(InMemoryKeyValueStore::default());
        let planner = planner_with(Arc::clone(&store)).await;
        planner
            .dispatch_event(EventCommand::Delete {
                id: "missing".to_string(),
                day_key: Some("2026-02-16".to_string()),
            })
            .await;
        assert_eq!(store.get(EVENTS_KEY).await.expect("read"), None);
        assert_eq!(store.get(TASKS_KEY).await.expect("read"), None);
    }

    #[tokio::test]
    async fn capture_creates_prioritized_task() {
        let planner = planner_with(Arc::new(InMemoryKeyValueStore::default())).await;
        let task = planner
            .capture("Buy milk #errand !high tomorrow")
            .await
            .expect("task created");

        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.priority, Priority::P1);
        assert_eq!(task.context_tags, vec!["errand".to_string()]);
        assert_eq!(
            task.due_date,
            Utc.with_ymd_and_hms(2026, 2, 17, 9, 0, 0).single()
        );
    }

    #[tokio::test]
    async fn capture_of_only_tokens_still_creates_task() {
        let planner = planner_with(Arc::new(InMemoryKeyValueStore::default())).await;
        let task = planner
            .capture("#errand !high tomorrow")
            .await
            .expect("task created");

        assert_eq!(task.title, "");
        assert_eq!(task.priority, Priority::P1);
        assert_eq!(task.context_tags, vec!["errand".to_string()]);
        assert_eq!(
            task.due_date,
            Utc.with_ymd_and_hms(2026, 2, 17, 9, 0, 0).single()
        );
        assert_eq!(planner.snapshot().await.tasks.tasks.len(), 1);
    }

    #[tokio::test]
    async fn completing_task_completes_linked_event() {
        let planner = planner_with(Arc::new(InMemoryKeyValueStore::default())).await;
        planner
            .dispatch_task(TaskCommand::Create(TaskDraft {
                id: Some("t1".to_string()),
                title: "Draft memo".to_string(),
                ..TaskDraft::default()
            }))
            .await;
        let snapshot = planner.schedule_task_next_free_slot("t1", 30).await;
        let scheduled = snapshot
            .events
            .all_events()
            .find(|event| event.linked_task_id.as_deref() == Some("t1"))
            .cloned()
            .expect("linked event");
        assert_eq!(scheduled.start_time, at(8, 0));
        assert_eq!(
            snapshot.tasks.find("t1").map(|task| task.status),
            Some(TaskStatus::Migrated)
        );

        planner
            .dispatch_task(TaskCommand::Complete { id: "t1".to_string() })
            .await;
        let snapshot = planner.snapshot().await;
        assert_eq!(
            snapshot.events.find(&scheduled.id).map(|event| event.status),
            Some(EventStatus::Completed)
        );
    }

    #[tokio::test]
    async fn layout_and_slot_queries_read_current_day() {
        let planner = planner_with(Arc::new(InMemoryKeyValueStore::default())).await;
        planner.dispatch_event(insert("a", at(8, 0), at(9, 0))).await;
        planner.dispatch_event(insert("b", at(8, 30), at(10, 0))).await;

        let laid_out = planner.day_layout(day(), 60.0).await;
        assert_eq!(laid_out.len(), 2);
        assert!(laid_out.iter().all(|item| item.column_count == 2));
        assert_eq!(planner.find_slot(30, day()).await, Some(at(10, 0)));
    }

    #[tokio::test]
    async fn device_sync_merges_new_events_once() {
        let planner = planner_with(Arc::new(InMemoryKeyValueStore::default())).await;
        let source = Arc::new(FixedDeviceCalendar {
            events: vec![
                raw("dev-1", "2026-02-16T13:00:00Z", "2026-02-16T14:00:00Z"),
                raw("dev-2", "2026-02-18T13:00:00Z", "2026-02-18T14:00:00Z"),
            ],
        });
        let sync = DeviceCalendarSync::new(source).with_retry_policy(RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 1,
        });

        assert_eq!(planner.sync_device_calendar(&sync).await, 2);
        assert_eq!(planner.sync_device_calendar(&sync).await, 0);

        let snapshot = planner.snapshot().await;
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.events.calendars.len(), 1);
        assert_eq!(snapshot.events.events_on("2026-02-18").len(), 1);
    }
}
