pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{BootstrapResult, bootstrap_planner, bootstrap_workspace};
pub use application::calendar_sync::{DeviceCalendarSync, DeviceSyncBatch, RetryPolicy, sync_range};
pub use application::event_store::{
    DEFAULT_CALENDAR_ID, EventCommand, EventDraft, EventPatch, EventState, reduce_events,
};
pub use application::planner::{EVENTS_KEY, NowProvider, Planner, Snapshot, TASKS_KEY};
pub use application::reconcile::{
    ScheduleContext, reconcile_linked_events, schedule_task, schedule_task_next_free_slot,
};
pub use application::task_store::{
    HabitDraft, TaskCommand, TaskDraft, TaskPatch, TaskState, reduce_tasks,
};
pub use domain::free_slot::{WorkingWindow, WorkingWindowSpec, find_slot};
pub use domain::layout::layout;
pub use domain::models::{
    CalendarSource, EnergyLevel, Event, EventStatus, Habit, LaidOutEvent, Priority, Task,
    TaskStatus, bucket_key,
};
pub use domain::quick_capture::{CapturePriority, QuickCapture, resolve_date_token};
pub use infrastructure::config::{DaybookConfig, SyncWindow, ensure_default_config, load_config};
pub use infrastructure::device_calendar::{DeviceCalendarSource, RawEvent, normalize_raw_event};
pub use infrastructure::error::InfraError;
pub use infrastructure::kv_store::{InMemoryKeyValueStore, KeyValueStore, SqliteKeyValueStore};
pub use infrastructure::logging::init_tracing;
