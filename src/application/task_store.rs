use crate::application::next_id;
use crate::domain::models::{
    EnergyLevel, Habit, Priority, Task, TaskStatus, bucket_key, date_key, validate_date,
};
use crate::domain::quick_capture::{CapturePriority, QuickCapture, resolve_date_token};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Local time given to tasks whose due date comes from a date-only token.
const CAPTURE_DUE_HOUR: u32 = 9;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskState {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub habits: Vec<Habit>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub id: Option<String>,
    pub title: String,
    pub notes: String,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub energy_level: Option<EnergyLevel>,
    /// `None` defaults to now, `Some(None)` files the task in the inbox.
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub parent_id: Option<String>,
    pub project_id: Option<String>,
    pub context_tags: Vec<String>,
}

impl TaskDraft {
    pub fn from_capture(capture: &QuickCapture, today: NaiveDate, tz: Tz) -> Self {
        let due_date = capture
            .date
            .as_deref()
            .and_then(|token| resolve_date_token(token, today))
            .and_then(|date| {
                let time = NaiveTime::from_hms_opt(CAPTURE_DUE_HOUR, 0, 0)?;
                tz.from_local_datetime(&date.and_time(time)).earliest()
            })
            .map(|local| Some(local.with_timezone(&Utc)));

        Self {
            title: capture.description.clone(),
            priority: capture.priority.map(|priority| match priority {
                CapturePriority::High => Priority::P1,
                CapturePriority::Medium => Priority::P2,
                CapturePriority::Low => Priority::P3,
            }),
            due_date,
            context_tags: capture.tags.clone(),
            ..Self::default()
        }
    }
}

/// Shallow field overrides; see [`EventPatch`](crate::application::event_store::EventPatch)
/// for the nested `Option` convention.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub energy_level: Option<EnergyLevel>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub parent_id: Option<Option<String>>,
    pub project_id: Option<Option<String>>,
    pub context_tags: Option<Vec<String>>,
}

impl TaskPatch {
    /// Leaving `completed` without naming `completed_at` clears it; entering
    /// `completed` the same way stamps `now`.
    fn apply(self, mut task: Task, now: DateTime<Utc>) -> Task {
        let explicit_completed_at = self.completed_at.is_some();
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(notes) = self.notes {
            task.notes = notes;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(energy_level) = self.energy_level {
            task.energy_level = energy_level;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(completed_at) = self.completed_at {
            task.completed_at = completed_at;
        }
        if let Some(parent_id) = self.parent_id {
            task.parent_id = parent_id;
        }
        if let Some(project_id) = self.project_id {
            task.project_id = project_id;
        }
        if let Some(context_tags) = self.context_tags {
            task.context_tags = normalize_tags(context_tags);
        }

        if !explicit_completed_at {
            match (task.status, task.completed_at) {
                (TaskStatus::Completed, None) => task.completed_at = Some(now),
                (status, Some(_)) if status != TaskStatus::Completed => task.completed_at = None,
                _ => {}
            }
        }
        task
    }
}

#[derive(Debug, Clone, Default)]
pub struct HabitDraft {
    pub id: Option<String>,
    pub title: String,
    pub target: u32,
}

#[derive(Debug, Clone)]
pub enum TaskCommand {
    Create(TaskDraft),
    Complete {
        id: String,
    },
    Update {
        id: String,
        patch: TaskPatch,
    },
    Delete {
        id: String,
    },
    BulkDelete {
        ids: Vec<String>,
    },
    Snooze {
        id: String,
    },
    Migrate {
        ids: Vec<String>,
        target_date: Option<DateTime<Utc>>,
        status: Option<TaskStatus>,
    },
    AddHabit(HabitDraft),
    /// Adds one to the progress counter. Reaching or passing `target` is not
    /// prevented here.
    IncrementHabit {
        id: String,
    },
    /// Closes `closing_day` for the habit: records it in the history and
    /// extends the streak when the target was reached, otherwise resets the
    /// streak. Progress starts over at zero either way.
    RolloverHabit {
        id: String,
        closing_day: String,
    },
    DeleteHabit {
        id: String,
    },
}

pub fn reduce_tasks(state: &TaskState, command: TaskCommand, now: DateTime<Utc>) -> TaskState {
    match command {
        TaskCommand::Create(draft) => create(state, draft, now),
        TaskCommand::Complete { id } => with_task(state, &id, "complete", |task| {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(now);
        }),
        TaskCommand::Update { id, patch } => with_task(state, &id, "update", |task| {
            *task = patch.apply(task.clone(), now);
        }),
        TaskCommand::Delete { id } => delete_many(state, &[id]),
        TaskCommand::BulkDelete { ids } => delete_many(state, &ids),
        TaskCommand::Snooze { id } => with_task(state, &id, "snooze", |task| {
            let base = task.due_date.unwrap_or(now);
            task.due_date = Some(base + Duration::days(1));
        }),
        TaskCommand::Migrate {
            ids,
            target_date,
            status,
        } => migrate(state, &ids, target_date, status, now),
        TaskCommand::AddHabit(draft) => add_habit(state, draft),
        TaskCommand::IncrementHabit { id } => with_habit(state, &id, "increment", |habit| {
            habit.current_progress = habit.current_progress.saturating_add(1);
        }),
        TaskCommand::RolloverHabit { id, closing_day } => {
            if let Err(message) = validate_date(&closing_day, "closing_day") {
                tracing::warn!(habit_id = %id, %message, "habit rollover ignored");
                return state.clone();
            }
            with_habit(state, &id, "rollover", |habit| {
                if habit.is_target_reached() {
                    if habit.history.insert(closing_day.clone()) {
                        habit.streak = habit.streak.saturating_add(1);
                    }
                } else {
                    habit.streak = 0;
                }
                habit.current_progress = 0;
            })
        }
        TaskCommand::DeleteHabit { id } => {
            if !state.habits.iter().any(|habit| habit.id == id) {
                tracing::warn!(habit_id = %id, "habit delete ignored: habit not found");
                return state.clone();
            }
            let mut next = state.clone();
            next.habits.retain(|habit| habit.id != id);
            next
        }
    }
}

fn create(state: &TaskState, draft: TaskDraft, now: DateTime<Utc>) -> TaskState {
    let title = draft.title.trim();
    let id = draft
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| next_id("tsk"));
    if state.find(&id).is_some() {
        tracing::warn!(task_id = %id, "task create ignored: id already present");
        return state.clone();
    }

    let status = draft.status.unwrap_or_default();
    let task = Task {
        id,
        title: title.to_string(),
        notes: draft.notes,
        status,
        priority: draft.priority.unwrap_or_default(),
        energy_level: draft.energy_level.unwrap_or_default(),
        due_date: draft.due_date.unwrap_or(Some(now)),
        completed_at: (status == TaskStatus::Completed).then_some(now),
        parent_id: draft.parent_id,
        project_id: draft.project_id,
        context_tags: normalize_tags(draft.context_tags),
    };

    tracing::debug!(task_id = %task.id, "task created");
    let mut next = state.clone();
    next.tasks.push(task);
    next
}

fn delete_many(state: &TaskState, ids: &[String]) -> TaskState {
    let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut next = state.clone();
    next.tasks.retain(|task| !targets.contains(task.id.as_str()));

    let removed = state.tasks.len() - next.tasks.len();
    if removed < targets.len() {
        tracing::warn!(
            requested = targets.len(),
            removed,
            "task delete: some ids were not found"
        );
    }
    next
}

fn migrate(
    state: &TaskState,
    ids: &[String],
    target_date: Option<DateTime<Utc>>,
    status: Option<TaskStatus>,
    now: DateTime<Utc>,
) -> TaskState {
    let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut next = state.clone();
    let mut migrated = 0usize;
    for task in next
        .tasks
        .iter_mut()
        .filter(|task| targets.contains(task.id.as_str()))
    {
        let patch = TaskPatch {
            due_date: target_date.map(Some),
            status,
            ..TaskPatch::default()
        };
        *task = patch.apply(task.clone(), now);
        migrated += 1;
    }

    tracing::debug!(requested = targets.len(), migrated, "tasks migrated");
    next
}

fn add_habit(state: &TaskState, draft: HabitDraft) -> TaskState {
    let habit = Habit {
        id: draft
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| next_id("hab")),
        title: draft.title.trim().to_string(),
        current_progress: 0,
        target: draft.target,
        streak: 0,
        history: BTreeSet::new(),
    };
    if let Err(message) = habit.validate() {
        tracing::warn!(%message, "habit add ignored");
        return state.clone();
    }
    if state.habit(&habit.id).is_some() {
        tracing::warn!(habit_id = %habit.id, "habit add ignored: id already present");
        return state.clone();
    }

    let mut next = state.clone();
    next.habits.push(habit);
    next
}

fn with_task<F>(state: &TaskState, id: &str, operation: &str, mutate: F) -> TaskState
where
    F: FnOnce(&mut Task),
{
    let Some(index) = state.tasks.iter().position(|task| task.id == id) else {
        tracing::warn!(task_id = %id, operation, "task command ignored: task not found");
        return state.clone();
    };
    let mut next = state.clone();
    mutate(&mut next.tasks[index]);
    next
}

fn with_habit<F>(state: &TaskState, id: &str, operation: &str, mutate: F) -> TaskState
where
    F: FnOnce(&mut Habit),
{
    let Some(index) = state.habits.iter().position(|habit| habit.id == id) else {
        tracing::warn!(habit_id = %id, operation, "habit command ignored: habit not found");
        return state.clone();
    };
    let mut next = state.clone();
    mutate(&mut next.habits[index]);
    next
}

/// Trims, drops empties and duplicates (case-insensitively), keeps first-seen order.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .collect()
}

impl TaskState {
    pub fn find(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn habit(&self, id: &str) -> Option<&Habit> {
        self.habits.iter().find(|habit| habit.id == id)
    }

    pub fn inbox(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|task| task.due_date.is_none())
    }

    pub fn due_on(&self, date: NaiveDate, tz: Tz) -> impl Iterator<Item = &Task> {
        let key = date_key(date);
        self.tasks.iter().filter(move |task| {
            task.due_date
                .map(|due| bucket_key(due, tz) == key)
                .unwrap_or(false)
        })
    }

    pub fn with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.iter().filter(move |task| task.has_tag(tag))
    }
}
