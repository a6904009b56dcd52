//! Derived state: pure functions of the current collections and `now`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use alva_core::{ActivityEvent, Task, TaskStatus};

use crate::collections::Collections;

/// Activity younger than this many whole minutes counts as online.
pub const ONLINE_WINDOW_MINUTES: i64 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantStatus {
    Online,
    Thinking,
    Offline,
}

impl AssistantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Thinking => "thinking",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for AssistantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub completed: usize,
    pub in_progress: usize,
    pub pending: usize,
    pub estimated_minutes_remaining: u32,
}

/// First in-progress task in collection order.
pub fn active_task(tasks: &[Task]) -> Option<&Task> {
    tasks.iter().find(|t| t.status == TaskStatus::InProgress)
}

/// Timestamp of the most recent activity.
pub fn last_active(activities: &[ActivityEvent]) -> Option<DateTime<Utc>> {
    activities.iter().map(|a| a.created_at).max()
}

/// Whole minutes elapsed from `since` to `now`, rounded down.
pub fn minutes_since(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_seconds().div_euclid(60)
}

pub fn assistant_status(
    active: Option<&Task>,
    last_active: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> AssistantStatus {
    if active.is_some() {
        return AssistantStatus::Thinking;
    }
    match last_active {
        Some(at) if minutes_since(at, now) < ONLINE_WINDOW_MINUTES => AssistantStatus::Online,
        _ => AssistantStatus::Offline,
    }
}

pub fn stats(tasks: &[Task]) -> DashboardStats {
    let mut stats = DashboardStats::default();
    for task in tasks {
        match task.status {
            TaskStatus::Completed => stats.completed += 1,
            TaskStatus::InProgress => stats.in_progress += 1,
            TaskStatus::Pending => stats.pending += 1,
            TaskStatus::Failed | TaskStatus::Cancelled => {}
        }
        if task.status.is_open() {
            stats.estimated_minutes_remaining = stats
                .estimated_minutes_remaining
                .saturating_add(task.estimated_minutes.unwrap_or(0));
        }
    }
    stats
}

/// Everything the status bar and footer show, computed in one pass over a
/// snapshot. Borrows from the collections it was built from.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedState<'a> {
    pub active_task: Option<&'a Task>,
    pub status: AssistantStatus,
    pub last_active: Option<DateTime<Utc>>,
    pub stats: DashboardStats,
}

impl<'a> DerivedState<'a> {
    pub fn compute(collections: &'a Collections, now: DateTime<Utc>) -> Self {
        let active_task = active_task(collections.tasks());
        let last_active = last_active(collections.activities());
        Self {
            active_task,
            status: assistant_status(active_task, last_active, now),
            last_active,
            stats: stats(collections.tasks()),
        }
    }
}
