//! Task grouping for the pipeline column and the thought stream's focus.

use alva_core::{Task, TaskId, TaskStatus, ThoughtEvent};

use crate::derived::active_task;

/// How many finished tasks the pipeline keeps on show.
pub const RECENTLY_COMPLETED_LIMIT: usize = 5;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskPipeline<'a> {
    /// Collection order.
    pub in_progress: Vec<&'a Task>,
    /// Most urgent first; equal priorities keep collection order.
    pub pending: Vec<&'a Task>,
    /// Most recently finished first.
    pub recently_completed: Vec<&'a Task>,
}

impl<'a> TaskPipeline<'a> {
    pub fn build(tasks: &'a [Task]) -> Self {
        let in_progress = with_status(tasks, TaskStatus::InProgress);

        let mut pending = with_status(tasks, TaskStatus::Pending);
        pending.sort_by_key(|t| t.priority);

        let mut recently_completed = with_status(tasks, TaskStatus::Completed);
        recently_completed.sort_by(|a, b| finished_at(b).cmp(&finished_at(a)));
        recently_completed.truncate(RECENTLY_COMPLETED_LIMIT);

        Self {
            in_progress,
            pending,
            recently_completed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.in_progress.is_empty() && self.pending.is_empty() && self.recently_completed.is_empty()
    }
}

fn with_status(tasks: &[Task], status: TaskStatus) -> Vec<&Task> {
    tasks.iter().filter(|t| t.status == status).collect()
}

fn finished_at(task: &Task) -> chrono::DateTime<chrono::Utc> {
    task.completed_at.unwrap_or(task.updated_at)
}

/// The task whose thoughts are on screen: the active one, else the first
/// completed one.
pub fn focus_task(tasks: &[Task]) -> Option<&Task> {
    active_task(tasks).or_else(|| tasks.iter().find(|t| t.status == TaskStatus::Completed))
}

/// Thoughts belonging to one task, in arrival order.
pub fn thoughts_for_task<'a>(thoughts: &'a [ThoughtEvent], task_id: &TaskId) -> Vec<&'a ThoughtEvent> {
    thoughts
        .iter()
        .filter(|t| t.task_id.as_ref() == Some(task_id))
        .collect()
}
