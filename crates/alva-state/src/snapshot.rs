use chrono::{DateTime, Utc};

use alva_core::{Table, Task, TaskId, ThoughtEvent};

use crate::collections::Collections;
use crate::commands::PendingCommands;
use crate::derived::DerivedState;
use crate::pipeline::{focus_task, thoughts_for_task, TaskPipeline};
use crate::steps::StepTree;

/// One immutable view of the dashboard, published after every change.
#[derive(Clone, Debug, PartialEq)]
pub struct DashboardSnapshot {
    pub collections: Collections,
    /// True until every bulk fetch has settled.
    pub loading: bool,
    pub pending: PendingCommands,
    /// Feeds that are not live right now. Their collections keep what was
    /// last fetched until the feed rejoins.
    pub stale_feeds: Vec<Table>,
    /// Bumped on every publication.
    pub revision: u64,
}

impl Default for DashboardSnapshot {
    fn default() -> Self {
        Self::loading()
    }
}

impl DashboardSnapshot {
    /// The state before any fetch has returned.
    pub fn loading() -> Self {
        Self {
            collections: Collections::new(),
            loading: true,
            pending: PendingCommands::new(),
            stale_feeds: Vec::new(),
            revision: 0,
        }
    }

    pub fn derive(&self, now: DateTime<Utc>) -> DerivedState<'_> {
        DerivedState::compute(&self.collections, now)
    }

    pub fn pipeline(&self) -> TaskPipeline<'_> {
        TaskPipeline::build(self.collections.tasks())
    }

    pub fn focus_task(&self) -> Option<&Task> {
        focus_task(self.collections.tasks())
    }

    /// Thoughts of the focus task, oldest first.
    pub fn focus_thoughts(&self) -> Vec<&ThoughtEvent> {
        match self.focus_task() {
            Some(task) => thoughts_for_task(self.collections.thoughts(), &task.id),
            None => Vec::new(),
        }
    }

    pub fn step_tree(&self, task_id: &TaskId) -> StepTree<'_> {
        StepTree::for_task(self.collections.steps(), task_id)
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.collections.tasks.get(id)
    }
}
