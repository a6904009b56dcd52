//! Correlates task commands with the notifications that confirm them.
//!
//! The cache never changes when a command returns; it changes when the
//! matching notification arrives. Until then the command is pending.

use std::collections::VecDeque;

use alva_core::{ChangeKind, RawChange, Table, TaskId};

use crate::collections::Collections;

/// How many recently inserted task ids are remembered for late create
/// responses.
const RECENT_INSERTS: usize = 256;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingCommands {
    creates: Vec<TaskId>,
    deletes: Vec<TaskId>,
    /// Newest last.
    inserted: VecDeque<TaskId>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a created task until its INSERT shows up. Returns false when
    /// the notification already beat the command's response, even if the
    /// task has since been deleted again.
    pub fn expect_create(&mut self, id: TaskId, collections: &Collections) -> bool {
        if collections.tasks.contains(&id)
            || self.creates.contains(&id)
            || self.inserted.contains(&id)
        {
            return false;
        }
        self.creates.push(id);
        true
    }

    /// Track a deleted task until its DELETE shows up. Returns false when
    /// the task is already gone from the cache.
    pub fn expect_delete(&mut self, id: TaskId, collections: &Collections) -> bool {
        if !collections.tasks.contains(&id) || self.deletes.contains(&id) {
            return false;
        }
        self.deletes.push(id);
        true
    }

    /// Settle whatever pending command this notification confirms.
    /// Returns true if one was settled.
    pub fn observe(&mut self, change: &RawChange) -> bool {
        if change.table != Table::Tasks {
            return false;
        }
        let Some(id) = change.row_id() else {
            return false;
        };
        let pending = match change.kind {
            ChangeKind::Insert => {
                self.remember_insert(TaskId::from_raw(id));
                &mut self.creates
            }
            ChangeKind::Delete => &mut self.deletes,
            ChangeKind::Update => return false,
        };
        let before = pending.len();
        pending.retain(|p| p.as_str() != id);
        pending.len() != before
    }

    /// Settle commands a fresh fetch of the tasks table already reflects.
    /// Returns true if any were settled.
    pub fn settle_seeded(&mut self, collections: &Collections) -> bool {
        let before = self.creates.len() + self.deletes.len();
        self.creates.retain(|id| !collections.tasks.contains(id));
        self.deletes.retain(|id| collections.tasks.contains(id));
        self.creates.len() + self.deletes.len() != before
    }

    fn remember_insert(&mut self, id: TaskId) {
        if self.inserted.contains(&id) {
            return;
        }
        if self.inserted.len() == RECENT_INSERTS {
            self.inserted.pop_front();
        }
        self.inserted.push_back(id);
    }

    pub fn is_pending_create(&self, id: &TaskId) -> bool {
        self.creates.contains(id)
    }

    pub fn is_pending_delete(&self, id: &TaskId) -> bool {
        self.deletes.contains(id)
    }

    pub fn creates(&self) -> &[TaskId] {
        &self.creates
    }

    pub fn deletes(&self) -> &[TaskId] {
        &self.deletes
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.deletes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alva_core::fixtures::{row, task};
    use alva_core::{Change, TaskStatus};

    #[test]
    fn create_settles_on_insert() {
        let collections = Collections::new();
        let mut pending = PendingCommands::new();
        let id = TaskId::from_raw("t1");
        assert!(pending.expect_create(id.clone(), &collections));
        assert!(pending.is_pending_create(&id));

        let insert = RawChange::insert(Table::Tasks, row(&task("t1", TaskStatus::Pending)));
        assert!(pending.observe(&insert));
        assert!(pending.is_empty());
    }

    #[test]
    fn create_not_tracked_when_insert_arrived_first() {
        let mut collections = Collections::new();
        collections.tasks.apply(Change::Insert(task("t1", TaskStatus::Pending)));
        let mut pending = PendingCommands::new();
        assert!(!pending.expect_create(TaskId::from_raw("t1"), &collections));
        assert!(pending.is_empty());
    }

    #[test]
    fn create_not_tracked_when_insert_and_delete_arrived_first() {
        let mut collections = Collections::new();
        let mut pending = PendingCommands::new();
        let insert = RawChange::insert(Table::Tasks, row(&task("t1", TaskStatus::Pending)));
        let delete = RawChange::delete(Table::Tasks, "t1");
        for change in [&insert, &delete] {
            pending.observe(change);
            collections.apply(change).unwrap();
        }
        assert!(!collections.tasks.contains(&TaskId::from_raw("t1")));
        assert!(!pending.expect_create(TaskId::from_raw("t1"), &collections));
        assert!(pending.is_empty());
    }

    #[test]
    fn remembered_inserts_are_bounded() {
        let mut pending = PendingCommands::new();
        for i in 0..=RECENT_INSERTS {
            let id = format!("t{i}");
            pending.observe(&RawChange::insert(Table::Tasks, row(&task(&id, TaskStatus::Pending))));
        }
        let collections = Collections::new();
        assert!(pending.expect_create(TaskId::from_raw("t0"), &collections));
        assert!(!pending.expect_create(TaskId::from_raw("t1"), &collections));
    }

    #[test]
    fn delete_settles_on_delete() {
        let mut collections = Collections::new();
        collections.tasks.apply(Change::Insert(task("t1", TaskStatus::Pending)));
        let mut pending = PendingCommands::new();
        let id = TaskId::from_raw("t1");
        assert!(pending.expect_delete(id.clone(), &collections));
        assert!(pending.is_pending_delete(&id));

        assert!(!pending.observe(&RawChange::update(Table::Tasks, row(&task("t1", TaskStatus::Pending)))));
        assert!(pending.observe(&RawChange::delete(Table::Tasks, "t1")));
        assert!(pending.deletes().is_empty());
    }

    #[test]
    fn delete_of_unknown_task_not_tracked() {
        let collections = Collections::new();
        let mut pending = PendingCommands::new();
        assert!(!pending.expect_delete(TaskId::from_raw("nope"), &collections));
    }

    #[test]
    fn refetch_settles_what_it_reflects() {
        let mut collections = Collections::new();
        collections.tasks.apply(Change::Insert(task("gone", TaskStatus::Pending)));
        let mut pending = PendingCommands::new();
        assert!(pending.expect_create(TaskId::from_raw("new"), &collections));
        assert!(pending.expect_delete(TaskId::from_raw("gone"), &collections));
        assert!(pending.expect_create(TaskId::from_raw("slow"), &collections));

        collections.seed(Table::Tasks, vec![row(&task("new", TaskStatus::Pending))]);
        assert!(pending.settle_seeded(&collections));
        assert_eq!(pending.creates(), &[TaskId::from_raw("slow")]);
        assert!(pending.deletes().is_empty());
        assert!(!pending.settle_seeded(&collections));
    }

    #[test]
    fn other_tables_never_settle() {
        let mut pending = PendingCommands::new();
        pending.expect_create(TaskId::from_raw("x"), &Collections::new());
        assert!(!pending.observe(&RawChange::delete(Table::TaskSteps, "x")));
        assert_eq!(pending.creates().len(), 1);
    }
}
