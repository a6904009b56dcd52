//! The reconciler: folds change-feed notifications into ordered, bounded
//! in-memory mirrors of the backend tables.
//!
//! Identity is the only matching key. INSERT is an upsert, so a redelivered
//! insert replaces the cached row in place instead of duplicating it.

use std::collections::HashMap;

use serde_json::Value;

use alva_core::change::decode_rows;
use alva_core::{
    ActivityEvent, Change, ChangeKind, DecodeError, RawChange, Record, StepId, Table, Task, TaskId,
    TaskStep, ThoughtEvent, ACTIVITY_LIMIT,
};

/// Where newly inserted records land.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Front,
    Back,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// UPDATE or DELETE for a row we don't hold.
    UnknownIdentity,
    /// The collection doesn't take this kind of change (e.g. UPDATE on an
    /// append-only log).
    UnsupportedKind(ChangeKind),
    /// Accepting the step would hang a step under a parent from another
    /// task, whichever of the two arrived first.
    ParentInOtherTask,
}

/// Outcome of applying one notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    Removed,
    Ignored(IgnoreReason),
}

impl Applied {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Ignored(_))
    }
}

/// Rows a bulk fetch delivered that didn't make it into the collection.
#[derive(Debug, Default, PartialEq)]
pub struct SeedReport {
    pub undecodable: Vec<DecodeError>,
    /// Steps whose parent belongs to another task.
    pub rejected: Vec<StepId>,
}

impl SeedReport {
    pub fn is_clean(&self) -> bool {
        self.undecodable.is_empty() && self.rejected.is_empty()
    }
}

/// An ordered mirror of one table.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderedCollection<T: Record> {
    items: Vec<T>,
    placement: Placement,
    cap: Option<usize>,
    accepted: &'static [ChangeKind],
}

impl<T: Record> OrderedCollection<T> {
    pub fn new(placement: Placement, cap: Option<usize>, accepted: &'static [ChangeKind]) -> Self {
        Self {
            items: Vec::new(),
            placement,
            cap,
            accepted,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.position(id).map(|i| &self.items[i])
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &T::Id) -> Option<usize> {
        self.items.iter().position(|r| r.id() == id)
    }

    /// Replace the contents with a bulk-fetch result, already in
    /// collection order. Repeated identities keep their first occurrence.
    pub fn seed(&mut self, records: Vec<T>) {
        self.items.clear();
        for record in records {
            if !self.contains(record.id()) {
                self.items.push(record);
            }
        }
        self.enforce_cap();
    }

    pub fn apply(&mut self, change: Change<T>) -> Applied {
        let kind = change.kind();
        if !self.accepted.contains(&kind) {
            return Applied::Ignored(IgnoreReason::UnsupportedKind(kind));
        }
        match change {
            Change::Insert(record) => match self.position(record.id()) {
                Some(i) => {
                    self.items[i] = record;
                    Applied::Replaced
                }
                None => {
                    match self.placement {
                        Placement::Front => self.items.insert(0, record),
                        Placement::Back => self.items.push(record),
                    }
                    self.enforce_cap();
                    Applied::Inserted
                }
            },
            Change::Update(record) => match self.position(record.id()) {
                Some(i) => {
                    self.items[i] = record;
                    Applied::Replaced
                }
                None => Applied::Ignored(IgnoreReason::UnknownIdentity),
            },
            Change::Delete(id) => match self.position(&id) {
                Some(i) => {
                    self.items.remove(i);
                    Applied::Removed
                }
                None => Applied::Ignored(IgnoreReason::UnknownIdentity),
            },
        }
    }

    /// Drop the oldest entries beyond the cap. "Oldest" is the end the
    /// collection doesn't insert at.
    fn enforce_cap(&mut self) {
        let Some(cap) = self.cap else { return };
        if self.items.len() <= cap {
            return;
        }
        match self.placement {
            Placement::Front => self.items.truncate(cap),
            Placement::Back => {
                let excess = self.items.len() - cap;
                self.items.drain(..excess);
            }
        }
    }
}

/// The four mirrored tables, each with its required order and bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct Collections {
    /// Newest first.
    pub tasks: OrderedCollection<Task>,
    /// Arrival order; plan order comes from `sort_order`.
    pub steps: OrderedCollection<TaskStep>,
    /// Oldest first.
    pub thoughts: OrderedCollection<ThoughtEvent>,
    /// Newest first, at most [`ACTIVITY_LIMIT`].
    pub activities: OrderedCollection<ActivityEvent>,
}

impl Default for Collections {
    fn default() -> Self {
        Self::new()
    }
}

impl Collections {
    pub fn new() -> Self {
        Self {
            tasks: OrderedCollection::new(Placement::Front, None, Table::Tasks.feed_kinds()),
            steps: OrderedCollection::new(Placement::Back, None, Table::TaskSteps.feed_kinds()),
            thoughts: OrderedCollection::new(Placement::Back, None, Table::ThoughtLog.feed_kinds()),
            activities: OrderedCollection::new(
                Placement::Front,
                Some(ACTIVITY_LIMIT),
                Table::ActivityLog.feed_kinds(),
            ),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        self.tasks.items()
    }

    pub fn steps(&self) -> &[TaskStep] {
        self.steps.items()
    }

    pub fn thoughts(&self) -> &[ThoughtEvent] {
        self.thoughts.items()
    }

    pub fn activities(&self) -> &[ActivityEvent] {
        self.activities.items()
    }

    /// Seed one table from bulk-fetch rows. Rows that don't decode, and
    /// steps linked across tasks, are skipped and reported.
    pub fn seed(&mut self, table: Table, rows: Vec<Value>) -> SeedReport {
        match table {
            Table::Tasks => seed_rows(&mut self.tasks, rows),
            Table::TaskSteps => self.seed_steps(rows),
            Table::ThoughtLog => seed_rows(&mut self.thoughts, rows),
            Table::ActivityLog => seed_rows(&mut self.activities, rows),
        }
    }

    /// The parent check runs against the whole fetch, so row order
    /// doesn't matter. The child is the one dropped.
    fn seed_steps(&mut self, rows: Vec<Value>) -> SeedReport {
        let (records, undecodable) = decode_rows::<TaskStep>(rows);
        let owners: HashMap<&StepId, &TaskId> = records.iter().map(|s| (&s.id, &s.task_id)).collect();
        let (kept, rejected): (Vec<&TaskStep>, Vec<&TaskStep>) = records.iter().partition(|s| {
            s.parent_step_id
                .as_ref()
                .and_then(|parent| owners.get(parent))
                .map_or(true, |owner| **owner == s.task_id)
        });
        let rejected = rejected.into_iter().map(|s| s.id.clone()).collect();
        let kept = kept.into_iter().cloned().collect();
        self.steps.seed(kept);
        SeedReport {
            undecodable,
            rejected,
        }
    }

    /// Decode a raw notification and route it to its collection.
    pub fn apply(&mut self, raw: &RawChange) -> Result<Applied, DecodeError> {
        Ok(match raw.table {
            Table::Tasks => self.tasks.apply(Change::decode(raw)?),
            Table::TaskSteps => self.apply_step(Change::decode(raw)?),
            Table::ThoughtLog => self.thoughts.apply(Change::decode(raw)?),
            Table::ActivityLog => self.activities.apply(Change::decode(raw)?),
        })
    }

    /// Steps additionally keep the plan inside one task: a step may not
    /// hang under a parent from a different task, and a parent may not
    /// move to (or arrive in) a task other than its cached children's.
    pub fn apply_step(&mut self, change: Change<TaskStep>) -> Applied {
        if let Change::Insert(step) | Change::Update(step) = &change {
            if self.links_across_tasks(step) {
                return Applied::Ignored(IgnoreReason::ParentInOtherTask);
            }
        }
        self.steps.apply(change)
    }

    fn links_across_tasks(&self, step: &TaskStep) -> bool {
        let parent_elsewhere = step
            .parent_step_id
            .as_ref()
            .and_then(|parent| self.steps.get(parent))
            .is_some_and(|parent| parent.task_id != step.task_id);
        let child_elsewhere = self
            .steps()
            .iter()
            .any(|s| s.parent_step_id.as_ref() == Some(&step.id) && s.task_id != step.task_id);
        parent_elsewhere || child_elsewhere
    }
}

fn seed_rows<T: Record>(collection: &mut OrderedCollection<T>, rows: Vec<Value>) -> SeedReport {
    let (records, undecodable) = decode_rows::<T>(rows);
    collection.seed(records);
    SeedReport {
        undecodable,
        rejected: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alva_core::fixtures::{self, activity, base_time, row, step, task, thought};
    use alva_core::{StepStatus, TaskId, TaskStatus};
    use chrono::Duration;

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn task_insert_prepends() {
        let mut c = Collections::new();
        c.tasks.apply(Change::Insert(task("a", TaskStatus::Pending)));
        c.tasks.apply(Change::Insert(task("b", TaskStatus::Pending)));
        assert_eq!(ids(c.tasks()), vec!["b", "a"]);
    }

    #[test]
    fn task_update_replaces_in_place() {
        let mut c = Collections::new();
        for id in ["a", "b", "c"] {
            c.tasks.apply(Change::Insert(task(id, TaskStatus::Pending)));
        }
        let outcome = c.tasks.apply(Change::Update(task("b", TaskStatus::InProgress)));
        assert_eq!(outcome, Applied::Replaced);
        assert_eq!(ids(c.tasks()), vec!["c", "b", "a"]);
        assert_eq!(c.tasks()[1].status, TaskStatus::InProgress);
    }

    #[test]
    fn task_delete_removes() {
        let mut c = Collections::new();
        c.tasks.apply(Change::Insert(task("a", TaskStatus::Pending)));
        c.tasks.apply(Change::Insert(task("b", TaskStatus::Pending)));
        assert_eq!(c.tasks.apply(Change::Delete(TaskId::from_raw("a"))), Applied::Removed);
        assert_eq!(ids(c.tasks()), vec!["b"]);
    }

    #[test]
    fn unknown_identity_is_ignored() {
        let mut c = Collections::new();
        let update = c.tasks.apply(Change::Update(task("ghost", TaskStatus::Completed)));
        let delete = c.tasks.apply(Change::Delete(TaskId::from_raw("ghost")));
        assert_eq!(update, Applied::Ignored(IgnoreReason::UnknownIdentity));
        assert_eq!(delete, Applied::Ignored(IgnoreReason::UnknownIdentity));
        assert!(c.tasks.is_empty());
    }

    #[test]
    fn duplicate_insert_upserts() {
        let mut c = Collections::new();
        c.tasks.apply(Change::Insert(task("a", TaskStatus::Pending)));
        c.tasks.apply(Change::Insert(task("b", TaskStatus::Pending)));
        let again = c.tasks.apply(Change::Insert(task("a", TaskStatus::InProgress)));
        assert_eq!(again, Applied::Replaced);
        assert_eq!(ids(c.tasks()), vec!["b", "a"]);
        assert_eq!(c.tasks()[1].status, TaskStatus::InProgress);
    }

    #[test]
    fn steps_append_and_replace() {
        let mut c = Collections::new();
        c.apply_step(Change::Insert(step("s1", "t", None, StepStatus::Pending, 2)));
        c.apply_step(Change::Insert(step("s2", "t", None, StepStatus::Pending, 1)));
        c.apply_step(Change::Update(step("s1", "t", None, StepStatus::Completed, 2)));
        let order: Vec<_> = c.steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["s1", "s2"]);
        assert_eq!(c.steps()[0].status, StepStatus::Completed);
    }

    #[test]
    fn step_parent_must_share_task() {
        let mut c = Collections::new();
        c.apply_step(Change::Insert(step("m1", "t1", None, StepStatus::Pending, 1)));
        let outcome = c.apply_step(Change::Insert(step("x", "t2", Some("m1"), StepStatus::Pending, 1)));
        assert_eq!(outcome, Applied::Ignored(IgnoreReason::ParentInOtherTask));
        let ok = c.apply_step(Change::Insert(step("y", "t1", Some("m1"), StepStatus::Pending, 1)));
        assert_eq!(ok, Applied::Inserted);
        assert_eq!(c.steps.len(), 2);
    }

    #[test]
    fn parent_arriving_after_child_from_other_task_is_rejected() {
        let mut c = Collections::new();
        let child = c.apply_step(Change::Insert(step("x", "t2", Some("m1"), StepStatus::Pending, 1)));
        assert_eq!(child, Applied::Inserted);
        let parent = c.apply_step(Change::Insert(step("m1", "t1", None, StepStatus::Pending, 1)));
        assert_eq!(parent, Applied::Ignored(IgnoreReason::ParentInOtherTask));
        let same_task = c.apply_step(Change::Insert(step("m1", "t2", None, StepStatus::Pending, 1)));
        assert_eq!(same_task, Applied::Inserted);
        assert_eq!(c.steps.len(), 2);
    }

    #[test]
    fn parent_cannot_move_away_from_its_children() {
        let mut c = Collections::new();
        c.apply_step(Change::Insert(step("m1", "t1", None, StepStatus::Pending, 1)));
        c.apply_step(Change::Insert(step("s1", "t1", Some("m1"), StepStatus::Pending, 1)));
        let moved = c.apply_step(Change::Update(step("m1", "t2", None, StepStatus::Pending, 1)));
        assert_eq!(moved, Applied::Ignored(IgnoreReason::ParentInOtherTask));
        assert_eq!(c.steps.get(&StepId::from_raw("m1")).map(|s| s.task_id.as_str()), Some("t1"));
    }

    #[test]
    fn seed_drops_children_linked_across_tasks() {
        let mut c = Collections::new();
        let rows = vec![
            row(&step("x", "t2", Some("m1"), StepStatus::Pending, 1)),
            row(&step("m1", "t1", None, StepStatus::Pending, 1)),
            row(&step("s1", "t1", Some("m1"), StepStatus::Pending, 2)),
            row(&step("lost", "t1", Some("gone"), StepStatus::Pending, 3)),
        ];
        let report = c.seed(Table::TaskSteps, rows);
        assert_eq!(report.rejected, vec![StepId::from_raw("x")]);
        assert!(report.undecodable.is_empty());
        let kept: Vec<_> = c.steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(kept, vec!["m1", "s1", "lost"]);
    }

    #[test]
    fn thoughts_are_append_only() {
        let mut c = Collections::new();
        c.thoughts.apply(Change::Insert(thought("th1", None, 1)));
        c.thoughts.apply(Change::Insert(thought("th2", None, 2)));
        let update = c.thoughts.apply(Change::Update(thought("th1", None, 9)));
        assert_eq!(update, Applied::Ignored(IgnoreReason::UnsupportedKind(ChangeKind::Update)));
        let order: Vec<_> = c.thoughts().iter().map(|t| t.step_number).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn activities_are_capped_newest_first() {
        let mut c = Collections::new();
        for i in 0..(ACTIVITY_LIMIT + 7) {
            let at = base_time() + Duration::seconds(i as i64);
            c.activities.apply(Change::Insert(activity(&format!("a{i}"), at)));
        }
        assert_eq!(c.activities.len(), ACTIVITY_LIMIT);
        assert_eq!(c.activities()[0].id.as_str(), format!("a{}", ACTIVITY_LIMIT + 6));
        assert_eq!(c.activities()[ACTIVITY_LIMIT - 1].id.as_str(), "a7");
    }

    #[test]
    fn seed_truncates_activity() {
        let mut c = Collections::new();
        let rows: Vec<_> = (0..60)
            .map(|i| row(&activity(&format!("a{i}"), base_time())))
            .collect();
        let report = c.seed(Table::ActivityLog, rows);
        assert!(report.is_clean());
        assert_eq!(c.activities.len(), ACTIVITY_LIMIT);
        assert_eq!(c.activities()[0].id.as_str(), "a0");
    }

    #[test]
    fn seed_reports_bad_rows() {
        let mut c = Collections::new();
        let rows = vec![
            row(&task("a", TaskStatus::Pending)),
            serde_json::json!({"id": "broken"}),
        ];
        let report = c.seed(Table::Tasks, rows);
        assert_eq!(report.undecodable.len(), 1);
        assert_eq!(ids(c.tasks()), vec!["a"]);
    }

    #[test]
    fn raw_changes_route_by_table() {
        let mut c = Collections::new();
        let raw = RawChange::insert(Table::Tasks, row(&task("a", TaskStatus::Pending)));
        assert_eq!(c.apply(&raw), Ok(Applied::Inserted));
        let raw = RawChange::delete(Table::Tasks, "a");
        assert_eq!(c.apply(&raw), Ok(Applied::Removed));
        let raw = RawChange::insert(Table::ThoughtLog, row(&fixtures::thought("th", Some("a"), 1)));
        assert_eq!(c.apply(&raw), Ok(Applied::Inserted));
        assert!(c.tasks.is_empty());
        assert_eq!(c.thoughts.len(), 1);
    }

    #[test]
    fn malformed_raw_change_is_an_error() {
        let mut c = Collections::new();
        let raw = RawChange::insert(Table::Tasks, serde_json::json!({"id": "a", "status": "weird"}));
        assert!(c.apply(&raw).is_err());
        assert!(c.tasks.is_empty());
    }
}
