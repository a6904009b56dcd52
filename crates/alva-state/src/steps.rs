use std::collections::HashMap;

use alva_core::{StepId, StepStatus, TaskId, TaskStep};

/// A milestone with its substeps in plan order.
#[derive(Clone, Debug, PartialEq)]
pub struct Milestone<'a> {
    pub step: &'a TaskStep,
    pub substeps: Vec<&'a TaskStep>,
}

/// Two-level plan rebuilt from a flat list of steps.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepTree<'a> {
    pub milestones: Vec<Milestone<'a>>,
    /// Substeps whose parent isn't among the given steps.
    pub orphans: Vec<&'a TaskStep>,
    pub total: usize,
    pub completed: usize,
}

impl<'a> StepTree<'a> {
    pub fn build(steps: &'a [TaskStep]) -> Self {
        Self::from_steps(steps.iter())
    }

    /// Tree for one task out of the full step collection.
    pub fn for_task(steps: &'a [TaskStep], task_id: &TaskId) -> Self {
        Self::from_steps(steps_for_task(steps, task_id))
    }

    fn from_steps(steps: impl Iterator<Item = &'a TaskStep>) -> Self {
        let mut milestones: Vec<&TaskStep> = Vec::new();
        let mut children: HashMap<&StepId, Vec<&TaskStep>> = HashMap::new();
        let mut total = 0;
        let mut completed = 0;

        for step in steps {
            total += 1;
            if step.status == StepStatus::Completed {
                completed += 1;
            }
            match &step.parent_step_id {
                None => milestones.push(step),
                Some(parent) => children.entry(parent).or_default().push(step),
            }
        }

        milestones.sort_by_key(|s| s.sort_order);
        let milestones: Vec<Milestone<'a>> = milestones
            .into_iter()
            .map(|step| {
                let mut substeps = children.remove(&step.id).unwrap_or_default();
                substeps.sort_by_key(|s| s.sort_order);
                Milestone { step, substeps }
            })
            .collect();

        let mut orphans: Vec<&TaskStep> = children.into_values().flatten().collect();
        orphans.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.id.cmp(&b.id)));

        Self {
            milestones,
            orphans,
            total,
            completed,
        }
    }

    /// round(100 × completed / total), halves rounding up; 0 for an empty plan.
    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.completed, self.total)
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (200 * completed + total) / (2 * total);
    pct.min(100) as u8
}

pub fn steps_for_task<'a, 'b>(
    steps: &'a [TaskStep],
    task_id: &'b TaskId,
) -> impl Iterator<Item = &'a TaskStep> + 'b
where
    'a: 'b,
{
    steps.iter().filter(move |s| &s.task_id == task_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alva_core::fixtures::step;

    fn titles(steps: &[&TaskStep]) -> Vec<String> {
        steps.iter().map(|s| s.id.to_string()).collect()
    }

    #[test]
    fn partitions_and_sorts() {
        let steps = vec![
            step("m2", "t", None, StepStatus::Pending, 2),
            step("s1b", "t", Some("m1"), StepStatus::Pending, 2),
            step("m1", "t", None, StepStatus::Completed, 1),
            step("s1a", "t", Some("m1"), StepStatus::Completed, 1),
            step("s2a", "t", Some("m2"), StepStatus::Pending, 1),
        ];
        let tree = StepTree::build(&steps);
        let milestone_ids: Vec<_> = tree.milestones.iter().map(|m| m.step.id.as_str()).collect();
        assert_eq!(milestone_ids, vec!["m1", "m2"]);
        assert_eq!(titles(&tree.milestones[0].substeps), vec!["s1a", "s1b"]);
        assert_eq!(titles(&tree.milestones[1].substeps), vec!["s2a"]);
        assert!(tree.orphans.is_empty());
        assert_eq!((tree.completed, tree.total), (2, 5));
    }

    #[test]
    fn half_done_is_fifty_percent() {
        let steps = vec![
            step("a", "t", None, StepStatus::Completed, 1),
            step("b", "t", None, StepStatus::Completed, 2),
            step("c", "t", None, StepStatus::Pending, 3),
            step("d", "t", None, StepStatus::InProgress, 4),
        ];
        assert_eq!(StepTree::build(&steps).progress_percent(), 50);
    }

    #[test]
    fn empty_plan_is_zero_percent() {
        let tree = StepTree::build(&[]);
        assert!(tree.is_empty());
        assert_eq!(tree.progress_percent(), 0);
    }

    #[test]
    fn progress_rounds_half_up() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(1, 8), 13);
        assert_eq!(progress_percent(3, 3), 100);
    }

    #[test]
    fn skipped_steps_are_not_completed() {
        let steps = vec![
            step("a", "t", None, StepStatus::Skipped, 1),
            step("b", "t", None, StepStatus::Completed, 2),
        ];
        assert_eq!(StepTree::build(&steps).progress_percent(), 50);
    }

    #[test]
    fn orphans_are_reported() {
        let steps = vec![
            step("m1", "t", None, StepStatus::Pending, 1),
            step("lost", "t", Some("gone"), StepStatus::Pending, 1),
        ];
        let tree = StepTree::build(&steps);
        assert_eq!(tree.milestones.len(), 1);
        assert_eq!(titles(&tree.orphans), vec!["lost"]);
        assert_eq!(tree.total, 2);
    }

    #[test]
    fn for_task_filters_other_tasks() {
        let steps = vec![
            step("a", "t1", None, StepStatus::Completed, 1),
            step("b", "t2", None, StepStatus::Pending, 1),
            step("c", "t1", None, StepStatus::Pending, 2),
        ];
        let tree = StepTree::for_task(&steps, &TaskId::from_raw("t1"));
        assert_eq!(tree.total, 2);
        assert_eq!(tree.progress_percent(), 50);
    }
}
