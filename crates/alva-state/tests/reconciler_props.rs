use std::collections::HashSet;

use alva_core::fixtures::{activity, base_time, task};
use alva_core::{Change, TaskId, TaskStatus, ACTIVITY_LIMIT};
use alva_state::Collections;
use chrono::Duration;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Insert(u8),
    Update(u8),
    Delete(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8).prop_map(Op::Insert),
        (0u8..8).prop_map(Op::Update),
        (0u8..8).prop_map(Op::Delete),
    ]
}

fn id(n: u8) -> String {
    format!("t{n}")
}

fn positions(c: &Collections) -> Vec<String> {
    c.tasks().iter().map(|t| t.id.to_string()).collect()
}

proptest! {
    #[test]
    fn one_record_per_identity(ops in proptest::collection::vec(op(), 0..64)) {
        let mut c = Collections::new();
        let mut live: HashSet<String> = HashSet::new();
        for op in ops {
            match op {
                Op::Insert(n) => {
                    c.tasks.apply(Change::Insert(task(&id(n), TaskStatus::Pending)));
                    live.insert(id(n));
                }
                Op::Update(n) => {
                    c.tasks.apply(Change::Update(task(&id(n), TaskStatus::InProgress)));
                }
                Op::Delete(n) => {
                    c.tasks.apply(Change::Delete(TaskId::from_raw(id(n))));
                    live.remove(&id(n));
                }
            }
            let ids = positions(&c);
            let distinct: HashSet<_> = ids.iter().cloned().collect();
            prop_assert_eq!(ids.len(), distinct.len());
            prop_assert_eq!(&distinct, &live);
        }
    }

    #[test]
    fn update_preserves_position(
        inserts in proptest::collection::vec(0u8..16, 1..32),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut c = Collections::new();
        for n in &inserts {
            c.tasks.apply(Change::Insert(task(&id(*n), TaskStatus::Pending)));
        }
        let before = positions(&c);
        let target = pick.get(&before).clone();
        c.tasks.apply(Change::Update(task(&target, TaskStatus::Completed)));
        prop_assert_eq!(positions(&c), before);
        let updated = c.tasks.get(&TaskId::from_raw(target.as_str())).map(|t| t.status);
        prop_assert_eq!(updated, Some(TaskStatus::Completed));
    }

    #[test]
    fn activity_holds_newest_fifty(count in 0usize..160) {
        let mut c = Collections::new();
        for i in 0..count {
            let at = base_time() + Duration::seconds(i as i64);
            c.activities.apply(Change::Insert(activity(&format!("a{i}"), at)));
            prop_assert!(c.activities.len() <= ACTIVITY_LIMIT);
        }
        let expected: Vec<String> = (0..count)
            .rev()
            .take(ACTIVITY_LIMIT)
            .map(|i| format!("a{i}"))
            .collect();
        let actual: Vec<String> = c.activities().iter().map(|a| a.id.to_string()).collect();
        prop_assert_eq!(actual, expected);
    }
}
