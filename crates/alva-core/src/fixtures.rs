//! Ready-made rows for tests and the mock backend.
//!
//! Every builder fills the columns a real row would carry so the values
//! survive a trip through `serde_json` exactly like backend rows do.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::ids::{ActivityId, StepId, TaskId, ThoughtId};
use crate::model::{
    ActivityEvent, Actor, StepStatus, Task, TaskStatus, TaskStep, ThoughtEvent, ThoughtType,
    PRIORITY_DEFAULT,
};

/// 2026-10-16T08:00:00Z, the reference instant fixtures are stamped with.
pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_792_137_600, 0).unwrap_or_default()
}

pub fn task(id: &str, status: TaskStatus) -> Task {
    Task {
        id: TaskId::from_raw(id),
        title: format!("task {id}"),
        description: None,
        status,
        priority: PRIORITY_DEFAULT,
        created_by: Actor::Human,
        assigned_to: Some(Actor::Assistant.as_str().to_string()),
        estimated_minutes: None,
        actual_minutes: None,
        started_at: None,
        completed_at: None,
        result: None,
        error: None,
        sort_order: 0,
        created_at: base_time(),
        updated_at: base_time(),
    }
}

pub fn task_with_estimate(id: &str, status: TaskStatus, minutes: Option<u32>) -> Task {
    Task {
        estimated_minutes: minutes,
        ..task(id, status)
    }
}

pub fn step(
    id: &str,
    task_id: &str,
    parent: Option<&str>,
    status: StepStatus,
    sort_order: i32,
) -> TaskStep {
    TaskStep {
        id: StepId::from_raw(id),
        task_id: TaskId::from_raw(task_id),
        parent_step_id: parent.map(StepId::from_raw),
        title: format!("step {id}"),
        status,
        sort_order,
        created_at: Some(base_time()),
    }
}

pub fn thought(id: &str, task_id: Option<&str>, step_number: u32) -> ThoughtEvent {
    ThoughtEvent {
        id: ThoughtId::from_raw(id),
        task_id: task_id.map(TaskId::from_raw),
        step_number,
        thought_type: ThoughtType::Thinking,
        content: format!("thought {step_number}"),
        tool_used: None,
        duration_ms: None,
        created_at: base_time() + Duration::seconds(i64::from(step_number)),
    }
}

pub fn activity(id: &str, created_at: DateTime<Utc>) -> ActivityEvent {
    ActivityEvent {
        id: ActivityId::from_raw(id),
        action: "note".into(),
        summary: format!("activity {id}"),
        details: None,
        source: Actor::Assistant,
        created_at,
    }
}

/// JSON row for any record, as the REST API or change feed would carry it.
pub fn row<T: Serialize>(record: &T) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}
