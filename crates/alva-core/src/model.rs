use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::BackendError;
use crate::ids::{ActivityId, StepId, TaskId, ThoughtId};

/// Lowest and highest accepted task priorities. 1 is the most urgent.
pub const PRIORITY_HIGHEST: u8 = 1;
pub const PRIORITY_LOWEST: u8 = 5;
pub const PRIORITY_DEFAULT: u8 = 3;

/// Task lifecycle status as stored by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the task still needs work (counts toward time remaining).
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a row. The backend's check constraints use the
/// operator's and the assistant's names as tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    #[serde(rename = "alva")]
    Assistant,
    #[serde(rename = "erik")]
    Human,
    #[serde(rename = "system")]
    System,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assistant => "alva",
            Self::Human => "erik",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: u8,
    pub created_by: Actor,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub actual_minutes: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

/// One entry in a task's plan. Milestones have no parent; substeps point at
/// a milestone of the same task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: StepId,
    pub task_id: TaskId,
    #[serde(default)]
    pub parent_step_id: Option<StepId>,
    pub title: String,
    pub status: StepStatus,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl TaskStep {
    pub fn is_milestone(&self) -> bool {
        self.parent_step_id.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    Thinking,
    Planning,
    Executing,
    ToolCall,
    Result,
    Decision,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThoughtEvent {
    pub id: ThoughtId,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    pub step_number: u32,
    pub thought_type: ThoughtType,
    pub content: String,
    #[serde(default)]
    pub tool_used: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: ActivityId,
    pub action: String,
    pub summary: String,
    #[serde(default)]
    pub details: Option<Map<String, Value>>,
    pub source: Actor,
    pub created_at: DateTime<Utc>,
}

/// Payload of the insert-task command. The server assigns identity and
/// timestamps; status always starts as pending.
#[derive(Clone, Debug, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: u8,
    pub estimated_minutes: Option<u32>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: PRIORITY_DEFAULT,
            estimated_minutes: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimate(mut self, minutes: u32) -> Self {
        self.estimated_minutes = Some(minutes);
        self
    }

    /// Reject payloads the backend would refuse anyway.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.title.trim().is_empty() {
            return Err(BackendError::InvalidRequest("task title is required".into()));
        }
        if !(PRIORITY_HIGHEST..=PRIORITY_LOWEST).contains(&self.priority) {
            return Err(BackendError::InvalidRequest(format!(
                "priority must be between {PRIORITY_HIGHEST} and {PRIORITY_LOWEST}, got {}",
                self.priority
            )));
        }
        Ok(())
    }

    /// Row body for the insert. Blank optional text is sent as null.
    pub fn to_row(&self) -> Value {
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        serde_json::json!({
            "title": self.title.trim(),
            "description": description,
            "priority": self.priority,
            "estimated_minutes": self.estimated_minutes.filter(|m| *m > 0),
            "created_by": Actor::Human,
            "assigned_to": Actor::Assistant,
            "status": TaskStatus::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_row() -> Value {
        serde_json::json!({
            "id": "0b7e9f4e-1d1a-4c1e-9f00-000000000001",
            "title": "Summarise inbox",
            "description": null,
            "status": "in_progress",
            "priority": 2,
            "created_by": "erik",
            "assigned_to": "alva",
            "estimated_minutes": 15,
            "actual_minutes": null,
            "started_at": "2026-10-16T08:00:00+00:00",
            "completed_at": null,
            "result": null,
            "error": null,
            "sort_order": 0,
            "created_at": "2026-10-16T07:59:00.123456+00:00",
            "updated_at": "2026-10-16T08:00:00+00:00"
        })
    }

    #[test]
    fn task_decodes_from_rest_row() {
        let task: Task = serde_json::from_value(task_row()).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.created_by, Actor::Human);
        assert_eq!(task.estimated_minutes, Some(15));
        assert!(task.started_at.is_some());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let mut row = task_row();
        row["status"] = "paused".into();
        assert!(serde_json::from_value::<Task>(row).is_err());
    }

    #[test]
    fn step_without_parent_is_milestone() {
        let step: TaskStep = serde_json::from_value(serde_json::json!({
            "id": "s1",
            "task_id": "t1",
            "parent_step_id": null,
            "title": "Collect sources",
            "status": "pending",
            "sort_order": 1
        }))
        .unwrap();
        assert!(step.is_milestone());
        assert!(step.created_at.is_none());
    }

    #[test]
    fn thought_type_tags() {
        let t: ThoughtType = serde_json::from_str("\"tool_call\"").unwrap();
        assert_eq!(t, ThoughtType::ToolCall);
    }

    #[test]
    fn activity_source_uses_backend_tags() {
        let event: ActivityEvent = serde_json::from_value(serde_json::json!({
            "id": "a1",
            "action": "task_completed",
            "summary": "Finished summary",
            "details": {"task_id": "t1"},
            "source": "alva",
            "created_at": "2026-10-16T08:10:00Z"
        }))
        .unwrap();
        assert_eq!(event.source, Actor::Assistant);
        assert_eq!(event.details.unwrap()["task_id"], "t1");
    }

    #[test]
    fn new_task_row_applies_defaults() {
        let row = NewTask::new("  Write report ").with_description("   ").to_row();
        assert_eq!(row["title"], "Write report");
        assert!(row["description"].is_null());
        assert_eq!(row["priority"], 3);
        assert!(row["estimated_minutes"].is_null());
        assert_eq!(row["created_by"], "erik");
        assert_eq!(row["assigned_to"], "alva");
        assert_eq!(row["status"], "pending");
    }

    #[test]
    fn new_task_validation() {
        assert!(NewTask::new("ok").validate().is_ok());
        assert!(NewTask::new("   ").validate().is_err());
        assert!(NewTask::new("x").with_priority(0).validate().is_err());
        assert!(NewTask::new("x").with_priority(6).validate().is_err());
        assert!(NewTask::new("x").with_priority(1).with_estimate(30).validate().is_ok());
    }
}
