use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::ids::{ActivityId, StepId, TaskId, ThoughtId};
use crate::model::{ActivityEvent, Task, TaskStep, ThoughtEvent};

/// Number of activity rows kept client-side (and fetched at startup).
pub const ACTIVITY_LIMIT: usize = 50;

/// The four backend tables the dashboard mirrors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Tasks,
    TaskSteps,
    ThoughtLog,
    ActivityLog,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Tasks,
        Table::TaskSteps,
        Table::ThoughtLog,
        Table::ActivityLog,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::TaskSteps => "task_steps",
            Self::ThoughtLog => "thought_log",
            Self::ActivityLog => "activity_log",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Name of the realtime channel this table's feed is joined on.
    pub fn channel_name(self) -> &'static str {
        match self {
            Self::Tasks => "tasks-changes",
            Self::TaskSteps => "task-steps-changes",
            Self::ThoughtLog => "thoughts-changes",
            Self::ActivityLog => "activities-changes",
        }
    }

    /// Bulk read used to seed the collection before live changes apply.
    pub fn seed_query(self) -> FetchQuery {
        match self {
            Self::Tasks => FetchQuery::new(self, "created_at", Order::Descending),
            Self::TaskSteps => FetchQuery::new(self, "sort_order", Order::Ascending),
            Self::ThoughtLog => FetchQuery::new(self, "created_at", Order::Ascending),
            Self::ActivityLog => {
                FetchQuery::new(self, "created_at", Order::Descending).with_limit(ACTIVITY_LIMIT)
            }
        }
    }

    /// Change kinds the dashboard listens for on this table.
    pub fn feed_kinds(self) -> &'static [ChangeKind] {
        match self {
            Self::Tasks | Self::TaskSteps => {
                &[ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
            }
            Self::ThoughtLog | Self::ActivityLog => &[ChangeKind::Insert],
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// Ordered, optionally limited `select *` over one table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchQuery {
    pub table: Table,
    pub order_by: &'static str,
    pub order: Order,
    pub limit: Option<usize>,
}

impl FetchQuery {
    pub fn new(table: Table, order_by: &'static str, order: Order) -> Self {
        Self {
            table,
            order_by,
            order,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Row-level change type as tagged by the change feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An untyped notification straight off the change feed.
#[derive(Clone, Debug, PartialEq)]
pub struct RawChange {
    pub table: Table,
    pub kind: ChangeKind,
    /// New row for INSERT/UPDATE; empty object for DELETE.
    pub record: Value,
    /// Old row (at least its primary key) for UPDATE/DELETE.
    pub old_record: Value,
}

impl RawChange {
    pub fn insert(table: Table, record: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            record,
            old_record: Value::Object(Default::default()),
        }
    }

    pub fn update(table: Table, record: Value) -> Self {
        let old_record = serde_json::json!({ "id": record.get("id").cloned().unwrap_or(Value::Null) });
        Self {
            table,
            kind: ChangeKind::Update,
            record,
            old_record,
        }
    }

    pub fn delete(table: Table, id: &str) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            record: Value::Object(Default::default()),
            old_record: serde_json::json!({ "id": id }),
        }
    }

    /// Identity of the affected row, whichever side carries it.
    pub fn row_id(&self) -> Option<&str> {
        let side = match self.kind {
            ChangeKind::Delete => &self.old_record,
            ChangeKind::Insert | ChangeKind::Update => &self.record,
        };
        side.get("id").and_then(Value::as_str)
    }
}

/// A row type mirrored from one backend table.
pub trait Record: Clone + DeserializeOwned + Send + Sync + 'static {
    type Id: Clone + Eq + std::fmt::Debug + std::fmt::Display + DeserializeOwned + Send + Sync;
    const TABLE: Table;

    fn id(&self) -> &Self::Id;
}

impl Record for Task {
    type Id = TaskId;
    const TABLE: Table = Table::Tasks;
    fn id(&self) -> &TaskId {
        &self.id
    }
}

impl Record for TaskStep {
    type Id = StepId;
    const TABLE: Table = Table::TaskSteps;
    fn id(&self) -> &StepId {
        &self.id
    }
}

impl Record for ThoughtEvent {
    type Id = ThoughtId;
    const TABLE: Table = Table::ThoughtLog;
    fn id(&self) -> &ThoughtId {
        &self.id
    }
}

impl Record for ActivityEvent {
    type Id = ActivityId;
    const TABLE: Table = Table::ActivityLog;
    fn id(&self) -> &ActivityId {
        &self.id
    }
}

/// A typed notification for one record type.
#[derive(Clone, Debug, PartialEq)]
pub enum Change<T: Record> {
    Insert(T),
    Update(T),
    Delete(T::Id),
}

impl<T: Record> Change<T> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Insert(_) => ChangeKind::Insert,
            Self::Update(_) => ChangeKind::Update,
            Self::Delete(_) => ChangeKind::Delete,
        }
    }

    pub fn decode(raw: &RawChange) -> Result<Self, DecodeError> {
        let table = T::TABLE.as_str();
        if raw.table != T::TABLE {
            return Err(DecodeError::WrongTable {
                expected: table,
                actual: raw.table.as_str(),
            });
        }
        let malformed = |e: serde_json::Error| DecodeError::Malformed {
            table,
            reason: e.to_string(),
        };
        match raw.kind {
            ChangeKind::Insert => Ok(Self::Insert(
                serde_json::from_value(raw.record.clone()).map_err(malformed)?,
            )),
            ChangeKind::Update => Ok(Self::Update(
                serde_json::from_value(raw.record.clone()).map_err(malformed)?,
            )),
            ChangeKind::Delete => {
                let id = raw
                    .old_record
                    .get("id")
                    .filter(|v| !v.is_null())
                    .ok_or(DecodeError::MissingIdentity { table })?;
                Ok(Self::Delete(serde_json::from_value(id.clone()).map_err(malformed)?))
            }
        }
    }
}

/// Decode a bulk-fetch result, skipping (and reporting) rows that don't parse.
pub fn decode_rows<T: Record>(rows: Vec<Value>) -> (Vec<T>, Vec<DecodeError>) {
    let mut records = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();
    for row in rows {
        match serde_json::from_value::<T>(row) {
            Ok(record) => records.push(record),
            Err(e) => errors.push(DecodeError::Malformed {
                table: T::TABLE.as_str(),
                reason: e.to_string(),
            }),
        }
    }
    (records, errors)
}
