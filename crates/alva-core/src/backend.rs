use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::change::{FetchQuery, RawChange, Table};
use crate::errors::BackendError;
use crate::ids::TaskId;
use crate::model::{NewTask, Task};

/// Live change notifications for one table. Dropping the stream releases
/// the underlying subscription.
pub type ChangeStream = Pin<Box<dyn Stream<Item = RawChange> + Send>>;

/// The hosted backend as seen by the dashboard: bulk reads, per-table
/// change feeds, and the two task commands.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Value>, BackendError>;

    /// Open the change feed for `table`, filtered to [`Table::feed_kinds`].
    async fn subscribe(&self, table: Table) -> Result<ChangeStream, BackendError>;

    /// Insert a task and return the row the server created.
    async fn insert_task(&self, task: &NewTask) -> Result<Task, BackendError>;

    async fn delete_task(&self, id: &TaskId) -> Result<(), BackendError>;
}
