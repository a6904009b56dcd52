use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use alva_core::{
    Actor, Backend, BackendError, ChangeStream, FetchQuery, NewTask, RawChange, Table, Task,
    TaskId, TaskStatus,
};

#[derive(Default)]
struct MockState {
    rows: HashMap<Table, Vec<Value>>,
    fetch_failures: HashMap<Table, BackendError>,
    subscribe_failures: HashSet<Table>,
    subscribe_calls: Vec<Table>,
    command_failure: Option<BackendError>,
    feeds: HashMap<Table, Vec<mpsc::UnboundedSender<RawChange>>>,
    fetch_calls: Vec<Table>,
    inserted: Vec<Task>,
    deleted: Vec<TaskId>,
    echo: bool,
}

/// In-memory backend for deterministic tests without a network.
///
/// Fetches return the rows given up front; subscriptions are fed by
/// [`MockBackend::emit`]. Commands are recorded and, with
/// [`MockBackend::echo_commands`], answered by the matching notification.
pub struct MockBackend {
    state: Mutex<MockState>,
    fetch_gate: watch::Sender<bool>,
    subscribe_gate: watch::Sender<bool>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        let (fetch_gate, _) = watch::channel(true);
        let (subscribe_gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(MockState::default()),
            fetch_gate,
            subscribe_gate,
        }
    }

    pub fn with_rows(self, table: Table, rows: Vec<Value>) -> Self {
        self.set_rows(table, rows);
        self
    }

    /// Replace what later fetches of `table` return.
    pub fn set_rows(&self, table: Table, rows: Vec<Value>) {
        self.state.lock().rows.insert(table, rows);
    }

    pub fn fail_fetch(self, table: Table, error: BackendError) -> Self {
        self.state.lock().fetch_failures.insert(table, error);
        self
    }

    pub fn fail_subscribe(self, table: Table) -> Self {
        self.refuse_subscribe(table);
        self
    }

    /// Fail every subscribe to `table` until [`MockBackend::allow_subscribe`].
    pub fn refuse_subscribe(&self, table: Table) {
        self.state.lock().subscribe_failures.insert(table);
    }

    pub fn allow_subscribe(&self, table: Table) {
        self.state.lock().subscribe_failures.remove(&table);
    }

    pub fn fail_commands(self, error: BackendError) -> Self {
        self.state.lock().command_failure = Some(error);
        self
    }

    pub fn echo_commands(self) -> Self {
        self.state.lock().echo = true;
        self
    }

    /// Park every fetch until [`MockBackend::release_fetches`].
    pub fn hold_fetches(&self) {
        self.fetch_gate.send_replace(false);
    }

    pub fn release_fetches(&self) {
        self.fetch_gate.send_replace(true);
    }

    /// Park every subscribe until [`MockBackend::release_subscribes`].
    pub fn hold_subscribes(&self) {
        self.subscribe_gate.send_replace(false);
    }

    pub fn release_subscribes(&self) {
        self.subscribe_gate.send_replace(true);
    }

    /// End every live stream on `table`, as a dropped channel would.
    /// Returns how many ended.
    pub fn close_feed(&self, table: Table) -> usize {
        let mut state = self.state.lock();
        state
            .feeds
            .remove(&table)
            .map_or(0, |feeds| feeds.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Push a notification to every live subscriber of its table. Returns
    /// how many received it.
    pub fn emit(&self, change: RawChange) -> usize {
        let mut state = self.state.lock();
        let Some(feeds) = state.feeds.get_mut(&change.table) else {
            return 0;
        };
        feeds.retain(|tx| !tx.is_closed());
        feeds.iter().filter(|tx| tx.send(change.clone()).is_ok()).count()
    }

    /// Subscriptions on `table` whose stream is still alive.
    pub fn live_subscriptions(&self, table: Table) -> usize {
        self.state
            .lock()
            .feeds
            .get(&table)
            .map_or(0, |feeds| feeds.iter().filter(|tx| !tx.is_closed()).count())
    }

    pub fn fetch_calls(&self) -> Vec<Table> {
        self.state.lock().fetch_calls.clone()
    }

    /// Every subscribe attempt that got past the gate, refused ones included.
    pub fn subscribe_calls(&self) -> Vec<Table> {
        self.state.lock().subscribe_calls.clone()
    }

    pub fn inserted(&self) -> Vec<Task> {
        self.state.lock().inserted.clone()
    }

    pub fn deleted(&self) -> Vec<TaskId> {
        self.state.lock().deleted.clone()
    }

    fn command_failure(&self) -> Option<BackendError> {
        self.state.lock().command_failure.clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Value>, BackendError> {
        let mut gate = self.fetch_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut state = self.state.lock();
        state.fetch_calls.push(query.table);
        if let Some(err) = state.fetch_failures.get(&query.table) {
            return Err(err.clone());
        }
        let mut rows = state.rows.get(&query.table).cloned().unwrap_or_default();
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn subscribe(&self, table: Table) -> Result<ChangeStream, BackendError> {
        let mut gate = self.subscribe_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut state = self.state.lock();
        state.subscribe_calls.push(table);
        if state.subscribe_failures.contains(&table) {
            return Err(BackendError::Realtime(format!("join {table} refused")));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.feeds.entry(table).or_default().push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn insert_task(&self, new: &NewTask) -> Result<Task, BackendError> {
        new.validate()?;
        if let Some(err) = self.command_failure() {
            return Err(err);
        }
        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            title: new.title.trim().to_string(),
            description: new.description.clone().filter(|d| !d.trim().is_empty()),
            status: TaskStatus::Pending,
            priority: new.priority,
            created_by: Actor::Human,
            assigned_to: Some(Actor::Assistant.as_str().to_string()),
            estimated_minutes: new.estimated_minutes.filter(|m| *m > 0),
            actual_minutes: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            sort_order: 0,
            created_at: now,
            updated_at: now,
        };
        let echo = {
            let mut state = self.state.lock();
            state.inserted.push(task.clone());
            state.echo
        };
        if echo {
            self.emit(RawChange::insert(Table::Tasks, serde_json::to_value(&task)?));
        }
        Ok(task)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), BackendError> {
        if let Some(err) = self.command_failure() {
            return Err(err);
        }
        let echo = {
            let mut state = self.state.lock();
            state.deleted.push(id.clone());
            state.echo
        };
        if echo {
            self.emit(RawChange::delete(Table::Tasks, id.as_str()));
        }
        Ok(())
    }
}
