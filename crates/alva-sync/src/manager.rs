//! The subscription manager: seeds the four collections, keeps them live,
//! and publishes a snapshot after every change.
//!
//! A single pump task owns the collections. Change feeds are opened before
//! the bulk fetches so nothing committed in between is lost; their
//! notifications queue up and are applied once seeding has finished.
//!
//! Feeds are durable. One that fails to open, or ends later, is listed in
//! `stale_feeds` and reopened with backoff. A feed that opens after seeding
//! is held back until its table has been fetched again, so changes made
//! while it was down are not lost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, FuturesUnordered, SelectAll};
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use alva_core::{Backend, BackendError, ChangeStream, NewTask, RawChange, Table, TaskId};
use alva_state::{Applied, DashboardSnapshot};

pub type SnapshotReceiver = watch::Receiver<Arc<DashboardSnapshot>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long seeding waits for the feeds to open before going ahead
    /// without the stragglers.
    pub open_timeout: Duration,
    /// Delay before the first attempt to reopen a feed. Doubles on every
    /// further failure.
    pub rejoin_delay: Duration,
    pub max_rejoin_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(10),
            rejoin_delay: Duration::from_secs(1),
            max_rejoin_delay: Duration::from_secs(30),
        }
    }
}

/// Notes from the command side the pump needs to correlate.
enum Expect {
    Create(TaskId),
    Delete(TaskId),
}

/// A live dashboard bound to one backend. Dropping it tears everything down.
pub struct DashboardSession {
    backend: Arc<dyn Backend>,
    snapshots: SnapshotReceiver,
    expect_tx: mpsc::UnboundedSender<Expect>,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl DashboardSession {
    /// Start syncing. Returns at once with a loading snapshot; progress is
    /// visible through [`DashboardSession::watch`].
    pub fn start(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, SessionConfig::default())
    }

    pub fn with_config(backend: Arc<dyn Backend>, config: SessionConfig) -> Self {
        let (snapshot_tx, snapshots) = watch::channel(Arc::new(DashboardSnapshot::loading()));
        let (expect_tx, expect_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let pump = Pump {
            backend: Arc::clone(&backend),
            snapshot: DashboardSnapshot::loading(),
            publisher: snapshot_tx,
            expect_rx,
            cancel: cancel.clone(),
            config,
            opening: FuturesUnordered::new(),
            feeds: SelectAll::new(),
            refetching: FuturesUnordered::new(),
            parked: HashMap::new(),
            backoff: HashMap::new(),
        };
        let handle = tokio::spawn(pump.run());
        info!(backend = backend.name(), "dashboard session started");

        Self {
            backend,
            snapshots,
            expect_tx,
            cancel,
            pump: Some(handle),
        }
    }

    pub fn watch(&self) -> SnapshotReceiver {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> Arc<DashboardSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Wait for every bulk fetch to settle.
    pub async fn loaded(&self) -> Result<Arc<DashboardSnapshot>, BackendError> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|s| !s.loading)
            .await
            .map_err(|_| BackendError::ChannelClosed)?;
        Ok(Arc::clone(&snapshot))
    }

    /// Insert a task. The cache changes only when the INSERT notification
    /// arrives; until then the returned identity is listed as pending.
    pub async fn create_task(&self, task: NewTask) -> Result<TaskId, BackendError> {
        task.validate()?;
        let created = self.backend.insert_task(&task).await?;
        debug!(id = %created.id, "task created");
        let _ = self.expect_tx.send(Expect::Create(created.id.clone()));
        Ok(created.id)
    }

    /// Delete a task. It stays in the cache until the DELETE notification.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), BackendError> {
        self.backend.delete_task(id).await?;
        debug!(%id, "task deleted");
        let _ = self.expect_tx.send(Expect::Delete(id.clone()));
        Ok(())
    }

    /// Release every subscription and wait for the pump to stop. Nothing is
    /// applied or published after this returns.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                warn!(error = %e, "dashboard pump ended abnormally");
            }
        }
        info!("dashboard session shut down");
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

type Opening = BoxFuture<'static, (Table, Result<ChangeStream, BackendError>)>;
type Refetch = BoxFuture<'static, (Table, Result<Vec<Value>, BackendError>)>;
type Feed = BoxStream<'static, FeedEvent>;

enum FeedEvent {
    Change(RawChange),
    Ended(Table),
}

/// A change feed that reports its own end.
fn tagged(table: Table, changes: ChangeStream) -> Feed {
    changes
        .map(FeedEvent::Change)
        .chain(stream::once(futures::future::ready(FeedEvent::Ended(table))))
        .boxed()
}

struct Pump {
    backend: Arc<dyn Backend>,
    snapshot: DashboardSnapshot,
    publisher: watch::Sender<Arc<DashboardSnapshot>>,
    expect_rx: mpsc::UnboundedReceiver<Expect>,
    cancel: CancellationToken,
    config: SessionConfig,
    opening: FuturesUnordered<Opening>,
    feeds: SelectAll<Feed>,
    refetching: FuturesUnordered<Refetch>,
    /// Opened after seeding, waiting on their refetch.
    parked: HashMap<Table, Feed>,
    backoff: HashMap<Table, Duration>,
}

impl Pump {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        tokio::select! {
            () = cancel.cancelled() => {}
            () = self.sync() => {}
        }
        debug!(revision = self.snapshot.revision, "dashboard pump stopped");
    }

    async fn sync(&mut self) {
        for table in Table::ALL {
            self.open(table, Duration::ZERO);
        }
        self.await_feeds().await;
        self.seed().await;
        self.snapshot.loading = false;
        self.publish();

        loop {
            tokio::select! {
                expect = self.expect_rx.recv() => {
                    match expect {
                        Some(expect) => self.on_expect(expect),
                        None => break,
                    }
                }
                Some(event) = self.feeds.next(), if !self.feeds.is_empty() => {
                    match event {
                        FeedEvent::Change(change) => self.on_change(&change),
                        FeedEvent::Ended(table) => self.on_feed_ended(table),
                    }
                }
                Some((table, result)) = self.opening.next(), if !self.opening.is_empty() => {
                    self.on_opened(table, result);
                }
                Some((table, result)) = self.refetching.next(), if !self.refetching.is_empty() => {
                    self.on_refetched(table, result);
                }
            }
        }
    }

    fn open(&mut self, table: Table, delay: Duration) {
        let backend = Arc::clone(&self.backend);
        self.opening.push(
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (table, backend.subscribe(table).await)
            }
            .boxed(),
        );
    }

    /// Wait until every feed has opened or failed once. Whatever is still
    /// opening at the deadline is marked stale and seeding goes ahead; it
    /// is picked up later like any rejoin.
    async fn await_feeds(&mut self) {
        let mut waiting = Table::ALL.to_vec();
        let deadline = tokio::time::sleep(self.config.open_timeout);
        tokio::pin!(deadline);

        while !waiting.is_empty() {
            tokio::select! {
                () = &mut deadline => {
                    for table in waiting {
                        warn!(%table, timeout = ?self.config.open_timeout, "feed still opening, seeding without it");
                        self.mark_stale(table);
                    }
                    return;
                }
                Some((table, result)) = self.opening.next() => {
                    waiting.retain(|t| *t != table);
                    match result {
                        Ok(stream) => {
                            self.mark_live(table);
                            self.feeds.push(tagged(table, stream));
                        }
                        Err(e) => self.on_open_failed(table, &e),
                    }
                }
            }
        }
    }

    fn on_opened(&mut self, table: Table, result: Result<ChangeStream, BackendError>) {
        match result {
            Ok(stream) => {
                info!(%table, "feed open, refetching to catch up");
                self.parked.insert(table, tagged(table, stream));
                let backend = Arc::clone(&self.backend);
                self.refetching.push(
                    async move { (table, backend.fetch(&table.seed_query()).await) }.boxed(),
                );
            }
            Err(e) => self.on_open_failed(table, &e),
        }
    }

    fn on_open_failed(&mut self, table: Table, error: &BackendError) {
        let delay = self.next_backoff(table);
        warn!(%table, error = %error, kind = error.error_kind(), retry_in = ?delay, "subscription failed, serving cached rows");
        if self.mark_stale(table) && !self.snapshot.loading {
            self.publish();
        }
        self.open(table, delay);
    }

    fn on_feed_ended(&mut self, table: Table) {
        let delay = self.next_backoff(table);
        warn!(%table, retry_in = ?delay, "change feed ended, rejoining");
        if self.mark_stale(table) {
            self.publish();
        }
        self.open(table, delay);
    }

    fn on_refetched(&mut self, table: Table, result: Result<Vec<Value>, BackendError>) {
        let Some(feed) = self.parked.remove(&table) else {
            return;
        };
        match result {
            Ok(rows) => {
                self.apply_seed(table, rows);
                if table == Table::Tasks {
                    self.snapshot.pending.settle_seeded(&self.snapshot.collections);
                }
                self.feeds.push(feed);
                self.mark_live(table);
                info!(%table, "feed live again");
                self.publish();
            }
            Err(e) => {
                drop(feed);
                let delay = self.next_backoff(table);
                warn!(%table, error = %e, kind = e.error_kind(), retry_in = ?delay, "refetch failed, reopening feed");
                self.open(table, delay);
            }
        }
    }

    fn next_backoff(&mut self, table: Table) -> Duration {
        let delay = self.backoff.get(&table).map_or(self.config.rejoin_delay, |last| {
            (*last * 2).min(self.config.max_rejoin_delay)
        });
        self.backoff.insert(table, delay);
        delay
    }

    /// Returns false if the table was already listed.
    fn mark_stale(&mut self, table: Table) -> bool {
        if self.snapshot.stale_feeds.contains(&table) {
            return false;
        }
        self.snapshot.stale_feeds.push(table);
        true
    }

    fn mark_live(&mut self, table: Table) {
        self.backoff.remove(&table);
        self.snapshot.stale_feeds.retain(|t| *t != table);
    }

    /// Bulk-fetch every collection concurrently. A failed fetch leaves its
    /// collection empty; the others are unaffected.
    async fn seed(&mut self) {
        let backend = &self.backend;
        let results = futures::future::join_all(Table::ALL.map(|table| async move {
            (table, backend.fetch(&table.seed_query()).await)
        }))
        .await;

        for (table, result) in results {
            match result {
                Ok(rows) => self.apply_seed(table, rows),
                Err(e) => warn!(%table, error = %e, kind = e.error_kind(), "bulk fetch failed"),
            }
        }
    }

    fn apply_seed(&mut self, table: Table, rows: Vec<Value>) {
        let count = rows.len();
        let report = self.snapshot.collections.seed(table, rows);
        for err in &report.undecodable {
            warn!(%table, error = %err, "skipping undecodable row");
        }
        if !report.rejected.is_empty() {
            warn!(%table, steps = ?report.rejected, "skipping steps whose parent is in another task");
        }
        debug!(%table, rows = count, "seeded");
    }

    fn on_change(&mut self, change: &RawChange) {
        let table = change.table;
        let kind = change.kind;
        match self.snapshot.collections.apply(change) {
            Ok(applied) => {
                let settled = self.snapshot.pending.observe(change);
                match &applied {
                    Applied::Ignored(reason) => {
                        debug!(%table, %kind, id = ?change.row_id(), ?reason, "change ignored");
                    }
                    _ => debug!(%table, %kind, id = ?change.row_id(), ?applied, "change applied"),
                }
                if applied.changed() || settled {
                    self.publish();
                }
            }
            Err(e) => warn!(%table, %kind, error = %e, "undecodable change, skipping"),
        }
    }

    fn on_expect(&mut self, expect: Expect) {
        let collections = &self.snapshot.collections;
        let tracked = match expect {
            Expect::Create(id) => self.snapshot.pending.expect_create(id, collections),
            Expect::Delete(id) => self.snapshot.pending.expect_delete(id, collections),
        };
        if tracked {
            self.publish();
        }
    }

    fn publish(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.snapshot.revision += 1;
        debug!(revision = self.snapshot.revision, "publishing snapshot");
        self.publisher.send_replace(Arc::new(self.snapshot.clone()));
    }
}
