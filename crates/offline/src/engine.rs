//! Synchronization engine.
//!
//! Mutations go through the durable [`PendingQueue`] whenever the API cannot
//! take them directly, and the queue is drained in FIFO order when
//! connectivity returns. Reads go through [`SyncEngine::fetch_and_cache`],
//! which degrades to the cache when offline or when the fetch fails.
//!
//! ## Drain semantics
//!
//! - One pass at a time. Triggers that arrive during a pass collapse into it
//!   (`DrainOutcome::AlreadyRunning`); operations enqueued meanwhile wait for
//!   the next pass.
//! - A pass works on a snapshot of the queue taken at its start.
//! - An operation leaves the queue only after its handler succeeded. A failure
//!   is recorded on the operation and the pass moves on to the next one.
//! - Operations whose type this build does not know are skipped and stay
//!   queued.
//! - No retry is scheduled; the next reconnect, enqueue or `drain_now` is the
//!   retry.
//! - Every pass ends with a `SyncComplete` event, including a pass over an
//!   empty queue (`success: true, applied: 0`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use tableside_core::{
    Clock, OperationId, OperationType, PendingOperation, ResourceKey, SystemClock,
};
use tableside_events::{Event, EventBus, InMemoryEventBus, Subscription, SyncEvent};

use crate::cache::Cache;
use crate::connectivity::{ConnectivityMonitor, Transition};
use crate::queue::{DeadLetterEntry, PendingQueue, QueueError};
use crate::remote::{HandlerRegistry, ResourceFetcher};
use crate::store::{KeyValueStore, StoreError, read_json, write_json};
use crate::task::TaskHandle;

pub const LAST_SUCCESSFUL_SYNC_KEY: &str = "sync:last_successful_sync";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Owner of the engine's connectivity watcher; see [`TaskHandle`].
pub type EngineHandle = TaskHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOperation {
    pub id: OperationId,
    pub error: String,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: Vec<OperationId>,
    pub failed: Vec<FailedOperation>,
    pub skipped: Vec<OperationId>,
    /// Subset of `failed` moved to the dead-letter list.
    pub dead_lettered: Vec<OperationId>,
    /// Subset of `applied` whose removal from the queue failed. They are
    /// still queued and will be sent again by a later pass.
    pub unremoved: Vec<OperationId>,
    /// Set when the pass could not run (e.g. the queue was unreadable).
    pub error: Option<String>,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.applied.len() + self.failed.len() + self.skipped.len()
    }

    /// Every operation in the snapshot was applied.
    pub fn success(&self) -> bool {
        self.error.is_none()
            && self.failed.is_empty()
            && self.skipped.is_empty()
            && self.unremoved.is_empty()
    }

    fn summary(&self) -> Option<String> {
        if let Some(err) = &self.error {
            return Some(err.clone());
        }
        if self.success() {
            return None;
        }

        let mut parts = Vec::new();
        if !self.failed.is_empty() {
            parts.push(format!("{} of {} operations failed", self.failed.len(), self.attempted()));
        }
        if !self.skipped.is_empty() {
            parts.push(format!("{} skipped (unknown type)", self.skipped.len()));
        }
        if !self.unremoved.is_empty() {
            parts.push(format!("{} applied but still queued", self.unremoved.len()));
        }
        Some(parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another pass was running; this trigger collapsed into it.
    AlreadyRunning,
    Offline,
}

/// What `submit` did with an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Applied live; `response` is the handler's result.
    Applied { id: OperationId, response: Value },
    /// Persisted to the queue for later replay.
    Queued(PendingOperation),
}

/// Resets the single-flight flag when the pass ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngineBuilder {
    store: Arc<dyn KeyValueStore>,
    monitor: Arc<ConnectivityMonitor>,
    registry: HandlerRegistry,
    fetcher: Arc<dyn ResourceFetcher>,
    clock: Arc<dyn Clock>,
    max_attempts: Option<u32>,
}

impl SyncEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Dead-letter operations after this many failed attempts.
    pub fn max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn build(self) -> SyncEngine {
        SyncEngine {
            queue: PendingQueue::with_clock(self.store.clone(), self.clock.clone()),
            cache: Cache::with_clock(self.store.clone(), self.clock.clone()),
            store: self.store,
            monitor: self.monitor,
            registry: self.registry,
            fetcher: self.fetcher,
            clock: self.clock,
            bus: InMemoryEventBus::new(),
            online: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            max_attempts: self.max_attempts,
        }
    }
}

pub struct SyncEngine {
    store: Arc<dyn KeyValueStore>,
    queue: PendingQueue,
    cache: Cache,
    monitor: Arc<ConnectivityMonitor>,
    registry: HandlerRegistry,
    fetcher: Arc<dyn ResourceFetcher>,
    clock: Arc<dyn Clock>,
    bus: InMemoryEventBus<SyncEvent>,
    online: AtomicBool,
    draining: AtomicBool,
    max_attempts: Option<u32>,
}

impl SyncEngine {
    pub fn builder(
        store: Arc<dyn KeyValueStore>,
        monitor: Arc<ConnectivityMonitor>,
        registry: HandlerRegistry,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            store,
            monitor,
            registry,
            fetcher,
            clock: Arc::new(SystemClock),
            max_attempts: None,
        }
    }

    /// Probe connectivity, then follow monitor transitions until the returned
    /// handle is shut down. Reconnects trigger a drain, and so does starting
    /// while online: either the probe commits the first `Online`, or the
    /// monitor was already online and the backlog is drained right away.
    pub async fn start(self: &Arc<Self>) -> EngineHandle {
        // Subscribe before probing so the initial transition is not missed.
        let mut changes = self.monitor.changes();
        let already_online = self.monitor.state().is_online();
        let online = self.check_online().await;
        // No transition will arrive for a monitor that stays online.
        let catch_up = online && already_online;
        tracing::info!(online, catch_up, "sync engine started");

        let engine = Arc::clone(self);
        TaskHandle::spawn("sync-engine", move |stop| async move {
            if catch_up {
                engine.drain().await;
            }
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    received = changes.recv() => match received {
                        Ok(transition) => engine.on_transition(transition).await,
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "connectivity transitions dropped; resyncing state");
                            let online = engine.monitor.state().is_online();
                            engine.online.store(online, Ordering::SeqCst);
                            if online {
                                engine.drain().await;
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            tracing::info!("sync engine stopped");
        })
    }

    async fn on_transition(&self, transition: Transition) {
        let online = transition.online();
        self.online.store(online, Ordering::SeqCst);
        self.publish(SyncEvent::Connectivity {
            online,
            at: self.clock.now(),
        });

        if transition.is_reconnect() {
            tracing::info!("connection restored; draining pending operations");
            self.drain().await;
        }
    }

    /// Last known connectivity, without probing.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Probe connectivity now and update the engine's view.
    pub async fn check_online(&self) -> bool {
        let online = self.monitor.is_online().await;
        self.online.store(online, Ordering::SeqCst);
        online
    }

    pub fn subscribe(&self) -> Subscription<SyncEvent> {
        self.bus.subscribe()
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Durably enqueue an operation, then drain if online.
    ///
    /// Replay failures are reported through events, never returned here.
    pub async fn queue_operation(
        &self,
        operation: OperationType,
        payload: Value,
    ) -> EngineResult<PendingOperation> {
        let op = self.queue.enqueue(operation, payload).await?;
        if self.is_online() {
            self.drain().await;
        }
        Ok(op)
    }

    /// Apply an operation live when nothing is queued ahead of it, otherwise
    /// queue it.
    ///
    /// A live call never overtakes operations queued earlier, and a failed
    /// live call falls back to the queue.
    pub async fn submit(&self, operation: OperationType, payload: Value) -> EngineResult<SubmitOutcome> {
        if self.is_online() && self.queue.is_empty().await? {
            match self.registry.apply(operation, &payload).await {
                Ok(response) => {
                    let id = OperationId::new();
                    tracing::debug!(%id, %operation, "operation applied live");
                    self.publish(SyncEvent::OperationApplied {
                        id,
                        operation,
                        replayed: false,
                        at: self.clock.now(),
                    });
                    for resource in operation.affected_resources() {
                        self.refresh(&resource).await;
                    }
                    return Ok(SubmitOutcome::Applied { id, response });
                }
                Err(err) => {
                    tracing::warn!(%operation, error = %err, "live call failed; queueing operation");
                }
            }
        }

        let op = self.queue_operation(operation, payload).await?;
        Ok(SubmitOutcome::Queued(op))
    }

    /// Re-probe and drain now.
    pub async fn drain_now(&self) -> DrainOutcome {
        if !self.check_online().await {
            return DrainOutcome::Offline;
        }
        self.drain().await
    }

    async fn drain(&self) -> DrainOutcome {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            tracing::debug!("drain already running; trigger collapsed");
            return DrainOutcome::AlreadyRunning;
        };
        DrainOutcome::Completed(self.drain_pass().await)
    }

    async fn drain_pass(&self) -> DrainReport {
        let mut report = DrainReport::default();

        let snapshot = match self.queue.list().await {
            Ok(ops) => ops,
            Err(err) => {
                tracing::error!(error = %err, "failed to read pending operations");
                report.error = Some(err.to_string());
                self.publish_complete(&report);
                return report;
            }
        };

        if snapshot.is_empty() {
            tracing::debug!("no pending operations");
            self.publish_complete(&report);
            return report;
        }

        tracing::info!(pending = snapshot.len(), "draining pending operations");
        let mut affected: Vec<ResourceKey> = Vec::new();

        for op in snapshot {
            let Some(operation) = op.kind.known() else {
                tracing::warn!(id = %op.id, kind = %op.kind, "skipping operation of unknown type");
                report.skipped.push(op.id);
                continue;
            };

            match self.registry.apply(operation, &op.payload).await {
                Ok(_) => {
                    if let Err(err) = self.queue.remove(op.id).await {
                        tracing::error!(id = %op.id, error = %err, "failed to remove applied operation");
                        report.unremoved.push(op.id);
                    }
                    report.applied.push(op.id);
                    self.publish(SyncEvent::OperationApplied {
                        id: op.id,
                        operation,
                        replayed: true,
                        at: self.clock.now(),
                    });
                    for resource in operation.affected_resources() {
                        if !affected.contains(&resource) {
                            affected.push(resource);
                        }
                    }
                }
                Err(err) => {
                    let error = err.to_string();
                    tracing::warn!(id = %op.id, %operation, %error, "operation failed; left queued");
                    if self.record_failure(op.id, &error).await {
                        report.dead_lettered.push(op.id);
                    }
                    report.failed.push(FailedOperation { id: op.id, error });
                }
            }
        }

        if !report.applied.is_empty() {
            self.record_sync_time().await;
            for resource in &affected {
                self.refresh(resource).await;
            }
        }

        tracing::info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            dead_lettered = report.dead_lettered.len(),
            "drain pass finished"
        );
        self.publish_complete(&report);
        report
    }

    /// Returns whether the operation was dead-lettered.
    async fn record_failure(&self, id: OperationId, error: &str) -> bool {
        let attempts = match self.queue.record_failure(id, error).await {
            Ok(Some(attempts)) => attempts,
            // Removed concurrently (e.g. clear_pending).
            Ok(None) => return false,
            Err(err) => {
                tracing::error!(%id, error = %err, "failed to record operation failure");
                return false;
            }
        };

        let Some(max) = self.max_attempts else {
            return false;
        };
        if attempts < max {
            return false;
        }

        match self
            .queue
            .dead_letter(id, format!("gave up after {attempts} attempts: {error}"))
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(%id, error = %err, "failed to dead-letter operation");
                false
            }
        }
    }

    async fn record_sync_time(&self) {
        let now = self.clock.now();
        if let Err(err) = write_json(self.store.as_ref(), LAST_SUCCESSFUL_SYNC_KEY, &now).await {
            tracing::error!(error = %err, "failed to store last sync time");
        }
    }

    /// Re-fetch a resource after a mutation. A failed fetch drops the stale
    /// entry instead.
    async fn refresh(&self, resource: &ResourceKey) {
        match self.fetcher.fetch(resource).await {
            Ok(data) => {
                if let Err(err) = self.cache.save_to_cache(resource, &data).await {
                    tracing::warn!(%resource, error = %err, "failed to cache refreshed resource");
                }
            }
            Err(err) => {
                tracing::debug!(%resource, error = %err, "refresh failed; invalidating cache entry");
                if let Err(err) = self.cache.invalidate(resource).await {
                    tracing::warn!(%resource, error = %err, "failed to invalidate cache entry");
                }
            }
        }
    }

    fn publish_complete(&self, report: &DrainReport) {
        self.publish(SyncEvent::SyncComplete {
            success: report.success(),
            applied: report.applied.len(),
            failed: report.failed.len(),
            skipped: report.skipped.len(),
            dead_lettered: report.dead_lettered.len(),
            error: report.summary(),
            at: self.clock.now(),
        });
    }

    fn publish(&self, event: SyncEvent) {
        let event_type = event.event_type();
        match self.bus.publish(event) {
            Ok(receivers) => tracing::trace!(event_type, receivers, "sync event published"),
            Err(err) => tracing::warn!(event_type, error = %err, "failed to publish sync event"),
        }
    }

    pub async fn pending(&self) -> EngineResult<Vec<PendingOperation>> {
        Ok(self.queue.list().await?)
    }

    pub async fn clear_pending(&self) -> EngineResult<()> {
        self.queue.clear().await?;
        tracing::info!("pending operations cleared");
        Ok(())
    }

    pub async fn dead_letters(&self) -> EngineResult<Vec<DeadLetterEntry>> {
        Ok(self.queue.dead_letters().await?)
    }

    /// Move a dead letter back to the queue tail and drain if online.
    pub async fn retry_dead_letter(&self, id: OperationId) -> EngineResult<PendingOperation> {
        let op = self.queue.retry_dead_letter(id).await?;
        if self.is_online() {
            self.drain().await;
        }
        Ok(op)
    }

    pub async fn discard_dead_letter(&self, id: OperationId) -> EngineResult<()> {
        Ok(self.queue.discard_dead_letter(id).await?)
    }

    pub async fn last_successful_sync(&self) -> EngineResult<Option<DateTime<Utc>>> {
        Ok(read_json(self.store.as_ref(), LAST_SUCCESSFUL_SYNC_KEY).await?)
    }

    /// Fresh data when online, cached data (any age) otherwise.
    ///
    /// Offline reads never touch the network. `None` only when there is
    /// neither a successful fetch nor a cache entry.
    pub async fn fetch_and_cache(&self, resource: &ResourceKey) -> Option<Value> {
        if !self.is_online() {
            tracing::debug!(%resource, "offline; serving cached copy");
            return self.cached_any(resource).await;
        }

        match self.fetcher.fetch(resource).await {
            Ok(data) => {
                if let Err(err) = self.cache.save_to_cache(resource, &data).await {
                    tracing::warn!(%resource, error = %err, "failed to cache fetched resource");
                }
                Some(data)
            }
            Err(err) => {
                tracing::warn!(%resource, error = %err, "fetch failed; falling back to cache");
                self.cached_any(resource).await
            }
        }
    }

    pub async fn fetch_and_cache_tables(&self) -> Option<Value> {
        self.fetch_and_cache(&ResourceKey::Tables).await
    }

    pub async fn fetch_and_cache_orders(&self) -> Option<Value> {
        self.fetch_and_cache(&ResourceKey::Orders).await
    }

    pub async fn fetch_and_cache_menu(&self) -> Option<Value> {
        self.fetch_and_cache(&ResourceKey::Menu).await
    }

    pub async fn fetch_and_cache_bills(&self) -> Option<Value> {
        self.fetch_and_cache(&ResourceKey::Bills).await
    }

    pub async fn fetch_and_cache_reservations(&self) -> Option<Value> {
        self.fetch_and_cache(&ResourceKey::Reservations).await
    }

    /// Cached value within its max age. Never touches the network.
    pub async fn cached(&self, resource: &ResourceKey) -> Option<Value> {
        match self.cache.get(resource).await {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(%resource, error = %err, "cache read failed");
                None
            }
        }
    }

    async fn cached_any(&self, resource: &ResourceKey) -> Option<Value> {
        match self.cache.get_any(resource).await {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(%resource, error = %err, "cache read failed");
                None
            }
        }
    }
}
