//! Durable FIFO of pending operations.
//!
//! The whole queue lives under one store key as a JSON array, so a single
//! `set` replaces it atomically. Read-modify-write cycles are serialized by an
//! async mutex; plain reads are not, since each read sees one complete array.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use tableside_core::{Clock, OperationId, OperationKind, PendingOperation, SystemClock};

use crate::store::{KeyValueStore, StoreError, read_json};

pub const PENDING_OPERATIONS_KEY: &str = "sync:pending_operations";
pub const DEAD_LETTERS_KEY: &str = "sync:dead_letters";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("operation not found: {0}")]
    NotFound(OperationId),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// An operation taken out of the queue after exhausting its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub operation: PendingOperation,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

/// Pending-operation queue over a [`KeyValueStore`].
pub struct PendingQueue {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl PendingQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an operation with a fresh id and timestamp.
    ///
    /// Returns once the durable write has completed.
    pub async fn enqueue(
        &self,
        kind: impl Into<OperationKind>,
        payload: Value,
    ) -> QueueResult<PendingOperation> {
        let op = PendingOperation::new(kind, payload, self.clock.now());

        let _guard = self.write_lock.lock().await;
        let mut ops = self.load::<PendingOperation>(PENDING_OPERATIONS_KEY).await?;
        ops.push(op.clone());
        self.save(PENDING_OPERATIONS_KEY, &ops).await?;

        tracing::debug!(id = %op.id, kind = %op.kind, queued = ops.len(), "operation enqueued");
        Ok(op)
    }

    /// All pending operations, oldest first.
    pub async fn list(&self) -> QueueResult<Vec<PendingOperation>> {
        self.load(PENDING_OPERATIONS_KEY).await
    }

    /// Delete one operation. Returns whether it was present.
    pub async fn remove(&self, id: OperationId) -> QueueResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut ops = self.load::<PendingOperation>(PENDING_OPERATIONS_KEY).await?;
        let before = ops.len();
        ops.retain(|op| op.id != id);
        if ops.len() == before {
            return Ok(false);
        }
        self.save(PENDING_OPERATIONS_KEY, &ops).await?;
        Ok(true)
    }

    pub async fn clear(&self) -> QueueResult<()> {
        let _guard = self.write_lock.lock().await;
        self.store.remove(PENDING_OPERATIONS_KEY).await?;
        Ok(())
    }

    pub async fn len(&self) -> QueueResult<usize> {
        Ok(self.list().await?.len())
    }

    pub async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Count a failed replay. Returns the new attempt count, or `None` if the
    /// operation is no longer queued.
    pub async fn record_failure(&self, id: OperationId, error: &str) -> QueueResult<Option<u32>> {
        let _guard = self.write_lock.lock().await;
        let mut ops = self.load::<PendingOperation>(PENDING_OPERATIONS_KEY).await?;

        let Some(op) = ops.iter_mut().find(|op| op.id == id) else {
            return Ok(None);
        };
        op.attempts = op.attempts.saturating_add(1);
        op.last_error = Some(error.to_string());
        let attempts = op.attempts;

        self.save(PENDING_OPERATIONS_KEY, &ops).await?;
        Ok(Some(attempts))
    }

    /// Move an operation from the queue to the dead-letter list.
    ///
    /// Both lists are written in one batch; on backends with atomic batches
    /// the move is all-or-nothing.
    pub async fn dead_letter(
        &self,
        id: OperationId,
        reason: impl Into<String>,
    ) -> QueueResult<DeadLetterEntry> {
        let _guard = self.write_lock.lock().await;
        let mut ops = self.load::<PendingOperation>(PENDING_OPERATIONS_KEY).await?;
        let pos = ops
            .iter()
            .position(|op| op.id == id)
            .ok_or(QueueError::NotFound(id))?;
        let operation = ops.remove(pos);

        let entry = DeadLetterEntry {
            operation,
            dead_lettered_at: self.clock.now(),
            reason: reason.into(),
        };
        let mut letters = self.load::<DeadLetterEntry>(DEAD_LETTERS_KEY).await?;
        letters.push(entry.clone());

        self.store
            .multi_set(vec![
                (PENDING_OPERATIONS_KEY.to_string(), encode(PENDING_OPERATIONS_KEY, &ops)?),
                (DEAD_LETTERS_KEY.to_string(), encode(DEAD_LETTERS_KEY, &letters)?),
            ])
            .await?;

        tracing::warn!(id = %id, reason = %entry.reason, "operation dead-lettered");
        Ok(entry)
    }

    pub async fn dead_letters(&self) -> QueueResult<Vec<DeadLetterEntry>> {
        self.load(DEAD_LETTERS_KEY).await
    }

    /// Put a dead letter back at the tail of the queue with its attempts reset.
    pub async fn retry_dead_letter(&self, id: OperationId) -> QueueResult<PendingOperation> {
        let _guard = self.write_lock.lock().await;
        let mut letters = self.load::<DeadLetterEntry>(DEAD_LETTERS_KEY).await?;
        let pos = letters
            .iter()
            .position(|e| e.operation.id == id)
            .ok_or(QueueError::NotFound(id))?;

        let mut op = letters.remove(pos).operation;
        op.attempts = 0;
        op.last_error = None;

        let mut ops = self.load::<PendingOperation>(PENDING_OPERATIONS_KEY).await?;
        ops.push(op.clone());

        self.store
            .multi_set(vec![
                (PENDING_OPERATIONS_KEY.to_string(), encode(PENDING_OPERATIONS_KEY, &ops)?),
                (DEAD_LETTERS_KEY.to_string(), encode(DEAD_LETTERS_KEY, &letters)?),
            ])
            .await?;

        tracing::info!(id = %id, "dead letter re-queued");
        Ok(op)
    }

    pub async fn discard_dead_letter(&self, id: OperationId) -> QueueResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut letters = self.load::<DeadLetterEntry>(DEAD_LETTERS_KEY).await?;
        let before = letters.len();
        letters.retain(|e| e.operation.id != id);
        if letters.len() == before {
            return Err(QueueError::NotFound(id));
        }
        self.save(DEAD_LETTERS_KEY, &letters).await
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> QueueResult<Vec<T>> {
        Ok(read_json::<Vec<T>, _>(self.store.as_ref(), key)
            .await?
            .unwrap_or_default())
    }

    async fn save<T: Serialize>(&self, key: &str, items: &[T]) -> QueueResult<()> {
        self.store.set(key, encode(key, items)?).await?;
        Ok(())
    }
}

fn encode<T: Serialize>(key: &str, items: &[T]) -> Result<String, StoreError> {
    serde_json::to_string(items).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use proptest::prelude::*;
    use serde_json::json;
    use tableside_core::OperationType;

    fn queue() -> (Arc<InMemoryStore>, PendingQueue) {
        let store = InMemoryStore::arc();
        let queue = PendingQueue::new(store.clone());
        (store, queue)
    }

    #[tokio::test]
    async fn enqueue_appends_in_order() {
        let (_, q) = queue();
        let a = q.enqueue(OperationType::CreateOrder, json!({"n": 1})).await.unwrap();
        let b = q.enqueue(OperationType::PayBill, json!({"billId": "B1"})).await.unwrap();

        let ids: Vec<_> = q.list().await.unwrap().into_iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(q.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (_, q) = queue();
        let op = q.enqueue(OperationType::CreateBill, json!({})).await.unwrap();

        assert!(q.remove(op.id).await.unwrap());
        assert!(!q.remove(op.id).await.unwrap());
        assert!(!q.remove(OperationId::new()).await.unwrap());
        assert!(q.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn clear_empties_the_queue() {
        let (store, q) = queue();
        q.enqueue(OperationType::CreateBill, json!({})).await.unwrap();
        q.clear().await.unwrap();
        assert!(q.list().await.unwrap().is_empty());
        assert!(store.get(PENDING_OPERATIONS_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_failure_counts_attempts() {
        let (_, q) = queue();
        let op = q.enqueue(OperationType::AssignWaiter, json!({"tableId": "T1"})).await.unwrap();

        assert_eq!(q.record_failure(op.id, "timeout").await.unwrap(), Some(1));
        assert_eq!(q.record_failure(op.id, "HTTP 503").await.unwrap(), Some(2));
        assert_eq!(q.record_failure(OperationId::new(), "x").await.unwrap(), None);

        let stored = &q.list().await.unwrap()[0];
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn queue_is_readable_by_a_second_instance() {
        let (store, q) = queue();
        let op = q.enqueue(OperationType::UpdateTableStatus, json!({"tableId": "T5"})).await.unwrap();

        let reopened = PendingQueue::new(store);
        assert_eq!(reopened.list().await.unwrap(), vec![op]);
    }

    #[tokio::test]
    async fn corrupt_queue_is_reported_not_overwritten() {
        let (store, q) = queue();
        store
            .set(PENDING_OPERATIONS_KEY, "{broken".to_string())
            .await
            .unwrap();

        let err = q.enqueue(OperationType::CreateOrder, json!({})).await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::Serialization { .. })));
        assert_eq!(
            store.get(PENDING_OPERATIONS_KEY).await.unwrap().as_deref(),
            Some("{broken")
        );
    }

    #[tokio::test]
    async fn dead_letter_round_trip() {
        let (_, q) = queue();
        let first = q.enqueue(OperationType::PayBill, json!({"billId": "B1"})).await.unwrap();
        let second = q.enqueue(OperationType::CreateBill, json!({})).await.unwrap();
        q.record_failure(first.id, "HTTP 400").await.unwrap();

        let entry = q.dead_letter(first.id, "HTTP 400").await.unwrap();
        assert_eq!(entry.operation.attempts, 1);
        assert_eq!(q.list().await.unwrap().len(), 1);
        assert_eq!(q.dead_letters().await.unwrap().len(), 1);

        let retried = q.retry_dead_letter(first.id).await.unwrap();
        assert_eq!(retried.attempts, 0);
        assert!(retried.last_error.is_none());

        // Retried operations go to the tail.
        let ids: Vec<_> = q.list().await.unwrap().into_iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert!(q.dead_letters().await.unwrap().is_empty());

        assert!(matches!(
            q.retry_dead_letter(first.id).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn discard_dead_letter_deletes_it() {
        let (_, q) = queue();
        let op = q.enqueue(OperationType::PayBill, json!({})).await.unwrap();
        q.dead_letter(op.id, "rejected").await.unwrap();

        q.discard_dead_letter(op.id).await.unwrap();
        assert!(q.dead_letters().await.unwrap().is_empty());
        assert!(q.list().await.unwrap().is_empty());
        assert!(matches!(
            q.discard_dead_letter(op.id).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueues_lose_nothing() {
        let (_, q) = queue();
        let q = Arc::new(q);

        let mut tasks = Vec::new();
        for n in 0..32 {
            let q = q.clone();
            tasks.push(tokio::spawn(async move {
                q.enqueue(OperationType::CreateOrder, json!({"n": n})).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(q.len().await.unwrap(), 32);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: the queue lists operations in enqueue order, and removing
        /// any subset keeps the survivors in their original relative order.
        #[test]
        fn fifo_order_survives_removals(
            count in 1usize..20,
            removals in proptest::collection::vec(any::<prop::sample::Index>(), 0..10),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (_, q) = queue();
                let mut expected = Vec::new();
                for n in 0..count {
                    let op = q.enqueue(OperationType::ALL[n % 7], json!({"n": n})).await.unwrap();
                    expected.push(op.id);
                }

                for idx in &removals {
                    let victim = expected[idx.index(expected.len())];
                    q.remove(victim).await.unwrap();
                    expected.retain(|id| *id != victim);
                    if expected.is_empty() {
                        break;
                    }
                }

                let listed: Vec<_> = q.list().await.unwrap().into_iter().map(|op| op.id).collect();
                assert_eq!(listed, expected);
            });
        }
    }
}
