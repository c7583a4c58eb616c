//! In-process event bus backed by one `mpsc` channel per subscription.

use std::sync::{Mutex, MutexGuard, mpsc};

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InMemoryBusError {
    #[error("subscriber list lock poisoned")]
    Poisoned,
}

/// Fan-out bus for UI listeners living in the same process.
///
/// Publishing never blocks: each subscription has an unbounded queue and a
/// subscription whose receiver was dropped is pruned on the next publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    senders: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Subscriptions still registered. Dropped ones count until the next
    /// publish prunes them.
    pub fn subscriber_count(&self) -> usize {
        self.senders().map(|senders| senders.len()).unwrap_or(0)
    }

    fn senders(&self) -> Result<MutexGuard<'_, Vec<mpsc::Sender<M>>>, InMemoryBusError> {
        self.senders.lock().map_err(|_| InMemoryBusError::Poisoned)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<usize, Self::Error> {
        let mut senders = self.senders()?;
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(senders.len())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        match self.senders() {
            Ok(mut senders) => senders.push(tx),
            // The subscription stays valid but never receives anything.
            Err(err) => tracing::warn!(error = %err, "subscribing to a poisoned event bus"),
        }
        Subscription::new(rx)
    }
}
