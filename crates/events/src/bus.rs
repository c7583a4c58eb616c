//! Event publishing/subscription abstraction (mechanics only).
//!
//! The sync core reports connectivity transitions and drain results to UI
//! code through an [`EventBus`]. The contract is deliberately small:
//!
//! - **Broadcast**: every live subscription receives a copy of every message
//!   published after it subscribed.
//! - **Publisher order**: a single publisher's messages arrive in publish order.
//! - **No persistence**: a subscriber that was not listening misses the message.
//!   Durable state (pending operations, last sync time) lives in the store.
//!
//! Unsubscribing is dropping the [`Subscription`]; the bus prunes closed
//! subscribers on the next publish.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryIter, TryRecvError};
use std::time::Duration;

/// A subscription to an event stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = engine.subscribe();
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(event) => render(event),
///         Err(RecvTimeoutError::Timeout) => continue,  // Check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,  // Bus dropped
///     }
/// }
/// ```
///
/// Subscriptions are meant for a single consumer. Blocking receives must not
/// run on an async executor thread; use `try_recv`/`try_iter` there, or move
/// the loop onto a blocking task.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Iterate over the messages already delivered, without blocking.
    pub fn try_iter(&self) -> TryIter<'_, M> {
        self.receiver.try_iter()
    }

    /// Stop receiving messages.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

/// Publish/subscribe abstraction.
///
/// `publish()` returns how many live subscriptions received the message. It
/// can fail (e.g. poisoned internal state); the sync core treats a failed
/// publish as non-fatal since the durable queue is the source of truth.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<usize, Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<usize, Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
