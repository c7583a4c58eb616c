//! Publish/subscribe mechanics and the events the sync core emits.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod sync_event;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use sync_event::SyncEvent;
