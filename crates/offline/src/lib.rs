//! `tableside-offline` — offline-first sync for the tableside client.
//!
//! Writes are durably queued while the API is unreachable and replayed in
//! order when connectivity returns; reads are served from a TTL cache when
//! the network cannot answer.
//!
//! The pieces are constructed explicitly and wired together by the host
//! (see the `tableside-sync` binary):
//!
//! - [`store`]: the durable key-value seam, with an in-memory and a SQLite
//!   ([`sqlite_store`]) implementation.
//! - [`queue`]: the pending-operation FIFO and its dead-letter list.
//! - [`cache`]: per-resource TTL cache.
//! - [`connectivity`]: probe seam and the transition-deduplicating monitor.
//! - [`remote`]: handler registry and fetcher seams for the API.
//! - [`engine`]: drain state machine and the cache-aware fetch wrapper.
//! - `http` (feature `http`): REST implementations of the remote seams.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod engine;
#[cfg(feature = "http")]
pub mod http;
pub mod queue;
pub mod remote;
pub mod sqlite_store;
pub mod store;
pub mod task;

pub use cache::{Cache, CacheEntry, CacheError};
pub use config::{ConfigError, SyncConfig};
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, MonitorHandle, ProbeError, Transition};
pub use engine::{
    DrainOutcome, DrainReport, EngineError, EngineHandle, FailedOperation, SubmitOutcome, SyncEngine,
    SyncEngineBuilder,
};
#[cfg(feature = "http")]
pub use http::{HttpProbe, HttpRemote};
pub use queue::{DeadLetterEntry, PendingQueue, QueueError};
pub use remote::{HandlerRegistry, OperationHandler, RegistryError, RemoteError, ResourceFetcher};
pub use sqlite_store::SqliteStore;
pub use store::{InMemoryStore, KeyValueStore, StoreError};
pub use task::TaskHandle;
