//! `tableside-core` — shared primitives for the offline-first sync core.
//!
//! This crate contains **pure** building blocks (no storage, no network):
//! identifiers, the operation/resource vocabulary, connectivity state and a
//! clock abstraction so TTL logic can be driven deterministically in tests.

pub mod clock;
pub mod connectivity;
pub mod error;
pub mod id;
pub mod operation;
pub mod resource;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connectivity::ConnectivityState;
pub use error::{DomainError, DomainResult};
pub use id::OperationId;
pub use operation::{OperationKind, OperationType, PendingOperation};
pub use resource::ResourceKey;
