//! Events the sync core publishes to UI subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tableside_core::{OperationId, OperationType};

use crate::event::Event;

/// Sync state change visible to subscribers.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"sync_complete","success":false,"error":"1 of 2 operations failed",…}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The connectivity monitor observed a genuine transition.
    Connectivity { online: bool, at: DateTime<Utc> },

    /// A drain pass finished.
    ///
    /// `success` is true only when every operation in the pass was applied.
    SyncComplete {
        success: bool,
        applied: usize,
        failed: usize,
        skipped: usize,
        dead_lettered: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at: DateTime<Utc>,
    },

    /// An operation reached the server, either live or replayed from the queue.
    OperationApplied {
        id: OperationId,
        operation: OperationType,
        replayed: bool,
        at: DateTime<Utc>,
    },
}

impl Event for SyncEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::Connectivity { .. } => "sync.connectivity",
            SyncEvent::SyncComplete { .. } => "sync.complete",
            SyncEvent::OperationApplied { .. } => "sync.operation_applied",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SyncEvent::Connectivity { at, .. }
            | SyncEvent::SyncComplete { at, .. }
            | SyncEvent::OperationApplied { at, .. } => *at,
        }
    }
}
