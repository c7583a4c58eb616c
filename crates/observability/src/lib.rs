//! Tracing/logging setup shared by every binary in the workspace.

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat};

/// Initialize process-wide observability with defaults (`RUST_LOG`, JSON).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&LogConfig::default());
}

/// Initialize process-wide observability with an explicit configuration.
pub fn init_with(config: &LogConfig) {
    tracing::init(config);
}
