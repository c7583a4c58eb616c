use chrono::{DateTime, Utc};

/// Something a subscriber can react to.
///
/// Event values are facts: they are cloned to every subscriber and never
/// mutated after publishing. `version` lets listeners that persist events
/// (e.g. a UI log) tell schema revisions apart.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted type name, e.g. `"sync.complete"`.
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Wall-clock time the publisher observed the change.
    fn occurred_at(&self) -> DateTime<Utc>;
}
