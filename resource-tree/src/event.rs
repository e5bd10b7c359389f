//! Change events delivered to resource observers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// What happened to the node that raised an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The node's value (or a value below it) changed
    Updated,
    /// A named request raised against the node without a value change,
    /// e.g. a firmware download being requested
    Signal(&'static str),
}

/// A change observed on a resource node
///
/// Events bubble: observers on every ancestor of `source` see the same
/// event, so an observer on the root sees every change in the tree.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Canonical name of the node that changed
    pub source: String,

    pub kind: ChangeKind,

    pub timestamp: Instant,
}

impl ChangeEvent {
    pub fn new(source: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            source: source.into(),
            kind,
            timestamp: Instant::now(),
        }
    }

    /// Whether `source` is `path` itself or lies beneath it
    pub fn is_within(&self, path: &str) -> bool {
        path.is_empty()
            || self.source == path
            || (self.source.starts_with(path) && self.source[path.len()..].starts_with('.'))
    }
}

impl PartialEq for ChangeEvent {
    fn eq(&self, other: &Self) -> bool {
        // Timestamp not included in equality
        self.source == other.source && self.kind == other.kind
    }
}

/// Callback invoked synchronously for every event on a node
pub type Observer = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Handle returned when registering an observer, used to remove it later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ObserverId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}
