use analytics::AnalyticsSnapshot;
use std::sync::{Arc, RwLock};

/// Holds the currently published snapshot.
///
/// Readers take an `Arc` to one snapshot and keep using it for the whole
/// request; `publish` swaps in a new `Arc` and never touches the old value, so
/// a reader sees either the previous snapshot or the new one in full.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    current: Arc<RwLock<Arc<AnalyticsSnapshot>>>,
}

impl SnapshotCache {
    pub fn new(initial: AnalyticsSnapshot) -> Self {
        Self { current: Arc::new(RwLock::new(Arc::new(initial))) }
    }

    pub fn load(&self) -> Arc<AnalyticsSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn publish(&self, snapshot: AnalyticsSnapshot) {
        let next = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
