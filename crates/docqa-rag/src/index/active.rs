//! The index currently serving queries

use parking_lot::RwLock;
use std::sync::Arc;

use super::store::VectorIndex;

/// Holder for the active index.
///
/// Readers clone the `Arc` and search without holding the lock; a rebuild
/// builds a complete new index and swaps the pointer.
#[derive(Debug, Default)]
pub struct ActiveIndex {
    current: RwLock<Option<Arc<VectorIndex>>>,
}

impl ActiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(index: VectorIndex) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(index))),
        }
    }

    /// The index to search, if one is active
    pub fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.current.read().clone()
    }

    /// Install `index`, returning the one it replaces
    pub fn swap(&self, index: VectorIndex) -> Option<Arc<VectorIndex>> {
        let next = Arc::new(index);
        tracing::info!(
            "Activating index {} ({} entries)",
            next.snapshot_id(),
            next.len()
        );
        self.current.write().replace(next)
    }

    pub fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::store::{sample_index, SearchParams};

    #[test]
    fn test_readers_keep_their_snapshot_across_swap() {
        let active = ActiveIndex::new();
        assert!(!active.is_ready());
        assert!(active.snapshot().is_none());

        assert!(active.swap(sample_index(vec![vec![1.0, 0.0]])).is_none());
        let reader = active.snapshot().unwrap();

        let previous = active
            .swap(sample_index(vec![vec![1.0, 0.0], vec![0.0, 1.0]]))
            .unwrap();
        assert_eq!(previous.snapshot_id(), reader.snapshot_id());

        // The old snapshot stays usable for in-flight queries
        assert_eq!(reader.len(), 1);
        assert_eq!(
            reader.search(&[1.0, 0.0], &SearchParams::default()).unwrap().len(),
            1
        );
        assert_eq!(active.snapshot().unwrap().len(), 2);
    }
}
