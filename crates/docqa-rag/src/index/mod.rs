//! Vector index: exact search, snapshots and the active-index holder

mod active;
mod snapshot;
mod store;

pub use active::ActiveIndex;
pub use snapshot::{
    snapshot_exists, SnapshotManifest, ENTRIES_FILE, MANIFEST_FILE, SNAPSHOT_FORMAT_VERSION,
};
pub use store::{cosine_similarity, IndexEntry, IndexStats, SearchParams, VectorIndex};
