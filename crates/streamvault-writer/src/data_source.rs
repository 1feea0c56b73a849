//! Writer Data Source Contract
//!
//! [`WriterDataSource`] is the write path's view of the rest of the
//! container: the append cache the durable log fills, the metadata registry
//! for other segments, and the listeners that need to hear about completed
//! merges.
//!
//! All methods are synchronous: payload lookup and metadata resolution are
//! in-memory operations, and keeping them off the async boundary means the
//! only suspension points in a flush are the storage calls themselves.
//!
//! The data source is shared across every per-segment writer in a container,
//! so implementations must be `Send + Sync`. The merge notifications
//! (`delete_segment`, `complete_merge`) may fan out to other subsystems and
//! must tolerate concurrent callers.

use std::sync::Arc;

use bytes::Bytes;
use streamvault_core::{CacheKey, SegmentMetadata};

pub trait WriterDataSource: Send + Sync {
    /// Id of the container this data source serves. Each segment writer
    /// checks its segment belongs to the same container at construction.
    fn container_id(&self) -> u32;

    /// Fetch the payload of a cached append.
    ///
    /// Returns `None` on a miss. The durable log guarantees payloads stay
    /// cached until flushed, so a miss for an accepted operation is data
    /// corruption, not a recoverable condition.
    fn append_data(&self, key: &CacheKey) -> Option<Bytes>;

    /// Resolve the shared metadata of another segment in this container.
    fn segment_metadata(&self, segment_id: u64) -> Option<Arc<SegmentMetadata>>;

    /// Notify that a segment no longer exists in storage (merged away).
    fn delete_segment(&self, name: &str);

    /// Notify listeners (read index, etc.) that a batch segment has been
    /// fully merged into its parent.
    fn complete_merge(&self, parent_id: u64, source_id: u64);
}
