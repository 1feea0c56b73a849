//! Storage Tier Contract
//!
//! This module defines [`SegmentStorage`] - the narrow interface the write
//! path needs from the storage tier. The tier exposes exactly four
//! operations, all append-oriented:
//!
//! - `get_info`: length and seal state of a segment
//! - `write`: append bytes at the segment's current tail
//! - `concat`: fold one segment's full contents onto another's tail
//! - `seal`: close a segment to further appends (idempotent)
//!
//! There is deliberately no random-access write and no read path here: the
//! write path only ever appends, and corruption detection works off lengths
//! and seal state, not contents.
//!
//! ## Deadlines
//!
//! Every call carries the remaining time budget of the flush that issued it.
//! Implementations backed by a network driver are expected to fail with
//! [`StorageError::Timeout`] when the budget expires mid-call; the in-memory
//! implementation ignores it.
//!
//! ## Thread Safety
//!
//! One storage client is shared across all per-segment writers in a process
//! as `Arc<dyn SegmentStorage>`, so implementations must be `Send + Sync`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use streamvault_core::SegmentProperties;
use thiserror::Error;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("segment not found: {0}")]
    SegmentNotFound(String),

    #[error("segment is sealed: {0}")]
    SegmentSealed(String),

    #[error("segment is not sealed: {0}")]
    NotSealed(String),

    #[error("bad write offset for segment '{name}': expected {expected}, got {actual}")]
    BadOffset {
        name: String,
        expected: i64,
        actual: i64,
    },

    #[error("storage operation timed out")]
    Timeout,
}

/// Append-only storage tier for segment data.
#[async_trait]
pub trait SegmentStorage: Send + Sync {
    /// Report the current length and seal state of a segment.
    async fn get_info(&self, name: &str, timeout: Duration) -> StorageResult<SegmentProperties>;

    /// Append `data` to the segment at `offset`.
    ///
    /// `offset` must equal the segment's current length; anything else fails
    /// with [`StorageError::BadOffset`]. This is the write path's guard
    /// against double-writes after a crash or replay.
    async fn write(
        &self,
        name: &str,
        offset: i64,
        data: Bytes,
        timeout: Duration,
    ) -> StorageResult<()>;

    /// Append the full contents of `source` to `target` at `target`'s
    /// current tail, then remove `source`. `source` must be sealed.
    async fn concat(&self, target: &str, source: &str, timeout: Duration) -> StorageResult<()>;

    /// Close the segment to further appends. Idempotent.
    async fn seal(&self, name: &str, timeout: Duration) -> StorageResult<()>;
}
