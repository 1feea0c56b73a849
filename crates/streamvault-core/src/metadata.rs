//! Segment Metadata
//!
//! This module defines [`SegmentMetadata`] - the per-segment record shared
//! between the durable log (which accepts operations), the storage writer
//! (which flushes them), and the container metadata owner.
//!
//! ## Ownership Model
//!
//! The metadata is owned externally and handed to each subsystem as
//! `Arc<SegmentMetadata>`. Each field has exactly one writer:
//!
//! - `durable_log_length`: advanced by the durable log as it accepts
//!   operations; the storage writer only reads it
//! - `storage_length`: advanced by the storage writer as bytes become durable
//!   in the storage tier
//! - `sealed`: set by the durable log when it stops accepting appends (the
//!   storage writer may also set it when initialization discovers a seal the
//!   log already acknowledged)
//! - `sealed_in_storage`: set by the storage writer once the storage tier
//!   acknowledges the seal
//! - `deleted`: set by the storage writer when a merged batch segment is
//!   retired
//!
//! ## Invariants
//!
//! - `0 <= storage_length <= durable_log_length` once initialized
//! - `sealed_in_storage` implies `sealed`
//! - once `deleted`, no further mutation
//!
//! Fields are atomics rather than a locked struct: no consumer ever needs a
//! multi-field snapshot, and the durable log reads `sealed` on its hot path.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Storage length value before the first reconciliation against the storage
/// tier.
pub const STORAGE_LENGTH_UNKNOWN: i64 = -1;

/// Per-segment metadata shared across the write path.
#[derive(Debug)]
pub struct SegmentMetadata {
    id: u64,
    container_id: u32,
    name: String,
    parent_id: Option<u64>,
    durable_log_length: AtomicI64,
    storage_length: AtomicI64,
    sealed: AtomicBool,
    sealed_in_storage: AtomicBool,
    deleted: AtomicBool,
}

impl SegmentMetadata {
    /// Create metadata for a stand-alone segment.
    pub fn new(id: u64, container_id: u32, name: impl Into<String>) -> Self {
        Self::with_parent(id, container_id, name, None)
    }

    /// Create metadata for a batch segment that will eventually be merged
    /// into `parent_id`, or a stand-alone segment if `parent_id` is `None`.
    pub fn with_parent(
        id: u64,
        container_id: u32,
        name: impl Into<String>,
        parent_id: Option<u64>,
    ) -> Self {
        Self {
            id,
            container_id,
            name: name.into(),
            parent_id,
            durable_log_length: AtomicI64::new(0),
            storage_length: AtomicI64::new(STORAGE_LENGTH_UNKNOWN),
            sealed: AtomicBool::new(false),
            sealed_in_storage: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn container_id(&self) -> u32 {
        self.container_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent segment id, or `None` for a stand-alone segment. Only batch
    /// segments (those with a parent) can be merged.
    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    pub fn is_batch(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Bytes accepted into the durable log. Upper bound on what may be
    /// flushed to storage.
    pub fn durable_log_length(&self) -> i64 {
        self.durable_log_length.load(Ordering::Acquire)
    }

    /// Advance the durable log length. Called by the durable log only.
    pub fn set_durable_log_length(&self, length: i64) {
        self.durable_log_length.store(length, Ordering::Release);
    }

    /// Bytes confirmed durable in the storage tier, or
    /// [`STORAGE_LENGTH_UNKNOWN`] before the first reconciliation.
    pub fn storage_length(&self) -> i64 {
        self.storage_length.load(Ordering::Acquire)
    }

    /// Update the durable storage length. Called by the storage writer only.
    pub fn set_storage_length(&self, length: i64) {
        self.storage_length.store(length, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Mark the segment as sealed in the log. The storage writer uses this
    /// only when initialization discovers storage state the metadata lacks.
    pub fn mark_sealed(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed_in_storage(&self) -> bool {
        self.sealed_in_storage.load(Ordering::Acquire)
    }

    /// Record the storage tier's acknowledgement of the seal. Terminal.
    pub fn mark_sealed_in_storage(&self) {
        self.sealed_in_storage.store(true, Ordering::Release);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Retire the segment. Set on a batch segment once its contents have been
    /// merged into the parent.
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }
}
