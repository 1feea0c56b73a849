//! Storage Operations
//!
//! This module defines [`StorageOperation`] - the unit of work the durable
//! log hands to the storage writer, in the exact order the log accepted it.
//!
//! ## Operation Kinds
//!
//! - **Append**: payload carried inline
//! - **CachedAppend**: payload lives in the log's append cache, keyed by
//!   [`CacheKey`]; a miss at flush time is data corruption
//! - **MergeBatch**: fold a fully-flushed batch segment into this (parent)
//!   segment via a single storage concat; `length` is the batch's
//!   contribution as known at acceptance time
//! - **Seal**: no further operations follow; terminal for the segment
//!
//! Every operation carries the sequence number the durable log assigned to
//! it, the id of the segment it applies to (for merges: the parent), and the
//! offset at which it takes effect. Offsets within one segment's stream are
//! contiguous: each operation starts where the previous one ended.

use std::fmt;

use bytes::Bytes;

/// Key under which a cached append's payload is held by the log's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub segment_id: u64,
    pub offset: i64,
}

impl CacheKey {
    pub fn new(segment_id: u64, offset: i64) -> Self {
        Self { segment_id, offset }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.segment_id, self.offset)
    }
}

/// Payload of a [`StorageOperation`], discriminated by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationPayload {
    /// Append with the payload inline.
    Append { data: Bytes },
    /// Append whose payload must be fetched from the append cache.
    CachedAppend { length: i64, key: CacheKey },
    /// Merge the batch segment `source_id` into this segment.
    MergeBatch { source_id: u64, length: i64 },
    /// Seal the segment; nothing may follow.
    Seal,
}

/// A single operation from the durable log, addressed to one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOperation {
    sequence_number: i64,
    segment_id: u64,
    offset: i64,
    payload: OperationPayload,
}

impl StorageOperation {
    pub fn append(sequence_number: i64, segment_id: u64, offset: i64, data: Bytes) -> Self {
        Self {
            sequence_number,
            segment_id,
            offset,
            payload: OperationPayload::Append { data },
        }
    }

    pub fn cached_append(
        sequence_number: i64,
        segment_id: u64,
        offset: i64,
        length: i64,
        key: CacheKey,
    ) -> Self {
        Self {
            sequence_number,
            segment_id,
            offset,
            payload: OperationPayload::CachedAppend { length, key },
        }
    }

    /// A merge of batch segment `source_id` into parent `segment_id` at
    /// `offset`. `length` is the batch's contributed bytes.
    pub fn merge_batch(
        sequence_number: i64,
        segment_id: u64,
        offset: i64,
        source_id: u64,
        length: i64,
    ) -> Self {
        Self {
            sequence_number,
            segment_id,
            offset,
            payload: OperationPayload::MergeBatch { source_id, length },
        }
    }

    pub fn seal(sequence_number: i64, segment_id: u64, offset: i64) -> Self {
        Self {
            sequence_number,
            segment_id,
            offset,
            payload: OperationPayload::Seal,
        }
    }

    /// Sequence number assigned by the durable log.
    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    /// The segment this operation applies to. For merges this is the parent
    /// (target) segment.
    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    /// Offset within the segment at which this operation takes effect.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Number of bytes this operation adds to the segment. Seals add none.
    pub fn length(&self) -> i64 {
        match &self.payload {
            OperationPayload::Append { data } => data.len() as i64,
            OperationPayload::CachedAppend { length, .. } => *length,
            OperationPayload::MergeBatch { length, .. } => *length,
            OperationPayload::Seal => 0,
        }
    }

    pub fn payload(&self) -> &OperationPayload {
        &self.payload
    }

    /// True for both inline and cached appends.
    pub fn is_append(&self) -> bool {
        matches!(
            self.payload,
            OperationPayload::Append { .. } | OperationPayload::CachedAppend { .. }
        )
    }

    pub fn is_merge_batch(&self) -> bool {
        matches!(self.payload, OperationPayload::MergeBatch { .. })
    }

    pub fn is_seal(&self) -> bool {
        matches!(self.payload, OperationPayload::Seal)
    }

    fn kind_name(&self) -> &'static str {
        match self.payload {
            OperationPayload::Append { .. } => "Append",
            OperationPayload::CachedAppend { .. } => "CachedAppend",
            OperationPayload::MergeBatch { .. } => "MergeBatch",
            OperationPayload::Seal => "Seal",
        }
    }
}

impl fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[seq={}, segment={}, offset={}, length={}]",
            self.kind_name(),
            self.sequence_number,
            self.segment_id,
            self.offset,
            self.length()
        )
    }
}
