//! Flush Bookkeeping
//!
//! Small value types shared by the flush path: the outcome summary returned
//! to the driver, the planner's assembled write, and the deadline that hands
//! each storage call its remaining time budget.

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::time::Instant;

/// Summary of one `flush` invocation, aggregated across its iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushResult {
    /// Append bytes written to storage.
    pub flushed_bytes: i64,

    /// Bytes folded in from merged batch segments.
    pub merged_bytes: i64,
}

impl FlushResult {
    /// Fold another result into this one.
    pub fn extend(&mut self, other: FlushResult) {
        self.flushed_bytes += other.flushed_bytes;
        self.merged_bytes += other.merged_bytes;
    }

    pub fn total_bytes(&self) -> i64 {
        self.flushed_bytes + self.merged_bytes
    }
}

impl fmt::Display for FlushResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flushed {} bytes, merged {} bytes",
            self.flushed_bytes, self.merged_bytes
        )
    }
}

/// One planned storage write: a contiguous run of append payloads from the
/// head of the queue, bounded by the configured maximum flush size.
#[derive(Debug, Default)]
pub(crate) struct FlushPlan {
    buffer: BytesMut,
    count: usize,
}

impl FlushPlan {
    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buffer.put_slice(data);
        self.count += 1;
    }

    /// Number of operations consumed by this plan.
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn total_length(&self) -> i64 {
        self.buffer.len() as i64
    }

    pub(crate) fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

/// Expiry point shared by every storage call within one `flush`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
        }
    }

    /// Remaining budget, saturating at zero.
    pub(crate) fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
