//! Writer Error Types
//!
//! Errors fall into three disjoint kinds, and the driver reacts differently
//! to each:
//!
//! ### Caller contract violations
//! - `AlreadyClosed`, `NotInitialized`, `AlreadyInitialized`,
//!   `InvalidOperation`: the caller routed an operation to the wrong
//!   aggregator, exceeded a configured bound, or invoked an entry point in
//!   the wrong lifecycle state. These indicate a bug in the calling code;
//!   the aggregator's state is not trustworthy afterwards.
//!
//! ### Data corruption
//! - `DataCorruption`: the in-memory metadata, the storage tier, and the
//!   operation stream disagree in a way that cannot be reconciled (offset
//!   gaps, a seal the metadata never saw, a cache miss for accepted data,
//!   merge length divergence). The driver is expected to halt the container
//!   rather than propagate the inconsistency.
//!
//! ### Transient failures
//! - `Storage`, `Timeout`: the storage call failed or the flush deadline
//!   expired. No queue state was mutated; the same flush may be retried.
//!
//! All writer operations return [`Result<T>`], aliased to
//! `Result<T, WriterError>`, so errors propagate with `?`.

use thiserror::Error;

use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, WriterError>;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("segment aggregator is closed")]
    AlreadyClosed,

    #[error("segment aggregator is not initialized")]
    NotInitialized,

    #[error("segment aggregator is already initialized")]
    AlreadyInitialized,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("data corruption on segment '{segment}': {details}")]
    DataCorruption { segment: String, details: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("flush deadline exceeded")]
    Timeout,
}

impl WriterError {
    /// True for errors that indicate an unreconcilable disagreement between
    /// metadata, storage, and the operation stream. The driver halts the
    /// container on these instead of retrying.
    pub fn is_corruption(&self) -> bool {
        matches!(self, WriterError::DataCorruption { .. })
    }
}
