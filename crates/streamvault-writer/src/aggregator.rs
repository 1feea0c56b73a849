//! Segment Aggregator
//!
//! This module implements [`SegmentAggregator`], the per-segment write path:
//! it buffers the ordered operations the durable log has accepted for one
//! segment and flushes them durably to the storage tier.
//!
//! ## What Does SegmentAggregator Do?
//!
//! 1. **Validates** every incoming operation against the segment's metadata:
//!    contiguous offsets, correct segment routing, nothing after a seal
//! 2. **Aggregates** many small appends into large storage writes bounded by
//!    `max_flush_size_bytes`
//! 3. **Merges** fully-flushed batch segments into this segment via a single
//!    storage concat, with pre- and post-checks against both sources of truth
//! 4. **Seals** the segment in storage once the log has sealed it, then
//!    terminates
//! 5. **Reconciles** its metadata with the storage tier at startup and treats
//!    any unexplainable disagreement as data corruption
//!
//! ## Write Flow
//!
//! ```text
//! durable log ──add(op)──→ [ operation queue ]
//!                                 │
//!            driver polls must_flush(), calls flush(timeout)
//!                                 │
//!                   ┌─────────────┴─────────────┐
//!                   │ drain/excess append loop  │──→ storage.write
//!                   │ merge coordinator         │──→ storage.concat
//!                   │ seal coordinator          │──→ storage.seal
//!                   └─────────────┬─────────────┘
//!                                 │ on success only
//!                       pop queue, advance metadata
//! ```
//!
//! The queue is mutated strictly after the corresponding storage call
//! succeeds. A flush that fails with a transient error or times out leaves
//! the aggregator in the same state it started in, ready for retry.
//!
//! ## Thread Safety
//!
//! Each aggregator is owned by a single driver task which serializes all
//! entry points; there is no internal locking. `add` and `must_flush` never
//! suspend. `initialize` and `flush` suspend only at storage calls. The
//! storage client and data source are shared across aggregators and must be
//! safe for concurrent use.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use streamvault_core::{OperationPayload, SegmentMetadata, StorageOperation};
use tokio::time::Instant;

use crate::config::WriterConfig;
use crate::data_source::WriterDataSource;
use crate::error::{Result, WriterError};
use crate::flush::{Deadline, FlushPlan, FlushResult};
use crate::storage::SegmentStorage;

/// Which append-flushing loop `flush` runs.
#[derive(Clone, Copy)]
enum FlushMode {
    /// Flush every append at the head of the queue, regardless of
    /// thresholds, until a merge or seal (or the end of the queue) is
    /// reached.
    Drain,
    /// Flush only while the size or time threshold remains exceeded.
    Excess,
}

/// Aggregates and flushes the pending storage operations of one segment.
pub struct SegmentAggregator {
    metadata: Arc<SegmentMetadata>,
    data_source: Arc<dyn WriterDataSource>,
    storage: Arc<dyn SegmentStorage>,
    config: WriterConfig,

    /// Pending operations, in durable-log order.
    operations: VecDeque<StorageOperation>,

    /// Sum of append lengths still queued. Merges and seals contribute
    /// nothing; merges are tracked by `merge_batch_count`.
    outstanding_length: i64,

    /// Offset the next operation must start at. Negative until
    /// `initialize` reconciles with storage.
    last_added_offset: i64,

    merge_batch_count: usize,
    seal_pending: bool,
    last_flush: Instant,
    closed: bool,
}

impl SegmentAggregator {
    /// Create an aggregator for the segment described by `metadata`.
    ///
    /// The aggregator accepts no operations until [`initialize`] has
    /// reconciled the metadata with the storage tier.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the segment belongs to a different container
    /// than the data source serves.
    ///
    /// [`initialize`]: SegmentAggregator::initialize
    pub fn new(
        metadata: Arc<SegmentMetadata>,
        data_source: Arc<dyn WriterDataSource>,
        storage: Arc<dyn SegmentStorage>,
        config: WriterConfig,
    ) -> Result<Self> {
        if metadata.container_id() != data_source.container_id() {
            return Err(WriterError::InvalidOperation(format!(
                "segment {} belongs to container {} but the data source serves container {}",
                metadata.id(),
                metadata.container_id(),
                data_source.container_id()
            )));
        }

        Ok(Self {
            metadata,
            data_source,
            storage,
            config,
            operations: VecDeque::new(),
            outstanding_length: 0,
            last_added_offset: -1,
            merge_batch_count: 0,
            seal_pending: false,
            last_flush: Instant::now(),
            closed: false,
        })
    }

    /// The metadata of the segment this aggregator serves.
    pub fn metadata(&self) -> &Arc<SegmentMetadata> {
        &self.metadata
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sequence number of the oldest operation not yet committed to storage,
    /// or `None` if nothing is pending.
    pub fn lowest_uncommitted_sequence_number(&self) -> Option<i64> {
        self.operations.front().map(|op| op.sequence_number())
    }

    /// Time since the last successful flush, or since construction if no
    /// flush has completed yet.
    pub fn elapsed_since_last_flush(&self) -> Duration {
        self.last_flush.elapsed()
    }

    /// Whether the current state requires a flush: the size or time
    /// threshold is exceeded, or a merge or seal is pending.
    pub fn must_flush(&self) -> bool {
        self.exceeds_thresholds() || self.seal_pending || self.merge_batch_count > 0
    }

    fn exceeds_thresholds(&self) -> bool {
        self.outstanding_length >= self.config.flush_threshold_bytes
            || self.elapsed_since_last_flush() >= self.config.flush_threshold_time()
    }

    /// Reconcile the segment metadata with the storage tier.
    ///
    /// Storage is authoritative for the durably-written length: if the
    /// metadata disagrees (the log may have been replayed past a flush), the
    /// metadata is overwritten with storage's value. A segment that storage
    /// reports as sealed while the metadata does not is data corruption,
    /// since storage never seals on its own.
    pub async fn initialize(&mut self, timeout: Duration) -> Result<()> {
        if self.closed {
            return Err(WriterError::AlreadyClosed);
        }
        if self.last_added_offset >= 0 {
            return Err(WriterError::AlreadyInitialized);
        }

        let info = self.storage.get_info(self.metadata.name(), timeout).await?;

        if self.metadata.storage_length() != info.length {
            if self.metadata.storage_length() >= 0 {
                tracing::warn!(
                    segment = %self.metadata.name(),
                    metadata_length = self.metadata.storage_length(),
                    storage_length = info.length,
                    "Metadata storage length differs from storage, updating metadata"
                );
            }
            self.metadata.set_storage_length(info.length);
        }

        if info.sealed && !self.metadata.is_sealed() {
            return Err(self.corruption(format!(
                "segment '{}' is sealed in storage but not in the metadata",
                self.metadata.name()
            )));
        }

        self.last_added_offset = self.metadata.storage_length();
        self.last_flush = Instant::now();

        tracing::info!(
            segment = %self.metadata.name(),
            storage_length = info.length,
            sealed = info.sealed,
            "Segment aggregator initialized"
        );
        Ok(())
    }

    /// Accept the next operation from the durable log.
    ///
    /// Synchronous; never suspends. Validation distinguishes caller bugs
    /// (wrong routing, over-sized appends) from data corruption (offset
    /// gaps, operations past the durable log length, anything after a seal).
    pub fn add(&mut self, operation: StorageOperation) -> Result<()> {
        self.ensure_initialized_and_not_closed()?;
        self.check_segment_id(&operation)?;
        self.check_valid_operation(&operation)?;

        let offset = operation.offset();
        let length = operation.length();
        match operation.payload() {
            OperationPayload::MergeBatch { .. } => self.merge_batch_count += 1,
            OperationPayload::Seal => self.seal_pending = true,
            _ => self.outstanding_length += length,
        }
        self.last_added_offset = offset + length;
        self.operations.push_back(operation);
        Ok(())
    }

    /// Flush pending operations to storage.
    ///
    /// With a merge or seal pending, drains every append ahead of it, then
    /// attempts the merge, then the seal. Otherwise flushes appends only
    /// while the size or time threshold remains exceeded.
    ///
    /// Every storage call receives the remaining share of `timeout`; an
    /// iteration that starts with no budget left fails with `Timeout`, with
    /// no queue mutation beyond what earlier iterations already committed.
    pub async fn flush(&mut self, timeout: Duration) -> Result<FlushResult> {
        self.ensure_initialized_and_not_closed()?;

        let deadline = Deadline::after(timeout);
        let has_merge = self.merge_batch_count > 0;
        let has_seal = self.seal_pending;

        if has_seal || has_merge {
            let mut result = self.flush_appends(&deadline, FlushMode::Drain).await?;
            if has_merge {
                result.extend(self.merge_if_necessary(&deadline).await?);
            }
            if has_seal {
                result.extend(self.seal_if_necessary(&deadline).await?);
            }
            Ok(result)
        } else {
            self.flush_appends(&deadline, FlushMode::Excess).await
        }
    }

    /// Close the aggregator. Idempotent. Releases the operation queue; the
    /// metadata is externally owned and untouched.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.operations = VecDeque::new();
            tracing::info!(segment = %self.metadata.name(), "Segment aggregator closed");
        }
    }

    // ------------------------------------------------------------------
    // Flushing
    // ------------------------------------------------------------------

    /// Run append flush iterations while the head of the queue is an append
    /// and the mode's condition holds.
    async fn flush_appends(&mut self, deadline: &Deadline, mode: FlushMode) -> Result<FlushResult> {
        let mut result = FlushResult::default();
        loop {
            let head_is_append = self
                .operations
                .front()
                .is_some_and(|op| op.is_append());
            let proceed = head_is_append
                && match mode {
                    FlushMode::Drain => true,
                    FlushMode::Excess => self.exceeds_thresholds(),
                };
            if !proceed {
                break;
            }
            result.extend(self.flush_once(deadline).await?);
        }
        Ok(result)
    }

    /// Plan and execute a single bounded storage write.
    async fn flush_once(&mut self, deadline: &Deadline) -> Result<FlushResult> {
        if deadline.is_expired() {
            return Err(WriterError::Timeout);
        }

        let plan = self.plan_flush()?;
        if plan.count() == 0 {
            return Ok(FlushResult::default());
        }

        let count = plan.count();
        let total_length = plan.total_length();
        if total_length > 0 {
            self.storage
                .write(
                    self.metadata.name(),
                    self.metadata.storage_length(),
                    plan.into_bytes(),
                    deadline.remaining(),
                )
                .await?;
        }

        Ok(self.update_state_post_flush(count, total_length))
    }

    /// Walk the queue from the head, accumulating contiguous append payloads
    /// up to `max_flush_size_bytes`. The first operation is always included;
    /// `add` guarantees no single append exceeds the bound.
    fn plan_flush(&self) -> Result<FlushPlan> {
        let mut plan = FlushPlan::default();
        for op in &self.operations {
            if plan.total_length() > 0
                && plan.total_length() + op.length() > self.config.max_flush_size_bytes
            {
                break;
            }

            match op.payload() {
                OperationPayload::Append { data } => plan.push(data),
                OperationPayload::CachedAppend { key, .. } => {
                    let data = self.data_source.append_data(key).ok_or_else(|| {
                        self.corruption(format!(
                            "no cached payload for operation '{op}' with key '{key}'"
                        ))
                    })?;
                    plan.push(&data);
                }
                _ => break,
            }
        }
        Ok(plan)
    }

    /// Commit a successful write: pop the flushed operations, advance the
    /// metadata storage length, refresh the flush clock.
    fn update_state_post_flush(&mut self, count: usize, total_length: i64) -> FlushResult {
        for _ in 0..count {
            let popped = self.operations.pop_front();
            debug_assert!(
                matches!(&popped, Some(op) if op.is_append()),
                "flushed operation was not an append"
            );
        }

        self.metadata
            .set_storage_length(self.metadata.storage_length() + total_length);
        self.outstanding_length -= total_length;
        debug_assert!(self.outstanding_length >= 0, "negative outstanding length");

        self.last_flush = Instant::now();
        FlushResult {
            flushed_bytes: total_length,
            merged_bytes: 0,
        }
    }

    // ------------------------------------------------------------------
    // Merging
    // ------------------------------------------------------------------

    /// Merge the batch segment at the head of the queue into this segment,
    /// if there is one and it is ready.
    ///
    /// A batch that is not yet sealed in storage or not yet fully drained is
    /// not an error: the operation stays queued and is retried on the next
    /// flush. At most one merge is executed per `flush` invocation.
    async fn merge_if_necessary(&mut self, deadline: &Deadline) -> Result<FlushResult> {
        debug_assert!(!self.metadata.is_batch(), "cannot merge into a batch segment");

        let source_id = match self.operations.front().map(StorageOperation::payload) {
            Some(OperationPayload::MergeBatch { source_id, .. }) => *source_id,
            _ => return Ok(FlushResult::default()),
        };

        let batch = self.data_source.segment_metadata(source_id).ok_or_else(|| {
            self.corruption(format!("no metadata for batch segment {source_id}"))
        })?;
        self.merge_with(batch, deadline).await
    }

    /// Execute the merge of `batch` into this segment at the current tail.
    ///
    /// Storage is consulted before the concat (does it agree with the
    /// batch's metadata?) and after (is the parent exactly the sum of the
    /// two?); either disagreement is data corruption and leaves the queue
    /// untouched.
    async fn merge_with(
        &mut self,
        batch: Arc<SegmentMetadata>,
        deadline: &Deadline,
    ) -> Result<FlushResult> {
        if batch.is_deleted() {
            return Err(self.corruption(format!(
                "attempted to merge deleted batch segment '{}'",
                batch.name()
            )));
        }

        if !batch.is_sealed_in_storage() || batch.durable_log_length() > batch.storage_length() {
            // The batch still has unflushed data. Retry on a later flush.
            return Ok(FlushResult::default());
        }

        if deadline.is_expired() {
            return Err(WriterError::Timeout);
        }
        let batch_info = self
            .storage
            .get_info(batch.name(), deadline.remaining())
            .await?;
        if batch_info.length != batch.storage_length() {
            return Err(self.corruption(format!(
                "batch segment '{}' cannot be merged: its metadata storage length ({}) \
                 disagrees with storage ({})",
                batch.name(),
                batch.storage_length(),
                batch_info.length
            )));
        }
        let merged_length = batch_info.length;

        if deadline.is_expired() {
            return Err(WriterError::Timeout);
        }
        self.storage
            .concat(self.metadata.name(), batch.name(), deadline.remaining())
            .await?;

        if deadline.is_expired() {
            return Err(WriterError::Timeout);
        }
        let parent_info = self
            .storage
            .get_info(self.metadata.name(), deadline.remaining())
            .await?;
        let expected_length = self.metadata.storage_length() + merged_length;
        if parent_info.length != expected_length {
            return Err(self.corruption(format!(
                "unexpected length for segment '{}' after merging '{}': expected {}, storage \
                 reports {}",
                self.metadata.name(),
                batch.name(),
                expected_length,
                parent_info.length
            )));
        }

        let popped = self.operations.pop_front();
        debug_assert!(
            matches!(&popped, Some(op) if op.is_merge_batch()),
            "head operation was not the executed merge"
        );
        debug_assert!(self.merge_batch_count > 0, "merge count underflow");
        self.merge_batch_count -= 1;

        self.metadata.set_storage_length(parent_info.length);
        if parent_info.sealed && !self.metadata.is_sealed_in_storage() {
            self.metadata.mark_sealed();
            self.metadata.mark_sealed_in_storage();
        }

        batch.mark_deleted();
        self.data_source.delete_segment(batch.name());
        self.data_source.complete_merge(self.metadata.id(), batch.id());

        self.last_flush = Instant::now();
        tracing::info!(
            segment = %self.metadata.name(),
            batch = %batch.name(),
            merged_bytes = merged_length,
            "Merged batch segment"
        );
        Ok(FlushResult {
            flushed_bytes: 0,
            merged_bytes: merged_length,
        })
    }

    // ------------------------------------------------------------------
    // Sealing
    // ------------------------------------------------------------------

    /// Seal the segment in storage if the pending seal has reached the head
    /// of the queue, then close the aggregator.
    async fn seal_if_necessary(&mut self, deadline: &Deadline) -> Result<FlushResult> {
        let head_is_seal = self.operations.front().is_some_and(|op| op.is_seal());
        if !self.seal_pending || !head_is_seal {
            return Ok(FlushResult::default());
        }

        if deadline.is_expired() {
            return Err(WriterError::Timeout);
        }
        self.storage
            .seal(self.metadata.name(), deadline.remaining())
            .await?;

        self.metadata.mark_sealed_in_storage();
        let popped = self.operations.pop_front();
        debug_assert!(
            matches!(&popped, Some(op) if op.is_seal()),
            "head operation was not the executed seal"
        );
        debug_assert!(
            self.operations.is_empty(),
            "operations queued behind a seal"
        );
        self.seal_pending = false;

        tracing::info!(segment = %self.metadata.name(), "Segment sealed in storage");
        self.close();
        Ok(FlushResult::default())
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    fn ensure_initialized_and_not_closed(&self) -> Result<()> {
        if self.closed {
            return Err(WriterError::AlreadyClosed);
        }
        if self.last_added_offset < 0 {
            return Err(WriterError::NotInitialized);
        }
        Ok(())
    }

    /// Routing check. Failures here are caller bugs, not corruption.
    fn check_segment_id(&self, op: &StorageOperation) -> Result<()> {
        if op.is_merge_batch() && self.metadata.is_batch() {
            return Err(WriterError::InvalidOperation(format!(
                "merge operations can only target a stand-alone segment; received '{op}'"
            )));
        }
        if op.segment_id() != self.metadata.id() {
            return Err(WriterError::InvalidOperation(format!(
                "operation '{op}' refers to segment {}, but this aggregator serves segment {}",
                op.segment_id(),
                self.metadata.id()
            )));
        }
        Ok(())
    }

    fn check_valid_operation(&self, op: &StorageOperation) -> Result<()> {
        if self.seal_pending {
            return Err(self.corruption(format!(
                "no operation is allowed after a pending seal; received '{op}'"
            )));
        }

        let offset = op.offset();
        let length = op.length();
        if offset < 0 {
            return Err(WriterError::InvalidOperation(format!(
                "operation '{op}' has a negative offset"
            )));
        }
        if length < 0 {
            return Err(WriterError::InvalidOperation(format!(
                "operation '{op}' has a negative length"
            )));
        }

        if offset != self.last_added_offset {
            return Err(self.corruption(format!(
                "wrong offset for operation '{op}': expected {}, got {offset}",
                self.last_added_offset
            )));
        }

        let durable_log_length = self.metadata.durable_log_length();
        if offset + length > durable_log_length {
            return Err(self.corruption(format!(
                "operation '{op}' extends beyond the durable log length ({durable_log_length})"
            )));
        }

        if op.is_seal() {
            if offset != durable_log_length {
                return Err(self.corruption(format!(
                    "wrong offset for seal operation '{op}': expected {durable_log_length} \
                     (durable log length)"
                )));
            }
            if !self.metadata.is_sealed() {
                return Err(self.corruption(format!(
                    "received seal operation '{op}' for a segment the log has not sealed"
                )));
            }
        } else if op.is_append() && length > self.config.max_flush_size_bytes {
            return Err(WriterError::InvalidOperation(format!(
                "operation '{op}' exceeds the maximum flush size ({})",
                self.config.max_flush_size_bytes
            )));
        }

        Ok(())
    }

    fn corruption(&self, details: String) -> WriterError {
        WriterError::DataCorruption {
            segment: self.metadata.name().to_string(),
            details,
        }
    }
}

impl fmt::Display for SegmentAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}: {}] count = {}, outstanding = {}, last offset = {}",
            self.metadata.id(),
            self.metadata.name(),
            self.operations.len(),
            self.outstanding_length,
            self.last_added_offset
        )
    }
}

impl fmt::Debug for SegmentAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryDataSource, InMemorySegmentStorage};
    use crate::storage::StorageError;
    use bytes::Bytes;
    use streamvault_core::CacheKey;

    const SEGMENT_ID: u64 = 1;
    const CONTAINER_ID: u32 = 0;
    const SEGMENT_NAME: &str = "container0/segment1";
    const TIMEOUT: Duration = Duration::from_secs(30);

    fn test_config() -> WriterConfig {
        WriterConfig {
            flush_threshold_bytes: 100,
            flush_threshold_ms: 30_000,
            max_flush_size_bytes: 1000,
        }
    }

    struct Fixture {
        metadata: Arc<SegmentMetadata>,
        storage: Arc<InMemorySegmentStorage>,
        data_source: Arc<InMemoryDataSource>,
        aggregator: SegmentAggregator,
    }

    fn build(config: WriterConfig) -> Fixture {
        let metadata = Arc::new(SegmentMetadata::new(SEGMENT_ID, CONTAINER_ID, SEGMENT_NAME));
        let storage = Arc::new(InMemorySegmentStorage::new());
        storage.create(SEGMENT_NAME);
        let data_source = Arc::new(InMemoryDataSource::new(CONTAINER_ID));
        let aggregator = SegmentAggregator::new(
            metadata.clone(),
            data_source.clone(),
            storage.clone(),
            config,
        )
        .unwrap();
        Fixture {
            metadata,
            storage,
            data_source,
            aggregator,
        }
    }

    async fn build_initialized(config: WriterConfig) -> Fixture {
        let mut fx = build(config);
        fx.aggregator.initialize(TIMEOUT).await.unwrap();
        fx
    }

    fn append(seq: i64, offset: i64, len: usize) -> StorageOperation {
        StorageOperation::append(seq, SEGMENT_ID, offset, Bytes::from(vec![b'x'; len]))
    }

    // ---------------------------------------------------------------
    // Construction and initialization
    // ---------------------------------------------------------------

    #[test]
    fn container_mismatch_is_rejected() {
        let metadata = Arc::new(SegmentMetadata::new(SEGMENT_ID, 9, SEGMENT_NAME));
        let storage = Arc::new(InMemorySegmentStorage::new());
        let data_source = Arc::new(InMemoryDataSource::new(CONTAINER_ID));
        let err =
            SegmentAggregator::new(metadata, data_source, storage, test_config()).unwrap_err();
        assert!(matches!(err, WriterError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn add_before_initialize_fails() {
        let mut fx = build(test_config());
        let err = fx.aggregator.add(append(1, 0, 10)).unwrap_err();
        assert!(matches!(err, WriterError::NotInitialized));
    }

    #[tokio::test]
    async fn initialize_twice_fails() {
        let mut fx = build_initialized(test_config()).await;
        let err = fx.aggregator.initialize(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, WriterError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn initialize_surfaces_storage_errors() {
        let mut fx = build(test_config());
        // Recreate against a storage tier that has never seen the segment.
        fx.aggregator = SegmentAggregator::new(
            fx.metadata.clone(),
            fx.data_source.clone(),
            Arc::new(InMemorySegmentStorage::new()),
            test_config(),
        )
        .unwrap();
        let err = fx.aggregator.initialize(TIMEOUT).await.unwrap_err();
        assert!(matches!(
            err,
            WriterError::Storage(StorageError::SegmentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn initialize_adopts_storage_length() {
        let mut fx = build(test_config());
        fx.storage
            .write(SEGMENT_NAME, 0, Bytes::from(vec![0u8; 100]), TIMEOUT)
            .await
            .unwrap();
        fx.metadata.set_storage_length(0);
        fx.metadata.set_durable_log_length(100);

        fx.aggregator.initialize(TIMEOUT).await.unwrap();
        assert_eq!(fx.metadata.storage_length(), 100);

        // The next accepted operation must start exactly at the boundary.
        fx.metadata.set_durable_log_length(110);
        fx.aggregator.add(append(1, 100, 10)).unwrap();
        let err = fx.aggregator.add(append(2, 50, 10)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn initialize_rejects_unexplained_storage_seal() {
        let mut fx = build(test_config());
        fx.storage
            .write(SEGMENT_NAME, 0, Bytes::from(vec![0u8; 100]), TIMEOUT)
            .await
            .unwrap();
        fx.storage.seal(SEGMENT_NAME, TIMEOUT).await.unwrap();
        fx.metadata.set_storage_length(0);

        let err = fx.aggregator.initialize(TIMEOUT).await.unwrap_err();
        assert!(err.is_corruption());
    }

    // ---------------------------------------------------------------
    // Validation in add()
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn wrong_segment_routing_is_a_caller_bug() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(10);
        let op = StorageOperation::append(1, 999, 0, Bytes::from_static(b"abc"));
        let err = fx.aggregator.add(op).unwrap_err();
        assert!(matches!(err, WriterError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn merge_into_batch_segment_is_a_caller_bug() {
        let metadata = Arc::new(SegmentMetadata::with_parent(
            7,
            CONTAINER_ID,
            "container0/segment1#batch7",
            Some(SEGMENT_ID),
        ));
        let storage = Arc::new(InMemorySegmentStorage::new());
        storage.create(metadata.name());
        let data_source = Arc::new(InMemoryDataSource::new(CONTAINER_ID));
        let mut aggregator =
            SegmentAggregator::new(metadata, data_source, storage, test_config()).unwrap();
        aggregator.initialize(TIMEOUT).await.unwrap();

        let err = aggregator
            .add(StorageOperation::merge_batch(1, 7, 0, 8, 50))
            .unwrap_err();
        assert!(matches!(err, WriterError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn offset_gap_is_corruption() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(100);
        fx.aggregator.add(append(1, 0, 10)).unwrap();
        let err = fx.aggregator.add(append(2, 20, 10)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn append_past_durable_log_length_is_corruption() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(5);
        let err = fx.aggregator.add(append(1, 0, 10)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn negative_offset_is_a_caller_bug() {
        let mut fx = build_initialized(test_config()).await;
        let op = StorageOperation::append(1, SEGMENT_ID, -5, Bytes::from_static(b"x"));
        let err = fx.aggregator.add(op).unwrap_err();
        assert!(matches!(err, WriterError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn oversized_append_is_a_caller_bug() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(10_000);
        let err = fx.aggregator.add(append(1, 0, 1001)).unwrap_err();
        assert!(matches!(err, WriterError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn append_exactly_max_flush_size_is_accepted() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(1000);
        fx.aggregator.add(append(1, 0, 1000)).unwrap();

        let result = fx.aggregator.flush(TIMEOUT).await.unwrap();
        assert_eq!(result.flushed_bytes, 1000);
        assert_eq!(fx.storage.write_sizes(), vec![1000]);
    }

    #[tokio::test]
    async fn seal_at_wrong_offset_is_corruption() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(10);
        fx.metadata.mark_sealed();
        fx.aggregator.add(append(1, 0, 10)).unwrap();
        let err = fx
            .aggregator
            .add(StorageOperation::seal(2, SEGMENT_ID, 5))
            .unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn seal_without_log_seal_is_corruption() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(10);
        fx.aggregator.add(append(1, 0, 10)).unwrap();
        let err = fx
            .aggregator
            .add(StorageOperation::seal(2, SEGMENT_ID, 10))
            .unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn nothing_is_accepted_after_a_pending_seal() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(10);
        fx.metadata.mark_sealed();
        fx.aggregator.add(append(1, 0, 10)).unwrap();
        fx.aggregator
            .add(StorageOperation::seal(2, SEGMENT_ID, 10))
            .unwrap();

        fx.metadata.set_durable_log_length(20);
        let err = fx.aggregator.add(append(3, 10, 10)).unwrap_err();
        assert!(err.is_corruption());
    }

    // ---------------------------------------------------------------
    // Threshold policy
    // ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn size_threshold_forces_flush() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(1000);
        fx.aggregator.add(append(1, 0, 99)).unwrap();
        assert!(!fx.aggregator.must_flush());
        fx.aggregator.add(append(2, 99, 1)).unwrap();
        assert!(fx.aggregator.must_flush());
    }

    #[tokio::test(start_paused = true)]
    async fn time_threshold_forces_flush() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(1000);
        fx.aggregator.add(append(1, 0, 1)).unwrap();
        assert!(!fx.aggregator.must_flush());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(fx.aggregator.must_flush());

        let result = fx.aggregator.flush(TIMEOUT).await.unwrap();
        assert_eq!(result.flushed_bytes, 1);
        assert!(!fx.aggregator.must_flush());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_seal_and_merge_force_flush() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(50);
        assert!(!fx.aggregator.must_flush());
        fx.aggregator
            .add(StorageOperation::merge_batch(1, SEGMENT_ID, 0, 7, 50))
            .unwrap();
        assert!(fx.aggregator.must_flush());
    }

    // ---------------------------------------------------------------
    // Flush planning and execution
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn flush_with_empty_queue_is_a_noop() {
        let mut fx = build_initialized(test_config()).await;
        let result = fx.aggregator.flush(TIMEOUT).await.unwrap();
        assert_eq!(result, FlushResult::default());
        assert!(fx.storage.write_sizes().is_empty());
    }

    #[tokio::test]
    async fn flush_splits_at_max_flush_size() {
        let config = WriterConfig {
            flush_threshold_bytes: 1,
            max_flush_size_bytes: 64,
            ..test_config()
        };
        let mut fx = build_initialized(config).await;
        fx.metadata.set_durable_log_length(65);
        // Two ops summing to max_flush_size + 1: the first goes alone.
        fx.aggregator.add(append(1, 0, 40)).unwrap();
        fx.aggregator.add(append(2, 40, 25)).unwrap();

        let result = fx.aggregator.flush(TIMEOUT).await.unwrap();
        assert_eq!(result.flushed_bytes, 65);
        assert_eq!(fx.storage.write_sizes(), vec![40, 25]);
        assert_eq!(fx.metadata.storage_length(), 65);
    }

    #[tokio::test]
    async fn cached_append_payload_comes_from_the_data_source() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(200);
        let key = CacheKey::new(SEGMENT_ID, 0);
        fx.data_source
            .put_append_data(key, Bytes::from(vec![b'c'; 120]));
        fx.aggregator
            .add(StorageOperation::cached_append(1, SEGMENT_ID, 0, 120, key))
            .unwrap();

        let result = fx.aggregator.flush(TIMEOUT).await.unwrap();
        assert_eq!(result.flushed_bytes, 120);
        assert_eq!(
            fx.storage.segment_data(SEGMENT_NAME).unwrap(),
            Bytes::from(vec![b'c'; 120])
        );
    }

    #[tokio::test]
    async fn cache_miss_is_corruption_and_leaves_state_untouched() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(200);
        let key = CacheKey::new(SEGMENT_ID, 0);
        fx.aggregator
            .add(StorageOperation::cached_append(1, SEGMENT_ID, 0, 120, key))
            .unwrap();

        let err = fx.aggregator.flush(TIMEOUT).await.unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(fx.metadata.storage_length(), 0);
        assert_eq!(fx.aggregator.lowest_uncommitted_sequence_number(), Some(1));
        assert!(fx.storage.write_sizes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_fails_without_mutating_the_queue() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(1000);
        fx.aggregator.add(append(1, 0, 150)).unwrap();

        let err = fx.aggregator.flush(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, WriterError::Timeout));
        assert_eq!(fx.aggregator.lowest_uncommitted_sequence_number(), Some(1));
        assert_eq!(fx.metadata.storage_length(), 0);

        // The same flush succeeds once given a budget.
        let result = fx.aggregator.flush(TIMEOUT).await.unwrap();
        assert_eq!(result.flushed_bytes, 150);
        assert_eq!(fx.metadata.storage_length(), 150);
    }

    // ---------------------------------------------------------------
    // Close
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn close_is_idempotent_and_fails_further_calls() {
        let mut fx = build_initialized(test_config()).await;
        fx.aggregator.close();
        fx.aggregator.close();
        assert!(fx.aggregator.is_closed());

        let err = fx.aggregator.add(append(1, 0, 10)).unwrap_err();
        assert!(matches!(err, WriterError::AlreadyClosed));
        let err = fx.aggregator.flush(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, WriterError::AlreadyClosed));
        let err = fx.aggregator.initialize(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, WriterError::AlreadyClosed));
    }

    #[tokio::test]
    async fn sequence_numbers_track_the_queue_head() {
        let mut fx = build_initialized(test_config()).await;
        fx.metadata.set_durable_log_length(1000);
        assert_eq!(fx.aggregator.lowest_uncommitted_sequence_number(), None);

        fx.aggregator.add(append(41, 0, 60)).unwrap();
        fx.aggregator.add(append(42, 60, 60)).unwrap();
        assert_eq!(fx.aggregator.lowest_uncommitted_sequence_number(), Some(41));

        fx.aggregator.flush(TIMEOUT).await.unwrap();
        assert_eq!(fx.aggregator.lowest_uncommitted_sequence_number(), None);
    }
}
