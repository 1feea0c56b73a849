//! StreamVault Write Path
//!
//! This crate implements the per-segment write path of StreamVault: the
//! component that takes the ordered operation stream of a single segment
//! (appends, batch merges, seals) from the durable log and flushes it
//! durably to an append-only storage tier.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐
//! │  Durable Log │  orders operations, fills the append cache
//! └──────┬───────┘
//!        │ add(op)                     one aggregator per segment
//!        ▼
//! ┌────────────────────┐   must_flush()/flush()   ┌────────────┐
//! │  SegmentAggregator │ ◄──────────────────────── │   Driver   │
//! │  - validates       │                           └────────────┘
//! │  - batches appends │
//! │  - merges batches  │   write / concat / seal
//! │  - seals           │ ──────────────────────────┐
//! └────────────────────┘                           ▼
//!                                          ┌───────────────┐
//!                                          │  Storage Tier │
//!                                          └───────────────┘
//! ```
//!
//! ## Main Components
//!
//! - [`SegmentAggregator`]: the aggregator itself (validation, flush
//!   planning and execution, merge and seal coordination, startup
//!   reconciliation)
//! - [`SegmentStorage`]: the storage-tier contract the aggregator consumes
//! - [`WriterDataSource`]: the container-side contract (append cache,
//!   segment metadata registry, merge notifications)
//! - [`WriterConfig`]: flush thresholds and write sizing
//! - [`memory`]: in-memory implementations of both contracts for tests and
//!   development
//!
//! ## Integrity Model
//!
//! The aggregator sits between two independent sources of truth: the
//! in-memory segment metadata and the storage tier. It reconciles the two at
//! startup, re-validates them around every merge, and classifies every
//! failure as either a caller bug, data corruption (halt the container), or
//! a transient storage failure (retry the flush). See [`WriterError`].

pub mod aggregator;
pub mod config;
pub mod data_source;
pub mod error;
pub mod flush;
pub mod memory;
pub mod storage;

pub use aggregator::SegmentAggregator;
pub use config::WriterConfig;
pub use data_source::WriterDataSource;
pub use error::{Result, WriterError};
pub use flush::FlushResult;
pub use storage::{SegmentStorage, StorageError, StorageResult};
