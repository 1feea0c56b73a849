//! Core Data Model for StreamVault
//!
//! This crate defines the shared vocabulary of the StreamVault write path:
//!
//! - [`SegmentMetadata`]: the per-segment metadata record that is mutably
//!   shared between the durable log, the storage writer, and the container
//!   metadata owner
//! - [`StorageOperation`]: the ordered operation stream the durable log hands
//!   to the storage writer (appends, batch merges, seals)
//! - [`SegmentProperties`]: what the storage tier reports about a segment
//!
//! ## Where This Sits
//!
//! ```text
//! ┌──────────────┐  StorageOperation   ┌──────────────────┐
//! │ Durable Log  │ ──────────────────→ │  Segment Writer  │
//! └──────────────┘                     │  (per segment)   │
//!        │                             └────────┬─────────┘
//!        │ SegmentMetadata (shared)             │ write / concat / seal
//!        ▼                                      ▼
//! ┌──────────────┐                     ┌──────────────────┐
//! │  Container   │  SegmentProperties  │   Storage Tier   │
//! │  Metadata    │ ←────────────────── │  (append-only)   │
//! └──────────────┘                     └──────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! - Offsets and lengths are `i64`: the write path validates non-negativity
//!   explicitly and uses `-1` as the "never reconciled" sentinel for storage
//!   length, so signed arithmetic keeps every comparison direct
//! - Payloads are `bytes::Bytes` for zero-copy hand-off from the log's cache
//! - `SegmentMetadata` uses atomics instead of locks: every consumer reads or
//!   writes single fields, never multi-field snapshots

pub mod metadata;
pub mod operation;
pub mod segment;

pub use metadata::SegmentMetadata;
pub use operation::{CacheKey, OperationPayload, StorageOperation};
pub use segment::SegmentProperties;
