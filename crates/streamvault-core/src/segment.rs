//! Storage-Reported Segment Properties

use serde::{Deserialize, Serialize};

/// What the storage tier reports about a segment.
///
/// Returned by the storage `get_info` call. The write path compares these
/// against [`crate::SegmentMetadata`] to detect divergence between the two
/// sources of truth: a mismatch either reconciles (length drift after a log
/// replay) or surfaces as data corruption (a seal the metadata never saw).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentProperties {
    /// Segment name in the storage tier.
    pub name: String,

    /// Bytes durably stored.
    pub length: i64,

    /// Whether the storage tier has acknowledged a seal.
    pub sealed: bool,
}

impl SegmentProperties {
    pub fn new(name: impl Into<String>, length: i64, sealed: bool) -> Self {
        Self {
            name: name.into(),
            length,
            sealed,
        }
    }
}
