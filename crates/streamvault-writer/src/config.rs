//! Writer Configuration
//!
//! This module defines configuration for the per-segment write path.
//!
//! ## WriterConfig
//!
//! Controls when buffered operations are flushed and how large a single
//! storage write may be:
//!
//! - **flush_threshold_bytes**: outstanding append bytes that force a flush
//!   (default: 4MB)
//! - **flush_threshold_ms**: maximum age of buffered data before a flush is
//!   forced even if small (default: 30 seconds)
//! - **max_flush_size_bytes**: upper bound on a single storage write, and
//!   therefore on a single append operation (default: 4MB)
//!
//! ## Usage
//!
//! ```ignore
//! use streamvault_writer::WriterConfig;
//!
//! // Aggressive flushing for latency-sensitive streams
//! let config = WriterConfig {
//!     flush_threshold_bytes: 64 * 1024,
//!     flush_threshold_ms: 1_000,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Outstanding append bytes that force a flush (default: 4MB)
    #[serde(default = "default_flush_threshold_bytes")]
    pub flush_threshold_bytes: i64,

    /// Maximum age of buffered data in milliseconds before a flush is forced
    /// (default: 30 seconds)
    #[serde(default = "default_flush_threshold_ms")]
    pub flush_threshold_ms: u64,

    /// Upper bound on a single storage write; also the upper bound on a
    /// single append operation (default: 4MB)
    #[serde(default = "default_max_flush_size_bytes")]
    pub max_flush_size_bytes: i64,
}

impl WriterConfig {
    /// The time threshold as a [`Duration`].
    pub fn flush_threshold_time(&self) -> Duration {
        Duration::from_millis(self.flush_threshold_ms)
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: default_flush_threshold_bytes(),
            flush_threshold_ms: default_flush_threshold_ms(),
            max_flush_size_bytes: default_max_flush_size_bytes(),
        }
    }
}

fn default_flush_threshold_bytes() -> i64 {
    4 * 1024 * 1024 // 4MB
}

fn default_flush_threshold_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_max_flush_size_bytes() -> i64 {
    4 * 1024 * 1024 // 4MB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = WriterConfig::default();
        assert_eq!(config.flush_threshold_bytes, 4 * 1024 * 1024);
        assert_eq!(config.flush_threshold_time(), Duration::from_secs(30));
        assert!(config.max_flush_size_bytes >= config.flush_threshold_bytes);
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let config: WriterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.flush_threshold_bytes, default_flush_threshold_bytes());
        assert_eq!(config.max_flush_size_bytes, default_max_flush_size_bytes());
    }
}
