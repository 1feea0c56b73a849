//! In-Memory Implementations
//!
//! In-process implementations of [`SegmentStorage`] and [`WriterDataSource`]
//! for tests and development. They enforce the same contracts a production
//! backend would - append-only at tail, sealed segments reject writes,
//! concat removes its source - so the write path can be exercised end-to-end
//! without a storage cluster.
//!
//! ## Usage
//!
//! ```ignore
//! use streamvault_writer::memory::{InMemoryDataSource, InMemorySegmentStorage};
//!
//! let storage = Arc::new(InMemorySegmentStorage::new());
//! storage.create("container0/segment1");
//!
//! let data_source = Arc::new(InMemoryDataSource::new(0));
//! data_source.register_segment(metadata.clone());
//! ```
//!
//! Both types additionally record what happened to them (write sizes,
//! deleted segments, completed merges) so tests can assert on the exact
//! sequence of storage effects, not just the final state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use streamvault_core::{CacheKey, SegmentMetadata, SegmentProperties};

use crate::data_source::WriterDataSource;
use crate::storage::{SegmentStorage, StorageError, StorageResult};

#[derive(Debug, Default)]
struct MemSegment {
    data: Vec<u8>,
    sealed: bool,
}

/// In-memory [`SegmentStorage`].
///
/// Timeouts are ignored: every operation is a synchronous map access.
#[derive(Debug, Default)]
pub struct InMemorySegmentStorage {
    segments: Mutex<HashMap<String, MemSegment>>,
    write_sizes: Mutex<Vec<i64>>,
}

impl InMemorySegmentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty segment. Idempotent.
    pub fn create(&self, name: &str) {
        self.segments
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.segments.lock().unwrap().contains_key(name)
    }

    /// Full contents of a segment, if it exists.
    pub fn segment_data(&self, name: &str) -> Option<Bytes> {
        self.segments
            .lock()
            .unwrap()
            .get(name)
            .map(|s| Bytes::copy_from_slice(&s.data))
    }

    /// Sizes of every `write` accepted so far, in order.
    pub fn write_sizes(&self) -> Vec<i64> {
        self.write_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SegmentStorage for InMemorySegmentStorage {
    async fn get_info(&self, name: &str, _timeout: Duration) -> StorageResult<SegmentProperties> {
        let segments = self.segments.lock().unwrap();
        let segment = segments
            .get(name)
            .ok_or_else(|| StorageError::SegmentNotFound(name.to_string()))?;
        Ok(SegmentProperties::new(
            name,
            segment.data.len() as i64,
            segment.sealed,
        ))
    }

    async fn write(
        &self,
        name: &str,
        offset: i64,
        data: Bytes,
        _timeout: Duration,
    ) -> StorageResult<()> {
        let mut segments = self.segments.lock().unwrap();
        let segment = segments
            .get_mut(name)
            .ok_or_else(|| StorageError::SegmentNotFound(name.to_string()))?;
        if segment.sealed {
            return Err(StorageError::SegmentSealed(name.to_string()));
        }
        let tail = segment.data.len() as i64;
        if offset != tail {
            return Err(StorageError::BadOffset {
                name: name.to_string(),
                expected: tail,
                actual: offset,
            });
        }
        segment.data.extend_from_slice(&data);
        self.write_sizes.lock().unwrap().push(data.len() as i64);
        Ok(())
    }

    async fn concat(&self, target: &str, source: &str, _timeout: Duration) -> StorageResult<()> {
        let mut segments = self.segments.lock().unwrap();
        match segments.get(target) {
            None => return Err(StorageError::SegmentNotFound(target.to_string())),
            Some(t) if t.sealed => return Err(StorageError::SegmentSealed(target.to_string())),
            Some(_) => {}
        }
        let source_segment = match segments.remove(source) {
            None => return Err(StorageError::SegmentNotFound(source.to_string())),
            Some(s) if !s.sealed => {
                segments.insert(source.to_string(), s);
                return Err(StorageError::NotSealed(source.to_string()));
            }
            Some(s) => s,
        };
        if let Some(target_segment) = segments.get_mut(target) {
            target_segment.data.extend_from_slice(&source_segment.data);
        }
        Ok(())
    }

    async fn seal(&self, name: &str, _timeout: Duration) -> StorageResult<()> {
        let mut segments = self.segments.lock().unwrap();
        let segment = segments
            .get_mut(name)
            .ok_or_else(|| StorageError::SegmentNotFound(name.to_string()))?;
        segment.sealed = true;
        Ok(())
    }
}

/// In-memory [`WriterDataSource`].
///
/// Holds the append cache and segment registry as plain maps and records
/// merge notifications for test assertions.
#[derive(Debug)]
pub struct InMemoryDataSource {
    container_id: u32,
    cache: Mutex<HashMap<CacheKey, Bytes>>,
    segments: Mutex<HashMap<u64, Arc<SegmentMetadata>>>,
    deleted_segments: Mutex<Vec<String>>,
    completed_merges: Mutex<Vec<(u64, u64)>>,
}

impl InMemoryDataSource {
    pub fn new(container_id: u32) -> Self {
        Self {
            container_id,
            cache: Mutex::new(HashMap::new()),
            segments: Mutex::new(HashMap::new()),
            deleted_segments: Mutex::new(Vec::new()),
            completed_merges: Mutex::new(Vec::new()),
        }
    }

    /// Stage a cached append payload, as the durable log would.
    pub fn put_append_data(&self, key: CacheKey, data: Bytes) {
        self.cache.lock().unwrap().insert(key, data);
    }

    /// Drop a cached payload. Used to simulate a cache miss.
    pub fn evict_append_data(&self, key: &CacheKey) {
        self.cache.lock().unwrap().remove(key);
    }

    /// Make a segment's metadata resolvable through the data source.
    pub fn register_segment(&self, metadata: Arc<SegmentMetadata>) {
        self.segments.lock().unwrap().insert(metadata.id(), metadata);
    }

    /// Names passed to `delete_segment`, in order.
    pub fn deleted_segments(&self) -> Vec<String> {
        self.deleted_segments.lock().unwrap().clone()
    }

    /// `(parent_id, source_id)` pairs passed to `complete_merge`, in order.
    pub fn completed_merges(&self) -> Vec<(u64, u64)> {
        self.completed_merges.lock().unwrap().clone()
    }
}

impl WriterDataSource for InMemoryDataSource {
    fn container_id(&self) -> u32 {
        self.container_id
    }

    fn append_data(&self, key: &CacheKey) -> Option<Bytes> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn segment_metadata(&self, segment_id: u64) -> Option<Arc<SegmentMetadata>> {
        self.segments.lock().unwrap().get(&segment_id).cloned()
    }

    fn delete_segment(&self, name: &str) {
        self.deleted_segments.lock().unwrap().push(name.to_string());
    }

    fn complete_merge(&self, parent_id: u64, source_id: u64) {
        self.completed_merges
            .lock()
            .unwrap()
            .push((parent_id, source_id));
    }
}
