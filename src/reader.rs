use std::num::NonZeroUsize;

use lru::LruCache;

use crate::{
    record,
    types::{Entry, WalError, WalReader},
    wal::SegmentedWal,
};

/// Bounded cache of sealed segment bytes, keyed by segment index. The tail
/// never lands here: it is always served from its memory map.
pub(crate) struct SegmentCache {
    inner: LruCache<i64, Vec<u8>>,
}

impl SegmentCache {
    /// `cap` is the number of segments kept; a zero capacity is clamped to
    /// one because `LruCache` rejects empty capacities.
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            inner: LruCache::new(NonZeroUsize::new(cap).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub(crate) fn get(&mut self, index: i64) -> Option<Vec<u8>> {
        self.inner.get(&index).cloned()
    }

    pub(crate) fn put(&mut self, index: i64, bytes: Vec<u8>) {
        self.inner.put(index, bytes);
    }

    pub(crate) fn evict(&mut self, index: i64) {
        self.inner.pop(&index);
    }
}

#[async_trait::async_trait]
impl WalReader for SegmentedWal {
    async fn read(&self, index: i64) -> Result<Vec<u8>, WalError> {
        let mut inner = self.inner.lock().await;

        // The tail answers for its own index and anything beyond it.
        if index >= inner.last_index {
            let tail = inner.tail.as_ref().ok_or(WalError::SegmentNotFound(index))?;
            return Ok(tail.get().to_vec());
        }

        if let Some(bytes) = inner.cache.get(index) {
            return Ok(bytes);
        }

        let pos = inner
            .segments
            .binary_search_by_key(&index, |s| s.index())
            .map_err(|_| WalError::SegmentNotFound(index))?;
        let bytes = inner.segments[pos].read_all().await?;
        inner.cache.put(index, bytes.clone());
        Ok(bytes)
    }

    async fn read_converted(&self, index: i64) -> Result<Vec<Entry>, WalError> {
        let bytes = self.read(index).await?;
        record::decode(&bytes)
    }
}
