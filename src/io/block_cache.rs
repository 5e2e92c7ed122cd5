use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Default block size: 256KB.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default number of cached blocks per dataset.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 64;

/// Fixed-size block cache in front of any RangeReader.
///
/// GeoTIFF headers, IFDs and neighbouring tiles of a window read tend to land
/// in the same few blocks, so most parser reads are served from memory.
/// Concurrent misses on one block share a single fetch.
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    blocks: RwLock<LruCache<u64, Bytes>>,
    pending: Mutex<HashMap<u64, Arc<Notify>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl<R: RangeReader> BlockCache<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    /// Wrap `inner` with `capacity` blocks of `block_size` bytes.
    ///
    /// Zero values are raised to one.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            block_size: block_size.max(1),
            blocks: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            pending: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn stats(&self) -> BlockCacheStats {
        BlockCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn block(&self, index: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = self.blocks.read().await.peek(&index) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(data.clone());
            }

            let notify = {
                let mut pending = self.pending.lock().await;
                if let Some(waiting) = pending.get(&index) {
                    let waiting = waiting.clone();
                    // Register interest before releasing the map so the
                    // leader's notify_waiters cannot be missed.
                    let notified = waiting.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    drop(pending);
                    notified.await;
                    continue;
                }
                let notify = Arc::new(Notify::new());
                pending.insert(index, notify.clone());
                notify
            };

            self.misses.fetch_add(1, Ordering::Relaxed);
            let result = self.fetch(index).await;

            {
                let mut blocks = self.blocks.write().await;
                let mut pending = self.pending.lock().await;
                if let Ok(ref data) = result {
                    blocks.put(index, data.clone());
                }
                pending.remove(&index);
            }
            notify.notify_waiters();

            return result;
        }
    }

    async fn fetch(&self, index: u64) -> Result<Bytes, IoError> {
        let offset = index * self.block_size as u64;
        let size = self.inner.size();
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }
        let len = remaining.min(self.block_size as u64) as usize;
        self.inner.read_exact_at(offset, len).await
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.inner.size())?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let block_size = self.block_size as u64;
        let first = offset / block_size;
        let last = (offset + len as u64 - 1) / block_size;

        if first == last {
            let block = self.block(first).await?;
            let start = (offset % block_size) as usize;
            return Ok(block.slice(start..start + len));
        }

        let mut out = BytesMut::with_capacity(len);
        let mut cursor = offset;
        for index in first..=last {
            let block = self.block(index).await?;
            let start = (cursor % block_size) as usize;
            let take = (block.len() - start).min(len - out.len());
            out.extend_from_slice(&block[start..start + take]);
            cursor += take as u64;
        }
        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
