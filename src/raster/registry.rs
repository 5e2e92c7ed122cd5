//! Dataset registry backing the built-in [`RasterReader`].
//!
//! The registry provides:
//! - LRU caching of opened datasets to avoid re-parsing IFDs
//! - Singleflight opens, so concurrent requests for one asset parse it once
//! - A block cache per dataset for the scattered range reads of window reads

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::debug;

use crate::error::{AssetError, TiffError};
use crate::format::GeoTiffDataset;
use crate::io::{BlockCache, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};

use super::{AssetSource, DatasetInfo, RasterReader, RasterWindow, WindowRequest};

/// Default number of open datasets kept in memory.
pub const DEFAULT_DATASET_CACHE_CAPACITY: usize = 256;

/// A dataset that has been opened and cached.
pub struct OpenDataset<R: crate::io::RangeReader + 'static> {
    reader: BlockCache<R>,
    dataset: GeoTiffDataset,
}

impl<R: crate::io::RangeReader + 'static> OpenDataset<R> {
    pub fn info(&self) -> &DatasetInfo {
        self.dataset.info()
    }

    pub async fn read_window(&self, request: &WindowRequest) -> Result<RasterWindow, TiffError> {
        self.dataset.read_window(&self.reader, request).await
    }
}

type OpenResult<R> = Result<Arc<OpenDataset<R>>, AssetError>;

/// State for an in-flight open.
struct InFlightState<R: crate::io::RangeReader + 'static> {
    notify: Notify,
    result: Mutex<Option<OpenResult<R>>>,
}

/// [`RasterReader`] over GeoTIFF/COG assets.
pub struct CogRasterReader<S: AssetSource> {
    source: S,
    cache: RwLock<LruCache<String, Arc<OpenDataset<S::Reader>>>>,
    in_flight: Mutex<HashMap<String, Arc<InFlightState<S::Reader>>>>,
    block_size: usize,
    block_cache_capacity: usize,
}

impl<S: AssetSource> CogRasterReader<S> {
    pub fn new(source: S) -> Self {
        Self::with_capacity(
            source,
            DEFAULT_DATASET_CACHE_CAPACITY,
            DEFAULT_BLOCK_SIZE,
            DEFAULT_BLOCK_CACHE_CAPACITY,
        )
    }

    /// # Arguments
    /// * `dataset_capacity` - Maximum number of open datasets to cache
    /// * `block_size` - Block size for each dataset's block cache (bytes)
    /// * `block_cache_capacity` - Number of blocks cached per dataset
    pub fn with_capacity(
        source: S,
        dataset_capacity: usize,
        block_size: usize,
        block_cache_capacity: usize,
    ) -> Self {
        Self {
            source,
            cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(dataset_capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            in_flight: Mutex::new(HashMap::new()),
            block_size,
            block_cache_capacity,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a dataset, opening it if not already cached.
    pub async fn dataset(&self, path: &str) -> OpenResult<S::Reader> {
        if let Some(dataset) = self.cache.write().await.get(path) {
            return Ok(dataset.clone());
        }

        loop {
            let state = {
                let mut in_flight = self.in_flight.lock().await;
                match in_flight.get(path) {
                    Some(state) => state.clone(),
                    None => {
                        let state = Arc::new(InFlightState {
                            notify: Notify::new(),
                            result: Mutex::new(None),
                        });
                        in_flight.insert(path.to_string(), state.clone());
                        drop(in_flight);
                        return self.lead_open(path, state).await;
                    }
                }
            };

            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = state.result.lock().await.as_ref() {
                return result.clone();
            }
            notified.await;

            if let Some(result) = state.result.lock().await.as_ref() {
                return result.clone();
            };
        }
    }

    async fn lead_open(
        &self,
        path: &str,
        state: Arc<InFlightState<S::Reader>>,
    ) -> OpenResult<S::Reader> {
        let result = self.open(path).await;

        *state.result.lock().await = Some(result.clone());
        if let Ok(ref dataset) = result {
            self.cache
                .write()
                .await
                .put(path.to_string(), dataset.clone());
        }
        self.in_flight.lock().await.remove(path);
        state.notify.notify_waiters();

        result
    }

    async fn open(&self, path: &str) -> OpenResult<S::Reader> {
        let reader = self
            .source
            .create_reader(path)
            .await
            .map_err(|e| AssetError::from_tiff(path, TiffError::Io(e)))?;
        let reader = BlockCache::with_capacity(reader, self.block_size, self.block_cache_capacity);

        let dataset = GeoTiffDataset::open(&reader)
            .await
            .map_err(|e| AssetError::from_tiff(path, e))?;
        debug!(path = path, "Cached dataset");

        Ok(Arc::new(OpenDataset { reader, dataset }))
    }

    /// Drop a dataset from the cache, forcing the next access to reopen it.
    pub async fn invalidate(&self, path: &str) {
        self.cache.write().await.pop(path);
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[async_trait]
impl<S: AssetSource> RasterReader for CogRasterReader<S> {
    async fn info(&self, path: &str) -> Result<DatasetInfo, AssetError> {
        Ok(self.dataset(path).await?.info().clone())
    }

    async fn read_window(
        &self,
        path: &str,
        request: &WindowRequest,
    ) -> Result<RasterWindow, AssetError> {
        self.dataset(path)
            .await?
            .read_window(request)
            .await
            .map_err(|e| AssetError::from_tiff(path, e))
    }
}

// =============================================================================
// Tests
// =============================================================================
