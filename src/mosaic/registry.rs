//! Loaded catalogs and their writers.
//!
//! Readers get an `Arc` snapshot of a catalog and keep using it for as long
//! as they like. Writers for one destination are serialized by a per-
//! destination lock; a new snapshot replaces the old one only after it has
//! been persisted, so readers see either the old or the new catalog, never a
//! half-updated one.
//!
//! ```text
//!   get(name) ──► LRU<destination, Arc<MosaicCatalog>> ──miss──► store.load
//!
//!   append(name)
//!     lock(destination)
//!       current = get(name)            (snapshot)
//!       next    = clone(current) + new assets
//!       store.save(next)               failure: nothing swapped
//!       LRU[destination] = Arc(next)   swap
//! ```

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::asset::FootprintResolver;
use crate::error::CatalogError;
use crate::tile::TileMatrixSet;

use super::catalog::{CreateOptions, MosaicCatalog};
use super::resolver::PathResolver;
use super::store::CatalogStore;

/// Default number of catalogs kept loaded.
pub const DEFAULT_CATALOG_CACHE_CAPACITY: usize = 32;

/// Registry of mosaic catalogs addressed by name.
pub struct MosaicRegistry {
    store: Arc<dyn CatalogStore>,
    paths: Arc<dyn PathResolver>,
    tms: Arc<dyn TileMatrixSet>,
    snapshots: RwLock<LruCache<String, Arc<MosaicCatalog>>>,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MosaicRegistry {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        paths: Arc<dyn PathResolver>,
        tms: Arc<dyn TileMatrixSet>,
    ) -> Self {
        Self::with_capacity(store, paths, tms, DEFAULT_CATALOG_CACHE_CAPACITY)
    }

    pub fn with_capacity(
        store: Arc<dyn CatalogStore>,
        paths: Arc<dyn PathResolver>,
        tms: Arc<dyn TileMatrixSet>,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            paths,
            tms,
            snapshots: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub fn tms(&self) -> &Arc<dyn TileMatrixSet> {
        &self.tms
    }

    /// Location of the catalog named `name`.
    pub fn locate(&self, name: &str) -> Result<String, CatalogError> {
        self.paths.resolve(name)
    }

    /// Current snapshot of a catalog, loading it on first use.
    pub async fn get(&self, name: &str) -> Result<Arc<MosaicCatalog>, CatalogError> {
        let destination = self.locate(name)?;
        self.snapshot(&destination).await
    }

    async fn snapshot(&self, destination: &str) -> Result<Arc<MosaicCatalog>, CatalogError> {
        if let Some(catalog) = self.snapshots.write().await.get(destination) {
            return Ok(catalog.clone());
        }

        let catalog =
            MosaicCatalog::load(self.store.as_ref(), destination, self.tms.clone()).await?;
        let catalog = Arc::new(catalog);
        debug!(
            destination = destination,
            assets = catalog.len(),
            "Loaded mosaic catalog"
        );
        self.snapshots
            .write()
            .await
            .put(destination.to_string(), catalog.clone());
        Ok(catalog)
    }

    async fn writer(&self, destination: &str) -> Arc<Mutex<()>> {
        self.writers
            .lock()
            .await
            .entry(destination.to_string())
            .or_default()
            .clone()
    }

    /// Forget the writer lock of `destination` once nobody else holds it.
    async fn release_writer(&self, destination: &str, writer: Arc<Mutex<()>>) {
        let mut writers = self.writers.lock().await;
        // One reference lives in the map and one is ours
        if Arc::strong_count(&writer) == 2 {
            writers.remove(destination);
        }
    }

    async fn publish(&self, destination: &str, catalog: MosaicCatalog) -> Arc<MosaicCatalog> {
        let catalog = Arc::new(catalog);
        self.snapshots
            .write()
            .await
            .put(destination.to_string(), catalog.clone());
        catalog
    }

    /// Build a catalog from `assets` and persist it under `name`.
    ///
    /// Without `overwrite`, an existing catalog is reported as
    /// [`CatalogError::WriteConflict`] before any asset is resolved.
    pub async fn create(
        &self,
        name: &str,
        resolver: &FootprintResolver,
        assets: &[String],
        options: &CreateOptions,
        overwrite: bool,
    ) -> Result<Arc<MosaicCatalog>, CatalogError> {
        let destination = self.locate(name)?;
        let writer = self.writer(&destination).await;
        let result = {
            let _guard = writer.lock().await;
            self.create_locked(&destination, resolver, assets, options, overwrite)
                .await
        };
        self.release_writer(&destination, writer).await;
        result
    }

    async fn create_locked(
        &self,
        destination: &str,
        resolver: &FootprintResolver,
        assets: &[String],
        options: &CreateOptions,
        overwrite: bool,
    ) -> Result<Arc<MosaicCatalog>, CatalogError> {
        if !overwrite && self.store.exists(destination).await? {
            return Err(CatalogError::WriteConflict {
                destination: destination.to_string(),
            });
        }

        let catalog = MosaicCatalog::create(resolver, assets, options).await?;
        catalog
            .write(self.store.as_ref(), destination, overwrite)
            .await?;
        Ok(self.publish(destination, catalog).await)
    }

    /// Persist an already built catalog under `name`.
    pub async fn write(
        &self,
        name: &str,
        catalog: MosaicCatalog,
        overwrite: bool,
    ) -> Result<Arc<MosaicCatalog>, CatalogError> {
        let destination = self.locate(name)?;
        let writer = self.writer(&destination).await;
        let result = {
            let _guard = writer.lock().await;
            match catalog
                .write(self.store.as_ref(), &destination, overwrite)
                .await
            {
                Ok(()) => Ok(self.publish(&destination, catalog).await),
                Err(e) => Err(e),
            }
        };
        self.release_writer(&destination, writer).await;
        result
    }

    /// Add assets to the catalog named `name`.
    ///
    /// Returns the number of assets added and the snapshot now current.
    pub async fn append(
        &self,
        name: &str,
        resolver: &FootprintResolver,
        assets: &[String],
        add_first: bool,
        max_concurrency: usize,
    ) -> Result<(usize, Arc<MosaicCatalog>), CatalogError> {
        let destination = self.locate(name)?;
        let writer = self.writer(&destination).await;
        let result = {
            let _guard = writer.lock().await;
            self.append_locked(&destination, resolver, assets, add_first, max_concurrency)
                .await
        };
        self.release_writer(&destination, writer).await;
        result
    }

    async fn append_locked(
        &self,
        destination: &str,
        resolver: &FootprintResolver,
        assets: &[String],
        add_first: bool,
        max_concurrency: usize,
    ) -> Result<(usize, Arc<MosaicCatalog>), CatalogError> {
        let current = self.snapshot(destination).await?;
        let mut next = MosaicCatalog::clone(&current);
        let added = next
            .append(resolver, assets, add_first, max_concurrency)
            .await?;
        if added == 0 {
            return Ok((0, current));
        }

        next.write(self.store.as_ref(), destination, true).await?;
        info!(
            destination = %destination,
            added = added,
            assets = next.len(),
            "Updated mosaic catalog"
        );
        Ok((added, self.publish(destination, next).await))
    }

    /// Drop a cached snapshot so the next access reloads it from the store.
    pub async fn invalidate(&self, name: &str) -> Result<(), CatalogError> {
        let destination = self.locate(name)?;
        self.snapshots.write().await.pop(&destination);
        Ok(())
    }

    pub async fn cached_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}
