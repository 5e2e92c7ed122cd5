//! The mosaic catalog: ordered assets plus a quadkey index of their coverage.
//!
//! # Index layout
//!
//! Coverage is bucketed at a single reference zoom (`quadkey_zoom`):
//!
//! ```text
//!   tiles: "0313" -> [a.tif, b.tif]      precedence order
//!          "0320" -> [b.tif]
//! ```
//!
//! Lookups at deeper zooms use the ancestor quadkey; lookups at shallower
//! zooms scan the contiguous key range sharing the tile's quadkey prefix.
//! Candidates are then filtered against the exact footprints.
//!
//! The index is a cache: [`MosaicCatalog::rebuild_index`] derives it from the
//! asset sequence, and incremental appends must keep it equal to that.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::asset::{Asset, FootprintResolver};
use crate::error::{AssetError, CatalogError};
use crate::geo::{Bounds, Crs};
use crate::io::Location;
use crate::tile::{Tile, TileMatrixSet, MAX_QUADKEY_ZOOM};

use super::document::{self, MosaicDocument, ZoomOverride, MOSAICJSON_VERSION};
use super::store::CatalogStore;

/// Default cap on concurrent footprint resolutions.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Fraction of a tile span within which a point counts as on its edge.
const EDGE_TOLERANCE: f64 = 1e-9;

/// Parameters for building a catalog.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub name: Option<String>,
    pub description: Option<String>,

    /// Fixed minimum zoom; derived from the assets when `None`
    pub minzoom: Option<u8>,

    /// Fixed maximum zoom; derived from the assets when `None`
    pub maxzoom: Option<u8>,

    /// Reference zoom of the quadkey index; defaults to `minzoom`
    pub quadkey_zoom: Option<u8>,

    /// Maximum concurrent footprint resolutions (at least 1)
    pub max_concurrency: usize,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            minzoom: None,
            maxzoom: None,
            quadkey_zoom: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Catalog summary exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub minzoom: u8,
    pub maxzoom: u8,
    pub quadkey_zoom: u8,
    pub bounds: Bounds,
    pub center: [f64; 3],
    #[serde(rename = "assetCount")]
    pub asset_count: usize,
    #[serde(rename = "tileCount")]
    pub tile_count: usize,
    pub fingerprint: String,
}

/// Resolve footprints for a batch of paths with at most `max_concurrency`
/// resolutions in flight.
///
/// Every path is attempted; one failure does not cancel the others. Both
/// lists keep input order.
pub async fn resolve_batch(
    resolver: &FootprintResolver,
    paths: &[String],
    max_concurrency: usize,
) -> (Vec<Asset>, Vec<AssetError>) {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, path) in paths.iter().enumerate() {
        let semaphore = semaphore.clone();
        let resolver = resolver.clone();
        let path = path.clone();
        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => resolver.resolve(&path).await,
                Err(_) => Err(AssetError::unreadable(&path, "resolver pool closed")),
            };
            (index, result)
        });
    }

    let mut results: Vec<Option<Result<Asset, AssetError>>> = vec![None; paths.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => warn!(error = %e, "Footprint task failed"),
        }
    }

    let mut resolved = Vec::with_capacity(paths.len());
    let mut failed = Vec::new();
    for (path, result) in paths.iter().zip(results) {
        match result {
            Some(Ok(asset)) => resolved.push(asset),
            Some(Err(e)) => failed.push(e),
            None => failed.push(AssetError::unreadable(path, "footprint task aborted")),
        }
    }
    (resolved, failed)
}

/// Drop repeated paths, keeping the first occurrence.
fn dedup_paths<'a>(paths: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|p| seen.insert(p.as_str()))
        .cloned()
        .collect()
}

// =============================================================================
// MosaicCatalog
// =============================================================================

/// An ordered set of assets treated as one virtual raster.
///
/// Assets earlier in the sequence take precedence where footprints overlap.
#[derive(Clone)]
pub struct MosaicCatalog {
    name: Option<String>,
    description: Option<String>,
    minzoom: u8,
    maxzoom: u8,
    quadkey_zoom: u8,
    zoom_override: ZoomOverride,
    bounds: Bounds,
    assets: Vec<Asset>,
    tiles: BTreeMap<String, Vec<String>>,

    /// Path -> index in `assets`
    positions: HashMap<String, usize>,
    tms: Arc<dyn TileMatrixSet>,
}

impl fmt::Debug for MosaicCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MosaicCatalog")
            .field("name", &self.name)
            .field("minzoom", &self.minzoom)
            .field("maxzoom", &self.maxzoom)
            .field("quadkey_zoom", &self.quadkey_zoom)
            .field("assets", &self.assets.len())
            .field("tiles", &self.tiles.len())
            .field("tms", &self.tms.id())
            .finish()
    }
}

impl MosaicCatalog {
    /// Resolve `paths` and build a catalog in input order.
    ///
    /// Fails with [`CatalogError::PartialResolutionFailure`] if any asset
    /// cannot be resolved. The error carries the assets that did resolve so
    /// the caller can continue with [`MosaicCatalog::from_assets`].
    pub async fn create(
        resolver: &FootprintResolver,
        paths: &[String],
        options: &CreateOptions,
    ) -> Result<Self, CatalogError> {
        let paths = dedup_paths(paths);
        if paths.is_empty() {
            return Err(CatalogError::Empty);
        }

        let (resolved, failed) = resolve_batch(resolver, &paths, options.max_concurrency).await;
        if !failed.is_empty() {
            warn!(
                failed = failed.len(),
                resolved = resolved.len(),
                "Catalog creation failed for some assets"
            );
            return Err(CatalogError::PartialResolutionFailure { failed, resolved });
        }

        let catalog = Self::from_assets(resolved, resolver.tms().clone(), options)?;
        info!(
            assets = catalog.assets.len(),
            minzoom = catalog.minzoom,
            maxzoom = catalog.maxzoom,
            "Created mosaic catalog"
        );
        Ok(catalog)
    }

    /// Build a catalog from already resolved assets.
    pub fn from_assets(
        assets: Vec<Asset>,
        tms: Arc<dyn TileMatrixSet>,
        options: &CreateOptions,
    ) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        let assets: Vec<Asset> = assets
            .into_iter()
            .filter(|a| seen.insert(a.path.clone()))
            .collect();
        if assets.is_empty() {
            return Err(CatalogError::Empty);
        }
        check_tms(tms.as_ref())?;

        let zoom_override = ZoomOverride {
            minzoom: options.minzoom,
            maxzoom: options.maxzoom,
        };
        let mut catalog = Self {
            name: options.name.clone(),
            description: options.description.clone(),
            minzoom: 0,
            maxzoom: 0,
            quadkey_zoom: 0,
            zoom_override,
            bounds: assets[0].bounds,
            assets,
            tiles: BTreeMap::new(),
            positions: HashMap::new(),
            tms,
        };
        catalog.refresh_extent();
        if catalog.minzoom > catalog.maxzoom {
            return Err(CatalogError::InvalidZoom(format!(
                "minzoom {} is greater than maxzoom {}",
                catalog.minzoom, catalog.maxzoom
            )));
        }

        let quadkey_zoom = options.quadkey_zoom.unwrap_or(catalog.minzoom);
        if quadkey_zoom > MAX_QUADKEY_ZOOM || quadkey_zoom > catalog.tms.max_zoom() {
            return Err(CatalogError::InvalidZoom(format!(
                "quadkey zoom {} is beyond the tile matrix set",
                quadkey_zoom
            )));
        }
        catalog.quadkey_zoom = quadkey_zoom;
        catalog.refresh_positions();
        catalog.tiles = catalog.rebuild_index();
        Ok(catalog)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn minzoom(&self) -> u8 {
        self.minzoom
    }

    pub fn maxzoom(&self) -> u8 {
        self.maxzoom
    }

    pub fn quadkey_zoom(&self) -> u8 {
        self.quadkey_zoom
    }

    /// Union of all footprints (lon/lat).
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Assets in precedence order.
    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn asset(&self, path: &str) -> Option<&Asset> {
        self.positions.get(path).map(|&i| &self.assets[i])
    }

    pub fn tiles(&self) -> &BTreeMap<String, Vec<String>> {
        &self.tiles
    }

    pub fn tms(&self) -> &Arc<dyn TileMatrixSet> {
        &self.tms
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Resolve new assets and add them to the catalog.
    ///
    /// Paths already in the catalog are skipped. The batch is all-or-nothing:
    /// if any new asset fails to resolve the catalog is left untouched.
    /// Returns the number of assets added.
    pub async fn append(
        &mut self,
        resolver: &FootprintResolver,
        paths: &[String],
        add_first: bool,
        max_concurrency: usize,
    ) -> Result<usize, CatalogError> {
        let paths: Vec<String> = dedup_paths(paths)
            .into_iter()
            .filter(|p| !self.positions.contains_key(p))
            .collect();
        if paths.is_empty() {
            return Ok(0);
        }

        let (resolved, failed) = resolve_batch(resolver, &paths, max_concurrency).await;
        if !failed.is_empty() {
            return Err(CatalogError::PartialResolutionFailure { failed, resolved });
        }
        Ok(self.extend(resolved, add_first))
    }

    /// Add resolved assets at the front (`add_first`) or back of the sequence.
    ///
    /// Only quadkeys touched by the new footprints are modified.
    pub fn extend(&mut self, assets: Vec<Asset>, add_first: bool) -> usize {
        let mut seen = HashSet::new();
        let new: Vec<Asset> = assets
            .into_iter()
            .filter(|a| !self.positions.contains_key(&a.path) && seen.insert(a.path.clone()))
            .collect();
        if new.is_empty() {
            return 0;
        }

        let mut coverage: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for asset in &new {
            for key in self.quadkeys_for(asset) {
                coverage.entry(key).or_default().push(asset.path.clone());
            }
        }

        for (key, paths) in coverage {
            let entry = self.tiles.entry(key).or_default();
            if add_first {
                entry.splice(0..0, paths);
            } else {
                entry.extend(paths);
            }
        }

        let count = new.len();
        if add_first {
            self.assets.splice(0..0, new);
        } else {
            self.assets.extend(new);
        }
        self.refresh_positions();
        self.refresh_extent();

        debug!(added = count, add_first = add_first, "Extended mosaic catalog");
        count
    }

    /// Recompute the quadkey index from the asset sequence.
    pub fn rebuild_index(&self) -> BTreeMap<String, Vec<String>> {
        let mut tiles: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for asset in &self.assets {
            for key in self.quadkeys_for(asset) {
                tiles.entry(key).or_default().push(asset.path.clone());
            }
        }
        tiles
    }

    fn quadkeys_for(&self, asset: &Asset) -> Vec<String> {
        let bounds = self.to_matrix(&asset.bounds);
        self.tms
            .tiles_for_bounds(&bounds, self.quadkey_zoom)
            .iter()
            .map(Tile::quadkey)
            .collect()
    }

    /// Lon/lat bounds in the matrix CRS. The conversion is checked when the
    /// catalog is built.
    fn to_matrix(&self, bounds: &Bounds) -> Bounds {
        Crs::WGS84
            .transform_bounds(self.tms.crs(), bounds)
            .unwrap_or(*bounds)
    }

    fn tile_lonlat_bounds(&self, tile: &Tile) -> Bounds {
        let bounds = self.tms.tile_bounds(tile);
        self.tms
            .crs()
            .transform_bounds(Crs::WGS84, &bounds)
            .unwrap_or(bounds)
    }

    fn refresh_positions(&mut self) {
        self.positions = self
            .assets
            .iter()
            .enumerate()
            .map(|(i, a)| (a.path.clone(), i))
            .collect();
    }

    fn refresh_extent(&mut self) {
        self.minzoom = self
            .zoom_override
            .minzoom
            .unwrap_or_else(|| self.assets.iter().map(|a| a.minzoom).min().unwrap_or(0));
        self.maxzoom = self
            .zoom_override
            .maxzoom
            .unwrap_or_else(|| self.assets.iter().map(|a| a.maxzoom).max().unwrap_or(0));
        if let Some(bounds) = self.assets.iter().map(|a| a.bounds).reduce(|a, b| a.union(&b)) {
            self.bounds = bounds;
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Positions of assets listed under index keys.
    fn positions_of<'a>(&self, lists: impl Iterator<Item = &'a Vec<String>>) -> BTreeSet<usize> {
        lists
            .flatten()
            .filter_map(|path| self.positions.get(path).copied())
            .collect()
    }

    fn candidates_for_tile(&self, tile: &Tile) -> BTreeSet<usize> {
        match tile.parent_at(self.quadkey_zoom) {
            Some(parent) => self.positions_of(self.tiles.get(&parent.quadkey()).into_iter()),
            None => {
                let prefix = tile.quadkey();
                self.positions_of(
                    self.tiles
                        .range(prefix.clone()..)
                        .take_while(|(key, _)| key.starts_with(&prefix))
                        .map(|(_, paths)| paths),
                )
            }
        }
    }

    /// Assets whose footprint overlaps `tile`, in precedence order.
    pub fn assets_for_tile(&self, tile: &Tile) -> Vec<&Asset> {
        let tile_bounds = self.tile_lonlat_bounds(tile);
        self.candidates_for_tile(tile)
            .into_iter()
            .map(|i| &self.assets[i])
            .filter(|a| a.bounds.intersects(&tile_bounds))
            .collect()
    }

    /// Assets whose footprint overlaps a lon/lat box, in precedence order.
    pub fn assets_for_bbox(&self, bounds: &Bounds) -> Vec<&Asset> {
        let matrix = self.to_matrix(bounds);
        let zoom = self.quadkey_zoom;
        let top_left = self.tms.tile_for_point(matrix.min_x, matrix.max_y, zoom);
        let bottom_right = self.tms.tile_for_point(matrix.max_x, matrix.min_y, zoom);
        let span = (bottom_right.x.saturating_sub(top_left.x) as usize + 1)
            * (bottom_right.y.saturating_sub(top_left.y) as usize + 1);

        let candidates = if span > self.tiles.len() {
            // Cheaper to walk the index than the tile range
            self.positions_of(
                self.tiles
                    .iter()
                    .filter(|(key, _)| {
                        Tile::from_quadkey(key)
                            .map(|t| self.tms.tile_bounds(&t).intersects(&matrix))
                            .unwrap_or(false)
                    })
                    .map(|(_, paths)| paths),
            )
        } else {
            let keys: Vec<String> = self
                .tms
                .tiles_for_bounds(&matrix, zoom)
                .iter()
                .map(Tile::quadkey)
                .collect();
            self.positions_of(keys.iter().filter_map(|k| self.tiles.get(k)))
        };

        candidates
            .into_iter()
            .map(|i| &self.assets[i])
            .filter(|a| a.bounds.intersects(bounds))
            .collect()
    }

    /// Assets whose footprint contains a lon/lat point, in precedence order.
    ///
    /// A point on a tile edge is looked up in every tile sharing that edge,
    /// since footprints ending on the edge are only indexed on one side.
    pub fn assets_for_point(&self, lon: f64, lat: f64) -> Vec<&Asset> {
        let (x, y) = Crs::WGS84
            .transform_point(self.tms.crs(), lon, lat)
            .unwrap_or((lon, lat));
        let keys: Vec<String> = self
            .tiles_touching_point(x, y)
            .iter()
            .map(Tile::quadkey)
            .collect();
        self.positions_of(keys.iter().filter_map(|k| self.tiles.get(k)))
            .into_iter()
            .map(|i| &self.assets[i])
            .filter(|a| a.bounds.contains_point(lon, lat))
            .collect()
    }

    /// Index tiles whose closed extent contains `(x, y)` in the matrix CRS.
    fn tiles_touching_point(&self, x: f64, y: f64) -> Vec<Tile> {
        let tile = self.tms.tile_for_point(x, y, self.quadkey_zoom);
        let span = self.tms.resolution_for_zoom(self.quadkey_zoom) * self.tms.tile_size() as f64;
        let tolerance = span * EDGE_TOLERANCE;

        let mut tiles = vec![tile];
        for (dx, dy) in [(-1i64, 0i64), (0, -1), (-1, -1)] {
            let (nx, ny) = (tile.x as i64 + dx, tile.y as i64 + dy);
            if nx < 0 || ny < 0 {
                continue;
            }
            let neighbour = Tile {
                x: nx as u32,
                y: ny as u32,
                z: self.quadkey_zoom,
            };
            let b = self.tms.tile_bounds(&neighbour);
            let touches = x >= b.min_x - tolerance
                && x <= b.max_x + tolerance
                && y >= b.min_y - tolerance
                && y <= b.max_y + tolerance;
            if touches {
                tiles.push(neighbour);
            }
        }
        tiles
    }

    // -------------------------------------------------------------------------
    // Summary and persistence
    // -------------------------------------------------------------------------

    /// Hex SHA-256 of the ordered asset paths and zoom parameters.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(MOSAICJSON_VERSION.as_bytes());
        hasher.update([self.minzoom, self.maxzoom, self.quadkey_zoom]);
        for asset in &self.assets {
            hasher.update(asset.path.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    pub fn summary(&self) -> CatalogSummary {
        let (x, y) = self.bounds.center();
        CatalogSummary {
            name: self.name.clone(),
            minzoom: self.minzoom,
            maxzoom: self.maxzoom,
            quadkey_zoom: self.quadkey_zoom,
            bounds: self.bounds,
            center: [x, y, self.minzoom as f64],
            asset_count: self.assets.len(),
            tile_count: self.tiles.len(),
            fingerprint: self.fingerprint(),
        }
    }

    pub fn to_document(&self) -> MosaicDocument {
        let (x, y) = self.bounds.center();
        MosaicDocument {
            mosaicjson: MOSAICJSON_VERSION.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            version: "1.0.0".to_string(),
            minzoom: self.minzoom,
            maxzoom: self.maxzoom,
            quadkey_zoom: Some(self.quadkey_zoom),
            bounds: self.bounds,
            center: Some([x, y, self.minzoom as f64]),
            tilematrixset: Some(self.tms.id().to_string()),
            tiles: self.tiles.clone(),
            assets: self.assets.clone(),
            zoom_override: self.zoom_override,
        }
    }

    /// Rebuild a catalog from its document.
    ///
    /// Documents without the `assets` extension get assets derived from the
    /// index: each path in order of first appearance, with the union of its
    /// tiles as footprint and the document zoom range.
    pub fn from_document(
        document: MosaicDocument,
        tms: Arc<dyn TileMatrixSet>,
    ) -> Result<Self, CatalogError> {
        if let Some(id) = &document.tilematrixset {
            if id != tms.id() {
                return Err(CatalogError::Document(format!(
                    "catalog uses tile matrix set {}, expected {}",
                    id,
                    tms.id()
                )));
            }
        }
        check_tms(tms.as_ref())?;
        let quadkey_zoom = document.quadkey_zoom.unwrap_or(document.minzoom);

        let assets = if document.assets.is_empty() {
            derive_assets(&document, quadkey_zoom, tms.as_ref())?
        } else {
            document.assets
        };
        if assets.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut catalog = Self {
            name: document.name,
            description: document.description,
            minzoom: document.minzoom,
            maxzoom: document.maxzoom,
            quadkey_zoom,
            zoom_override: document.zoom_override,
            bounds: document.bounds,
            assets,
            tiles: document.tiles,
            positions: HashMap::new(),
            tms,
        };
        catalog.refresh_positions();
        if catalog.positions.len() != catalog.assets.len() {
            return Err(CatalogError::Document("duplicate asset paths".to_string()));
        }
        if let Some(path) = catalog
            .tiles
            .values()
            .flatten()
            .find(|p| !catalog.positions.contains_key(*p))
        {
            return Err(CatalogError::Document(format!(
                "index references unknown asset {}",
                path
            )));
        }
        Ok(catalog)
    }

    /// Persist the catalog. `.gz` destinations are gzip-compressed.
    pub async fn write(
        &self,
        store: &dyn CatalogStore,
        destination: &str,
        overwrite: bool,
    ) -> Result<(), CatalogError> {
        let gzip = Location::parse(destination)?.is_gzip();
        let bytes = document::encode(&self.to_document(), gzip)?;
        store.save(destination, bytes, overwrite).await?;
        info!(
            destination = destination,
            assets = self.assets.len(),
            "Wrote mosaic catalog"
        );
        Ok(())
    }

    pub async fn load(
        store: &dyn CatalogStore,
        source: &str,
        tms: Arc<dyn TileMatrixSet>,
    ) -> Result<Self, CatalogError> {
        let bytes = store.load(source).await?;
        Self::from_document(document::decode(&bytes)?, tms)
    }
}

fn check_tms(tms: &dyn TileMatrixSet) -> Result<(), CatalogError> {
    Crs::WGS84
        .transform_point(tms.crs(), 0.0, 0.0)
        .map(|_| ())
        .map_err(|e| CatalogError::Document(format!("tile matrix set {}: {}", tms.id(), e)))
}

fn derive_assets(
    document: &MosaicDocument,
    quadkey_zoom: u8,
    tms: &dyn TileMatrixSet,
) -> Result<Vec<Asset>, CatalogError> {
    let mut order: Vec<String> = Vec::new();
    let mut footprints: HashMap<String, Bounds> = HashMap::new();

    for (key, paths) in &document.tiles {
        let tile = Tile::from_quadkey(key).map_err(|e| CatalogError::Document(e.to_string()))?;
        if tile.z != quadkey_zoom {
            return Err(CatalogError::Document(format!(
                "quadkey {} does not match quadkey zoom {}",
                key, quadkey_zoom
            )));
        }
        let tile_bounds = tms
            .crs()
            .transform_bounds(Crs::WGS84, &tms.tile_bounds(&tile))
            .map_err(|e| CatalogError::Document(e.to_string()))?;
        for path in paths {
            match footprints.get_mut(path) {
                Some(bounds) => *bounds = bounds.union(&tile_bounds),
                None => {
                    order.push(path.clone());
                    footprints.insert(path.clone(), tile_bounds);
                }
            }
        }
    }

    Ok(order
        .into_iter()
        .map(|path| Asset {
            bounds: footprints[&path],
            path,
            crs: Crs::WGS84,
            minzoom: document.minzoom,
            maxzoom: document.maxzoom,
            band_count: 0,
            bands: Vec::new(),
        })
        .collect())
}
