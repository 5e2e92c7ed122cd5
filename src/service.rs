//! Request orchestration.
//!
//! [`StatisticsService`] answers one external query at a time by composing
//! the region selector, the mosaic registry, the raster reader and the
//! statistics engine. It holds no per-request state, so any number of
//! requests can run on one instance concurrently.
//!
//! # Mosaic fan-out
//!
//! ```text
//!   catalog.assets_for_bbox(region)        precedence order
//!            │
//!            ▼
//!   ┌─────────────────────────────┐   Semaphore(max_concurrency)
//!   │ JoinSet: one task per asset │── each task races the request token
//!   └──────────────┬──────────────┘
//!                  │ join_next() under timeout_at(deadline)
//!                  ▼
//!   completed ──► results        failed / unfinished ──► skipped
//! ```
//!
//! One deadline covers the whole fan-out. When it passes, the remaining
//! tasks are aborted and those assets are reported as skipped with reason
//! `timeout`. Cancelling the caller's token
//! aborts the request with [`ServiceError::Cancelled`]. Each request works
//! on a child token, so neither affects other requests.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asset::{Asset, FootprintResolver};
use crate::error::{ExpressionError, RegionError, ServiceError};
use crate::geo::{Bounds, Crs};
use crate::mosaic::{CreateOptions, MosaicCatalog, MosaicRegistry, DEFAULT_MAX_CONCURRENCY};
use crate::raster::{DatasetInfo, RasterReader, RasterWindow};
use crate::region::{
    GridPlacement, OutputSize, RegionSelector, RegionSpec, DEFAULT_MAX_OUTPUT_SIZE, DEFAULT_MAX_SIZE,
};
use crate::stats::{summarize, Expression, StatisticsMap, StatisticsOptions, MAX_HISTOGRAM_BINS};

/// Default number of concurrent asset reads per request.
pub const DEFAULT_READ_CONCURRENCY: usize = 8;

/// Default deadline of a statistics request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const TIMEOUT_REASON: &str = "timeout";

// =============================================================================
// Configuration and request types
// =============================================================================

/// Service-wide limits.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Concurrent asset reads per request
    pub max_concurrency: usize,

    /// Deadline for one statistics request
    pub request_timeout: Duration,

    /// Longest output side when a request does not specify a size
    pub default_max_size: usize,

    /// Largest output side any request may ask for
    pub max_output_size: usize,

    /// Concurrent footprint resolutions when building or updating catalogs
    pub footprint_concurrency: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_READ_CONCURRENCY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_max_size: DEFAULT_MAX_SIZE,
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            footprint_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Parameters of a statistics query.
#[derive(Debug, Clone, Default)]
pub struct StatisticsRequest {
    pub region: RegionSpec,

    /// Output grid size; the service default when `None`
    pub size: Option<OutputSize>,

    /// 1-based bands to analyse; all bands when `None`. Ignored when
    /// expressions are given.
    pub bands: Option<Vec<usize>>,

    pub expressions: Vec<Expression>,

    pub options: StatisticsOptions,
}

impl From<RegionSpec> for StatisticsRequest {
    fn from(region: RegionSpec) -> Self {
        Self {
            region,
            ..Default::default()
        }
    }
}

/// How mosaic statistics are composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// One result per contributing asset
    #[default]
    PerAsset,
    /// One result over the union, higher precedence assets shadowing lower
    Merged,
}

/// Metadata of a single asset.
#[derive(Debug, Clone, Serialize)]
pub struct AssetInfo {
    #[serde(flatten)]
    pub asset: Asset,
    /// Extent in the asset CRS
    pub native_bounds: Bounds,
    pub width: u32,
    pub height: u32,
    pub overviews: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetStatistics {
    pub asset: String,
    pub statistics: StatisticsMap,
}

/// An asset left out of a result, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedAsset {
    pub asset: String,
    pub reason: String,
}

/// Result of a mosaic statistics query.
#[derive(Debug, Clone, Serialize)]
pub struct MosaicStatistics {
    pub mode: MergeMode,

    /// Per-asset results in precedence order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<AssetStatistics>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged: Option<StatisticsMap>,

    /// Assets that supplied at least one pixel to the merged result
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contributing: Vec<String>,

    pub skipped: Vec<SkippedAsset>,
}

impl MosaicStatistics {
    fn has_results(&self) -> bool {
        !self.assets.is_empty() || self.merged.is_some()
    }
}

// =============================================================================
// Service
// =============================================================================

/// Answers asset and mosaic statistics queries.
pub struct StatisticsService {
    reader: Arc<dyn RasterReader>,
    mosaics: Arc<MosaicRegistry>,
    config: ServiceConfig,
}

impl StatisticsService {
    pub fn new(
        reader: Arc<dyn RasterReader>,
        mosaics: Arc<MosaicRegistry>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            reader,
            mosaics,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn reader(&self) -> &Arc<dyn RasterReader> {
        &self.reader
    }

    pub fn mosaics(&self) -> &Arc<MosaicRegistry> {
        &self.mosaics
    }

    pub fn footprints(&self) -> FootprintResolver {
        FootprintResolver::new(self.reader.clone(), self.mosaics.tms().clone())
    }

    fn selector(&self, request: &StatisticsRequest) -> RegionSelector {
        RegionSelector::new(
            request
                .size
                .unwrap_or(OutputSize::MaxSize(
                    self.config.default_max_size.min(self.config.max_output_size),
                )),
        )
        .with_max_side(self.config.max_output_size)
    }

    /// Reject requests whose output would exceed the configured limits,
    /// before anything is read or allocated.
    fn check_limits(&self, request: &StatisticsRequest) -> Result<(), ServiceError> {
        if let Some(size) = &request.size {
            size.validate(self.config.max_output_size)?;
        }
        let bins = request.options.histogram_bins;
        if bins == 0 || bins > MAX_HISTOGRAM_BINS {
            return Err(ServiceError::InvalidRequest(format!(
                "histogram_bins must be between 1 and {}",
                MAX_HISTOGRAM_BINS
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Catalog operations
    // -------------------------------------------------------------------------

    pub async fn create_mosaic(
        &self,
        name: &str,
        paths: &[String],
        options: &CreateOptions,
        overwrite: bool,
    ) -> Result<Arc<MosaicCatalog>, ServiceError> {
        let catalog = self
            .mosaics
            .create(name, &self.footprints(), paths, options, overwrite)
            .await?;
        Ok(catalog)
    }

    /// Append assets to a catalog; returns the added count and the new
    /// snapshot.
    pub async fn update_mosaic(
        &self,
        name: &str,
        paths: &[String],
        add_first: bool,
    ) -> Result<(usize, Arc<MosaicCatalog>), ServiceError> {
        let result = self
            .mosaics
            .append(
                name,
                &self.footprints(),
                paths,
                add_first,
                self.config.footprint_concurrency,
            )
            .await?;
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Single asset
    // -------------------------------------------------------------------------

    pub async fn asset_info(&self, path: &str) -> Result<AssetInfo, ServiceError> {
        let info = self.reader.info(path).await?;
        let asset = self.footprints().resolve(path).await?;
        Ok(AssetInfo {
            asset,
            native_bounds: info.bounds,
            width: info.width,
            height: info.height,
            overviews: info.overviews,
        })
    }

    /// Statistics of one asset over the requested region.
    pub async fn asset_statistics(
        &self,
        path: &str,
        request: &StatisticsRequest,
    ) -> Result<StatisticsMap, ServiceError> {
        self.check_limits(request)?;
        let job = AssetJob {
            reader: self.reader.clone(),
            selector: self.selector(request),
            request: request.clone(),
        };
        timeout(self.config.request_timeout, job.run(path))
            .await
            .map_err(|_| ServiceError::Timeout { pending: 1 })?
    }

    // -------------------------------------------------------------------------
    // Mosaic
    // -------------------------------------------------------------------------

    /// Statistics over the assets of a mosaic that intersect the region.
    pub async fn mosaic_statistics(
        &self,
        name: &str,
        request: &StatisticsRequest,
        mode: MergeMode,
        cancel: CancellationToken,
    ) -> Result<MosaicStatistics, ServiceError> {
        self.check_limits(request)?;
        let catalog = self.mosaics.get(name).await?;
        let extent = lonlat_extent(&request.region, &catalog)?;
        let candidates: Vec<String> = catalog
            .assets_for_bbox(&extent)
            .into_iter()
            .map(|a| a.path.clone())
            .collect();
        if candidates.is_empty() {
            return Err(RegionError::EmptyRegion.into());
        }
        debug!(
            mosaic = name,
            candidates = candidates.len(),
            mode = ?mode,
            "Mosaic statistics fan-out"
        );

        let deadline = Instant::now() + self.config.request_timeout;
        let token = cancel.child_token();
        let result = match mode {
            MergeMode::PerAsset => self.per_asset(&candidates, request, deadline, &token).await,
            MergeMode::Merged => self.merged(&candidates, request, deadline, &token).await,
        };
        // Stop anything still running for this request
        token.cancel();

        let result = result?;
        if !result.has_results() {
            let timed_out = result
                .skipped
                .iter()
                .filter(|s| s.reason == TIMEOUT_REASON)
                .count();
            if result.skipped.is_empty() {
                return Err(RegionError::EmptyRegion.into());
            }
            if timed_out == result.skipped.len() {
                return Err(ServiceError::Timeout { pending: timed_out });
            }
        }

        info!(
            mosaic = name,
            results = result.assets.len() + result.merged.is_some() as usize,
            skipped = result.skipped.len(),
            "Computed mosaic statistics"
        );
        Ok(result)
    }

    async fn per_asset(
        &self,
        paths: &[String],
        request: &StatisticsRequest,
        deadline: Instant,
        token: &CancellationToken,
    ) -> Result<MosaicStatistics, ServiceError> {
        let job = Arc::new(AssetJob {
            reader: self.reader.clone(),
            selector: self.selector(request),
            request: request.clone(),
        });

        let outcome = self
            .fan_out(paths, deadline, token, |path| {
                let job = job.clone();
                async move {
                    match job.run(&path).await {
                        Ok(stats) => Ok(Some(stats)),
                        // Assets the region misses are not failures
                        Err(ServiceError::Region(RegionError::EmptyRegion)) => Ok(None),
                        Err(e) => Err(e.to_string()),
                    }
                }
            })
            .await?;

        let assets = outcome
            .completed
            .into_iter()
            .filter_map(|(index, stats)| {
                stats.map(|statistics| AssetStatistics {
                    asset: paths[index].clone(),
                    statistics,
                })
            })
            .collect();

        Ok(MosaicStatistics {
            mode: MergeMode::PerAsset,
            assets,
            merged: None,
            contributing: Vec::new(),
            skipped: outcome.skipped,
        })
    }

    async fn merged(
        &self,
        paths: &[String],
        request: &StatisticsRequest,
        deadline: Instant,
        token: &CancellationToken,
    ) -> Result<MosaicStatistics, ServiceError> {
        let empty = |skipped: Vec<SkippedAsset>| MosaicStatistics {
            mode: MergeMode::Merged,
            assets: Vec::new(),
            merged: None,
            contributing: Vec::new(),
            skipped,
        };

        // Metadata first: the grid depends on every asset's extent
        let reader = self.reader.clone();
        let infos = self
            .fan_out(paths, deadline, token, |path| {
                let reader = reader.clone();
                async move { reader.info(&path).await.map_err(|e| e.to_string()) }
            })
            .await?;
        let mut skipped = infos.skipped;
        let datasets: Vec<(String, DatasetInfo)> = infos
            .completed
            .into_iter()
            .map(|(index, info)| (paths[index].clone(), info))
            .collect();
        let Some((_, reference)) = datasets.first() else {
            return Ok(empty(skipped));
        };
        let bands = read_bands(request, reference)?;

        let grid = self.selector(request).select_grid(&request.region, &datasets)?;
        skipped.extend(
            grid.excluded
                .iter()
                .map(|(asset, reason)| SkippedAsset {
                    asset: asset.clone(),
                    reason: reason.clone(),
                }),
        );

        let placements: Vec<String> = grid.placements.iter().map(|p| p.path.clone()).collect();
        let windows = grid.placements.clone();
        let reader = self.reader.clone();
        let band_list = bands.clone();
        let reads = self
            .fan_out(&placements, deadline, token, |path| {
                let reader = reader.clone();
                let request = windows
                    .iter()
                    .find(|p| p.path == path)
                    .map(|p| p.window.to_request(Some(band_list.clone())));
                async move {
                    let request = request.ok_or_else(|| "no placement".to_string())?;
                    reader
                        .read_window(&path, &request)
                        .await
                        .map_err(|e| e.to_string())
                }
            })
            .await?;
        skipped.extend(reads.skipped);

        let mut composite = RasterWindow::empty(grid.window.width, grid.window.height, bands.clone());
        let mut contributing = Vec::new();
        for (index, window) in reads.completed {
            let placement = &grid.placements[index];
            match paint(&mut composite, placement, &window) {
                Ok(0) => {}
                Ok(_) => contributing.push(placement.path.clone()),
                Err(reason) => skipped.push(SkippedAsset {
                    asset: placement.path.clone(),
                    reason,
                }),
            }
        }

        if contributing.is_empty() && !skipped.is_empty() {
            return Ok(empty(skipped));
        }

        let coverage = grid.mask.as_ref().map(|m| m.as_slice());
        let merged = summarize(&composite, coverage, &request.expressions, &request.options)?;
        Ok(MosaicStatistics {
            mode: MergeMode::Merged,
            assets: Vec::new(),
            merged: Some(merged),
            contributing,
            skipped,
        })
    }

    /// Run `work` for every path on the bounded pool until all finish, the
    /// deadline passes, or the caller cancels.
    ///
    /// Completed results keep input order. Failed and unfinished paths are
    /// returned as skipped.
    async fn fan_out<T, F, Fut>(
        &self,
        paths: &[String],
        deadline: Instant,
        token: &CancellationToken,
        work: F,
    ) -> Result<FanOut<T>, ServiceError>
    where
        T: Send + 'static,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, path) in paths.iter().enumerate() {
            let semaphore = semaphore.clone();
            let token = token.clone();
            let job = work(path.clone());
            tasks.spawn(async move {
                let result = tokio::select! {
                    _ = token.cancelled() => Err("cancelled".to_string()),
                    result = async {
                        match semaphore.acquire_owned().await {
                            Ok(_permit) => job.await,
                            Err(_) => Err("read pool closed".to_string()),
                        }
                    } => result,
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<T, String>>> = (0..paths.len()).map(|_| None).collect();
        let mut timed_out = false;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tasks.abort_all();
                    return Err(ServiceError::Cancelled);
                }
                joined = timeout_at(deadline, tasks.join_next()) => match joined {
                    Ok(Some(Ok((index, result)))) => results[index] = Some(result),
                    Ok(Some(Err(e))) => warn!(error = %e, "Statistics task failed"),
                    Ok(None) => break,
                    Err(_) => {
                        timed_out = true;
                        tasks.abort_all();
                        break;
                    }
                },
            }
        }

        let mut outcome = FanOut {
            completed: Vec::new(),
            skipped: Vec::new(),
        };
        for (index, result) in results.into_iter().enumerate() {
            let reason = match result {
                Some(Ok(value)) => {
                    outcome.completed.push((index, value));
                    continue;
                }
                Some(Err(reason)) => reason,
                None if timed_out => TIMEOUT_REASON.to_string(),
                None => "task failed".to_string(),
            };
            warn!(asset = %paths[index], reason = %reason, "Skipping asset");
            outcome.skipped.push(SkippedAsset {
                asset: paths[index].clone(),
                reason,
            });
        }
        Ok(outcome)
    }
}

struct FanOut<T> {
    completed: Vec<(usize, T)>,
    skipped: Vec<SkippedAsset>,
}

/// Region selection, read and statistics for one asset.
struct AssetJob {
    reader: Arc<dyn RasterReader>,
    selector: RegionSelector,
    request: StatisticsRequest,
}

impl AssetJob {
    async fn run(&self, path: &str) -> Result<StatisticsMap, ServiceError> {
        let info = self.reader.info(path).await?;
        let bands = read_bands(&self.request, &info)?;
        let selected = self.selector.select_one(&self.request.region, path, &info)?;

        let window = self
            .reader
            .read_window(path, &selected.window.to_request(Some(bands)))
            .await?;
        let coverage = selected.mask.as_ref().map(|m| m.as_slice());
        let stats = summarize(
            &window,
            coverage,
            &self.request.expressions,
            &self.request.options,
        )?;
        Ok(stats)
    }
}

/// Bands to read for `request` from a dataset described by `info`.
fn read_bands(request: &StatisticsRequest, info: &DatasetInfo) -> Result<Vec<usize>, ServiceError> {
    let available = info.bands.len();

    if !request.expressions.is_empty() {
        let referenced: BTreeSet<usize> = request
            .expressions
            .iter()
            .flat_map(|e| e.bands())
            .collect();
        if let Some(&band) = referenced.iter().find(|&&b| b > available) {
            return Err(ExpressionError::UnknownBand { band, available }.into());
        }
        if referenced.is_empty() {
            return Ok(vec![1]);
        }
        return Ok(referenced.into_iter().collect());
    }

    match &request.bands {
        Some(bands) => {
            if let Some(band) = bands.iter().find(|&&b| b == 0 || b > available) {
                return Err(ServiceError::InvalidRequest(format!(
                    "band {} does not exist, asset has {} band(s)",
                    band, available
                )));
            }
            Ok(bands.clone())
        }
        None => Ok((1..=available).collect()),
    }
}

/// Extent of the region in lon/lat, for catalog lookups.
fn lonlat_extent(region: &RegionSpec, catalog: &MosaicCatalog) -> Result<Bounds, ServiceError> {
    Ok(match region {
        RegionSpec::Whole => catalog.bounds(),
        RegionSpec::Bbox { bounds, crs } => crs.transform_bounds(Crs::WGS84, bounds)?,
        RegionSpec::Geometry { geometry, crs } => geometry.transform(*crs, Crs::WGS84)?.bounds(),
    })
}

/// Copy valid pixels of `window` into the unfilled pixels of `composite`.
///
/// Returns the number of pixels filled. Pixels already valid in the
/// composite came from a higher precedence asset and are left alone.
fn paint(
    composite: &mut RasterWindow,
    placement: &GridPlacement,
    window: &RasterWindow,
) -> Result<usize, String> {
    if window.width != placement.window.width || window.height != placement.window.height {
        return Err(format!(
            "read returned {}x{} instead of {}x{}",
            window.width, window.height, placement.window.width, placement.window.height
        ));
    }
    let planes = composite
        .band_indexes
        .iter()
        .map(|band| {
            window
                .band_indexes
                .iter()
                .position(|b| b == band)
                .ok_or_else(|| format!("band {} missing from read", band))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut filled = 0;
    for row in 0..window.height {
        let dst_row = row + placement.row_offset;
        if dst_row >= composite.height {
            break;
        }
        for col in 0..window.width {
            let dst_col = col + placement.col_offset;
            if dst_col >= composite.width {
                break;
            }
            let src = row * window.width + col;
            let dst = dst_row * composite.width + dst_col;
            if composite.mask[dst] || !window.mask[src] {
                continue;
            }
            for (target, &source) in planes.iter().enumerate() {
                composite.bands[target][dst] = window.bands[source][src];
            }
            composite.mask[dst] = true;
            filled += 1;
        }
    }
    Ok(filled)
}
