//! Region selection: request region → per-asset read windows and pixel masks.
//!
//! A region is intersected with each asset's extent in the asset's own CRS.
//! The resulting box is snapped outward to the asset's native pixel grid, so
//! a window never cuts a source pixel in half, and then mapped onto an output
//! grid no larger than the requested size.
//!
//! ```text
//!   asset pixel grid        region            read window (snapped)
//!   ┌──┬──┬──┬──┐
//!   │  │  │  │  │          ╭────╮           ┌──┬──┬──┐
//!   ├──┼──┼──┼──┤    ∩     │    │    ──►    ├──┼──┼──┤  + mask of pixel
//!   │  │  │  │  │          ╰────╯           └──┴──┴──┘    centers inside
//!   └──┴──┴──┴──┘                                         the polygon
//! ```
//!
//! For merged mosaic statistics [`RegionSelector::select_grid`] builds one
//! output grid shared by every asset, and places each asset's read on it.

use crate::error::{GeoError, RegionError};
use crate::geo::{Bounds, Crs, Geometry};
use crate::raster::{DatasetInfo, WindowRequest};

/// Default longest side of an output grid.
pub const DEFAULT_MAX_SIZE: usize = 1024;

/// Default upper bound on either side of any output grid.
pub const DEFAULT_MAX_OUTPUT_SIZE: usize = 8192;

/// Fraction of a pixel treated as rounding noise when snapping.
const SNAP_EPSILON: f64 = 1e-6;

fn floor_px(v: f64) -> f64 {
    (v + SNAP_EPSILON).floor()
}

fn ceil_px(v: f64) -> f64 {
    (v - SNAP_EPSILON).ceil()
}

// =============================================================================
// Request types
// =============================================================================

/// The spatial subset a request targets.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RegionSpec {
    /// Full extent of the asset or mosaic
    #[default]
    Whole,
    Bbox { bounds: Bounds, crs: Crs },
    Geometry { geometry: Geometry, crs: Crs },
}

impl RegionSpec {
    /// Region extent in `crs`; `None` for the whole extent.
    fn extent_in(&self, crs: Crs) -> Result<Option<Bounds>, GeoError> {
        match self {
            RegionSpec::Whole => Ok(None),
            RegionSpec::Bbox { bounds, crs: from } => from.transform_bounds(crs, bounds).map(Some),
            RegionSpec::Geometry { geometry, crs: from } => {
                Ok(Some(geometry.transform(*from, crs)?.bounds()))
            }
        }
    }

    /// Polygon in `crs`, only for geometry regions.
    fn geometry_in(&self, crs: Crs) -> Result<Option<Geometry>, GeoError> {
        match self {
            RegionSpec::Geometry { geometry, crs: from } => geometry.transform(*from, crs).map(Some),
            _ => Ok(None),
        }
    }
}

/// Output grid size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSize {
    /// Native resolution, downsampled so the longest side is at most this
    MaxSize(usize),
    /// Explicit grid dimensions
    Exact { width: usize, height: usize },
}

impl Default for OutputSize {
    fn default() -> Self {
        OutputSize::MaxSize(DEFAULT_MAX_SIZE)
    }
}

impl OutputSize {
    /// Check the size is non-empty and no side exceeds `limit`.
    pub fn validate(&self, limit: usize) -> Result<(), RegionError> {
        match *self {
            OutputSize::MaxSize(0) => Err(RegionError::InvalidSize("max_size must be > 0".into())),
            OutputSize::MaxSize(max) if max > limit => Err(RegionError::InvalidSize(format!(
                "max_size {} exceeds the limit of {}",
                max, limit
            ))),
            OutputSize::Exact { width, height } if width == 0 || height == 0 => Err(
                RegionError::InvalidSize(format!("{}x{} has an empty side", width, height)),
            ),
            OutputSize::Exact { width, height } if width > limit || height > limit => {
                Err(RegionError::InvalidSize(format!(
                    "{}x{} exceeds the limit of {} per side",
                    width, height, limit
                )))
            }
            _ => Ok(()),
        }
    }

    /// Output dimensions for a window of `native` pixels.
    fn resolve(&self, native: (usize, usize)) -> (usize, usize) {
        match *self {
            OutputSize::Exact { width, height } => (width, height),
            OutputSize::MaxSize(max) => {
                let longest = native.0.max(native.1);
                if longest <= max {
                    return native;
                }
                let scale = max as f64 / longest as f64;
                let side = |n: usize| ((n as f64 * scale).round() as usize).clamp(1, max);
                (side(native.0), side(native.1))
            }
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// A window to read: extent in the asset CRS and output grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowDescriptor {
    pub bounds: Bounds,
    pub width: usize,
    pub height: usize,
}

impl WindowDescriptor {
    pub fn to_request(&self, bands: Option<Vec<usize>>) -> WindowRequest {
        WindowRequest {
            bounds: self.bounds,
            width: self.width,
            height: self.height,
            bands,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Center of output pixel `(col, row)`.
    fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        let dx = self.bounds.width() / self.width as f64;
        let dy = self.bounds.height() / self.height as f64;
        (
            self.bounds.min_x + (col as f64 + 0.5) * dx,
            self.bounds.max_y - (row as f64 + 0.5) * dy,
        )
    }
}

/// Row-major inclusion mask over an output grid.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelMask {
    pub width: usize,
    pub height: usize,
    pub inside: Vec<bool>,
}

impl PixelMask {
    /// Mark pixel centers of `window` that fall inside `geometry`.
    pub fn rasterize(window: &WindowDescriptor, geometry: &Geometry) -> Self {
        let mut inside = Vec::with_capacity(window.pixel_count());
        for row in 0..window.height {
            for col in 0..window.width {
                let (x, y) = window.pixel_center(col, row);
                inside.push(geometry.contains(x, y));
            }
        }
        Self {
            width: window.width,
            height: window.height,
            inside,
        }
    }

    pub fn count_inside(&self) -> usize {
        self.inside.iter().filter(|v| **v).count()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.inside
    }
}

/// What to read from one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetWindow {
    pub path: String,
    pub crs: Crs,
    pub window: WindowDescriptor,
    pub mask: Option<PixelMask>,
}

/// One asset's read placed on a shared grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPlacement {
    pub path: String,
    pub window: WindowDescriptor,
    /// Offset of the window's top-left pixel on the shared grid
    pub col_offset: usize,
    pub row_offset: usize,
}

/// A shared output grid for merged statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedGrid {
    pub crs: Crs,
    pub window: WindowDescriptor,
    pub mask: Option<PixelMask>,
    /// Placements in precedence order
    pub placements: Vec<GridPlacement>,
    /// Assets that could not be placed, with the reason
    pub excluded: Vec<(String, String)>,
}

// =============================================================================
// Selector
// =============================================================================

/// Resolves regions into read windows.
#[derive(Debug, Clone, Copy)]
pub struct RegionSelector {
    size: OutputSize,
    max_side: usize,
}

impl Default for RegionSelector {
    fn default() -> Self {
        Self::new(OutputSize::default())
    }
}

impl RegionSelector {
    pub fn new(size: OutputSize) -> Self {
        Self {
            size,
            max_side: DEFAULT_MAX_OUTPUT_SIZE,
        }
    }

    /// Reject output sizes with a side longer than `max_side`.
    pub fn with_max_side(mut self, max_side: usize) -> Self {
        self.max_side = max_side;
        self
    }

    pub fn size(&self) -> OutputSize {
        self.size
    }

    /// Windows for every dataset the region intersects, in input order.
    ///
    /// Datasets outside the region are omitted; if none remain the result is
    /// [`RegionError::EmptyRegion`].
    pub fn select(
        &self,
        region: &RegionSpec,
        datasets: &[(String, DatasetInfo)],
    ) -> Result<Vec<AssetWindow>, RegionError> {
        let mut windows = Vec::new();
        for (path, info) in datasets {
            match self.select_one(region, path, info) {
                Ok(window) => windows.push(window),
                Err(RegionError::EmptyRegion) => continue,
                Err(e) => return Err(e),
            }
        }
        if windows.is_empty() {
            return Err(RegionError::EmptyRegion);
        }
        Ok(windows)
    }

    /// Window for a single dataset.
    pub fn select_one(
        &self,
        region: &RegionSpec,
        path: &str,
        info: &DatasetInfo,
    ) -> Result<AssetWindow, RegionError> {
        self.size.validate(self.max_side)?;

        let extent = match region.extent_in(info.crs)? {
            None => info.bounds,
            Some(extent) => extent
                .intersection(&info.bounds)
                .ok_or(RegionError::EmptyRegion)?,
        };

        let (bounds, native) = snap_outward(&extent, &info.bounds, info.resolution());
        let (width, height) = self.size.resolve(native);
        let window = WindowDescriptor {
            bounds,
            width,
            height,
        };

        let mask = match region.geometry_in(info.crs)? {
            Some(geometry) => {
                let mask = PixelMask::rasterize(&window, &geometry);
                if mask.count_inside() == 0 {
                    return Err(RegionError::EmptyRegion);
                }
                Some(mask)
            }
            None => None,
        };

        Ok(AssetWindow {
            path: path.to_string(),
            crs: info.crs,
            window,
            mask,
        })
    }

    /// One grid for all datasets, aligned to the pixel grid of the first
    /// (highest precedence) dataset and in its CRS.
    ///
    /// Datasets in a CRS the grid cannot be expressed in are listed in
    /// `excluded`; datasets outside the grid are left out silently.
    pub fn select_grid(
        &self,
        region: &RegionSpec,
        datasets: &[(String, DatasetInfo)],
    ) -> Result<SharedGrid, RegionError> {
        self.size.validate(self.max_side)?;
        let (_, reference) = datasets.first().ok_or(RegionError::EmptyRegion)?;
        let crs = reference.crs;

        let mut excluded = Vec::new();
        let mut extents = Vec::new();
        for (path, info) in datasets {
            if info.crs != crs {
                excluded.push((
                    path.clone(),
                    format!("asset CRS {} differs from mosaic grid CRS {}", info.crs, crs),
                ));
                continue;
            }
            extents.push((path, info.bounds));
        }

        let coverage = extents
            .iter()
            .map(|(_, b)| *b)
            .reduce(|a, b| a.union(&b))
            .ok_or(RegionError::EmptyRegion)?;
        let extent = match region.extent_in(crs)? {
            None => coverage,
            Some(extent) => extent
                .intersection(&coverage)
                .ok_or(RegionError::EmptyRegion)?,
        };

        // Snap against a grid anchored at the reference asset's origin
        let (rx, ry) = reference.resolution();
        let anchor = Bounds::new(
            reference.bounds.min_x + floor_px((extent.min_x - reference.bounds.min_x) / rx) * rx,
            reference.bounds.max_y - ceil_px((reference.bounds.max_y - extent.min_y) / ry) * ry,
            reference.bounds.min_x + ceil_px((extent.max_x - reference.bounds.min_x) / rx) * rx,
            reference.bounds.max_y - floor_px((reference.bounds.max_y - extent.max_y) / ry) * ry,
        );
        let native = (
            ((anchor.width() / rx).round() as usize).max(1),
            ((anchor.height() / ry).round() as usize).max(1),
        );
        let (width, height) = self.size.resolve(native);
        let window = WindowDescriptor {
            bounds: anchor,
            width,
            height,
        };

        let mask = match region.geometry_in(crs)? {
            Some(geometry) => {
                let mask = PixelMask::rasterize(&window, &geometry);
                if mask.count_inside() == 0 {
                    return Err(RegionError::EmptyRegion);
                }
                Some(mask)
            }
            None => None,
        };

        let placements: Vec<GridPlacement> = extents
            .into_iter()
            .filter_map(|(path, bounds)| place_on_grid(path, &bounds, &window))
            .collect();
        if placements.is_empty() {
            return Err(RegionError::EmptyRegion);
        }

        Ok(SharedGrid {
            crs,
            window,
            mask,
            placements,
            excluded,
        })
    }
}

/// Grow `extent` to whole pixels of the grid defined by `bounds` and
/// `resolution`. Returns the snapped box and its size in native pixels.
fn snap_outward(extent: &Bounds, bounds: &Bounds, resolution: (f64, f64)) -> (Bounds, (usize, usize)) {
    let (rx, ry) = resolution;
    let cols = (bounds.width() / rx).round() as usize;
    let rows = (bounds.height() / ry).round() as usize;

    let col0 = (floor_px((extent.min_x - bounds.min_x) / rx).max(0.0) as usize).min(cols.saturating_sub(1));
    let row0 = (floor_px((bounds.max_y - extent.max_y) / ry).max(0.0) as usize).min(rows.saturating_sub(1));
    let col1 = (ceil_px((extent.max_x - bounds.min_x) / rx).max(0.0) as usize).clamp(col0 + 1, cols.max(col0 + 1));
    let row1 = (ceil_px((bounds.max_y - extent.min_y) / ry).max(0.0) as usize).clamp(row0 + 1, rows.max(row0 + 1));

    let snapped = Bounds::new(
        bounds.min_x + col0 as f64 * rx,
        bounds.max_y - row1 as f64 * ry,
        bounds.min_x + col1 as f64 * rx,
        bounds.max_y - row0 as f64 * ry,
    );
    (snapped, (col1 - col0, row1 - row0))
}

/// Sub-window of `grid` covered by `bounds`, aligned to grid cells.
fn place_on_grid(path: &str, bounds: &Bounds, grid: &WindowDescriptor) -> Option<GridPlacement> {
    let overlap = bounds.intersection(&grid.bounds)?;
    let dx = grid.bounds.width() / grid.width as f64;
    let dy = grid.bounds.height() / grid.height as f64;

    let col0 = floor_px((overlap.min_x - grid.bounds.min_x) / dx).max(0.0) as usize;
    let row0 = floor_px((grid.bounds.max_y - overlap.max_y) / dy).max(0.0) as usize;
    let col1 = (ceil_px((overlap.max_x - grid.bounds.min_x) / dx).max(0.0) as usize).min(grid.width);
    let row1 = (ceil_px((grid.bounds.max_y - overlap.min_y) / dy).max(0.0) as usize).min(grid.height);
    if col1 <= col0 || row1 <= row0 {
        return None;
    }

    Some(GridPlacement {
        path: path.to_string(),
        window: WindowDescriptor {
            bounds: Bounds::new(
                grid.bounds.min_x + col0 as f64 * dx,
                grid.bounds.max_y - row1 as f64 * dy,
                grid.bounds.min_x + col1 as f64 * dx,
                grid.bounds.max_y - row0 as f64 * dy,
            ),
            width: col1 - col0,
            height: row1 - row0,
        },
        col_offset: col0,
        row_offset: row0,
    })
}
