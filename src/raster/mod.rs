//! Raster I/O collaborator interface.
//!
//! Everything above this layer (footprints, regions, statistics) talks to
//! rasters only through [`RasterReader`]: dataset metadata and "read this
//! window at this size, give me per-band samples plus a validity mask".
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  FootprintResolver / StatisticsService    │
//! └─────────────────────┬─────────────────────┘
//!                       │ RasterReader
//!                       ▼
//! ┌───────────────────────────────────────────┐
//! │  CogRasterReader<S: AssetSource>          │
//! │  (LRU of open datasets, singleflight)     │
//! └─────────────────────┬─────────────────────┘
//!                       ▼
//! ┌───────────────────────────────────────────┐
//! │  GeoTiffDataset over BlockCache<Reader>   │
//! └───────────────────────────────────────────┘
//! ```

mod registry;
mod source;

pub use registry::{CogRasterReader, OpenDataset, DEFAULT_DATASET_CACHE_CAPACITY};
pub use source::{AssetSource, UrlAssetSource};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AssetError;
use crate::geo::{Bounds, Crs};

// =============================================================================
// Data types
// =============================================================================

/// Numeric sample type of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::UInt8 | DataType::Int8 => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }
}

/// Per-band metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandInfo {
    /// 1-based band index
    pub index: usize,
    pub dtype: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodata: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Dataset-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub crs: Crs,
    /// Extent in the dataset CRS
    pub bounds: Bounds,
    pub width: u32,
    pub height: u32,
    pub bands: Vec<BandInfo>,
    /// Decimation factors of the available overviews
    pub overviews: Vec<u32>,
}

impl DatasetInfo {
    /// Native pixel size `(x, y)` in CRS units.
    pub fn resolution(&self) -> (f64, f64) {
        (
            self.bounds.width() / self.width.max(1) as f64,
            self.bounds.height() / self.height.max(1) as f64,
        )
    }
}

// =============================================================================
// Window reads
// =============================================================================

/// A request to resample `bounds` (dataset CRS) onto a `width` x `height`
/// grid.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRequest {
    pub bounds: Bounds,
    pub width: usize,
    pub height: usize,
    /// 1-based band indexes; `None` reads every band
    pub bands: Option<Vec<usize>>,
}

/// Samples of a window read, one row-major plane per band.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterWindow {
    pub width: usize,
    pub height: usize,
    pub band_indexes: Vec<usize>,
    pub bands: Vec<Vec<f64>>,
    /// `true` where the pixel holds data
    pub mask: Vec<bool>,
}

impl RasterWindow {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// A window with no valid pixels.
    pub fn empty(width: usize, height: usize, band_indexes: Vec<usize>) -> Self {
        let len = width * height;
        Self {
            width,
            height,
            bands: vec![vec![0.0; len]; band_indexes.len()],
            band_indexes,
            mask: vec![false; len],
        }
    }
}

/// Source of raster metadata and windowed reads.
#[async_trait]
pub trait RasterReader: Send + Sync {
    async fn info(&self, path: &str) -> Result<DatasetInfo, AssetError>;

    async fn read_window(
        &self,
        path: &str,
        request: &WindowRequest,
    ) -> Result<RasterWindow, AssetError>;
}
