//! # cog-mosaic
//!
//! Mosaic catalogs and windowed raster statistics over cloud-optimized
//! GeoTIFFs stored locally or in S3-compatible object storage.
//!
//! A catalog (MosaicJSON) maps quadkeys to the ordered list of assets
//! covering them. Statistics requests select a region, read just the
//! needed windows through HTTP range requests and summarise them per band,
//! per band-math expression, per asset or merged across the mosaic.
//!
//! ## Features
//!
//! - **Range-based reads**: Only the tiles intersecting a window are fetched
//! - **Catalogs**: Create, append, look up by tile, point or bbox, with
//!   conditional writes so concurrent creators never clobber each other
//! - **Statistics**: Counts, moments, percentiles, histograms and
//!   categorical summaries with nodata/alpha masking
//! - **Bounded fan-out**: Per-request concurrency limits, deadlines and
//!   cancellation across mosaic assets
//!
//! ## Architecture
//!
//! - [`io`] - Range readers (local, S3, memory) with block caching
//! - [`mod@format`] - TIFF/GeoTIFF parsing and sample decoding
//! - [`raster`] - Raster reader interface and the COG-backed implementation
//! - [`geo`] - Bounds, CRS transforms and polygon geometry
//! - [`tile`] - Quadkeys and the tile matrix set
//! - [`asset`] - Asset footprint resolution
//! - [`mosaic`] - Catalog documents, index, stores and registry
//! - [`region`] - Region selection and pixel masks
//! - [`stats`] - Statistics engine and band-math expressions
//! - [`service`] - Request orchestration
//! - [`server`] - Axum HTTP adapter
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cog_mosaic::{
//!     create_router, CogRasterReader, MemoryStore, MosaicRegistry, PrefixPathResolver,
//!     RouterConfig, ServiceConfig, StatisticsService, UrlAssetSource, WebMercatorQuad,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let reader = CogRasterReader::new(UrlAssetSource::new(None));
//!     let mosaics = MosaicRegistry::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(PrefixPathResolver::new(Some("memory://mosaics".to_string()))),
//!         Arc::new(WebMercatorQuad),
//!     );
//!     let service = StatisticsService::new(
//!         Arc::new(reader),
//!         Arc::new(mosaics),
//!         ServiceConfig::default(),
//!     );
//!
//!     let router = create_router(service, RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod asset;
pub mod config;
pub mod error;
pub mod format;
pub mod geo;
pub mod io;
pub mod mosaic;
pub mod raster;
pub mod region;
pub mod server;
pub mod service;
pub mod stats;
pub mod tile;

// Re-export commonly used types
pub use asset::{Asset, FootprintResolver};
pub use config::{Cli, Command, CreateConfig, InfoConfig, ServeConfig, UpdateConfig};
pub use error::{
    AssetError, CatalogError, ExpressionError, GeoError, IoError, RegionError, ServiceError,
    TiffError, TileError,
};
pub use format::GeoTiffDataset;
pub use geo::{Bounds, Crs, Geometry};
pub use io::{create_s3_client, BlockCache, RangeReader, S3RangeReader};
pub use mosaic::{
    CatalogStore, CatalogSummary, CreateOptions, FileStore, MemoryStore, MosaicCatalog,
    MosaicDocument, MosaicRegistry, PathResolver, PrefixPathResolver, S3Store, UrlStore,
};
pub use raster::{
    AssetSource, CogRasterReader, DatasetInfo, RasterReader, RasterWindow, UrlAssetSource,
    WindowRequest,
};
pub use region::{OutputSize, RegionSelector, RegionSpec};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use service::{
    MergeMode, MosaicStatistics, ServiceConfig, StatisticsRequest, StatisticsService,
};
pub use stats::{BandStatistics, Expression, Histogram, StatisticsMap, StatisticsOptions};
pub use tile::{Tile, TileMatrixSet, WebMercatorQuad};
