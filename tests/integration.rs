//! Integration tests for cog-mosaic.
//!
//! These tests verify end-to-end functionality including:
//! - Catalog creation, lookups, appends and persistence
//! - Statistics over real GeoTIFF bytes (nodata, Deflate, expressions, regions)
//! - Per-asset and merged mosaic statistics
//! - HTTP endpoints and error mapping
//! - GeoTIFF reading through the block cache

mod integration {
    pub mod test_utils;

    pub mod api_tests;
    pub mod catalog_tests;
    pub mod geotiff_tests;
    pub mod statistics_tests;
}
