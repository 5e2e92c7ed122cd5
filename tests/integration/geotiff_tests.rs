//! GeoTIFF reading through the range-reader stack.
//!
//! Tests verify:
//! - Local files and in-memory objects decode to the same windows
//! - Block caching keeps repeated window reads off the underlying reader
//! - Reprojected (Web Mercator) assets get lon/lat footprints

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use cog_mosaic::error::IoError;
use cog_mosaic::format::GeoTiffDataset;
use cog_mosaic::geo::Crs;
use cog_mosaic::io::{BlockCache, RangeReader};
use cog_mosaic::raster::{RasterReader, WindowRequest};
use cog_mosaic::service::{ServiceConfig, StatisticsRequest};

use super::test_utils::{asset_a, memory_service, GeoTiffBuilder};

// =============================================================================
// Tracking Reader
// =============================================================================

/// Range reader that counts every read reaching it.
struct TrackingReader {
    data: Bytes,
    reads: Arc<AtomicUsize>,
}

impl TrackingReader {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl RangeReader for TrackingReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let start = offset as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.data.len() as u64,
            });
        }
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        "tracking://asset.tif"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_local_file_matches_memory_object() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.tif");
    std::fs::write(&path, asset_a()).unwrap();
    let local = path.to_str().unwrap().to_string();

    let test = memory_service(vec![("a.tif", asset_a())], ServiceConfig::default());
    let request = StatisticsRequest::default();

    let from_file = test
        .service
        .asset_statistics(&local, &request)
        .await
        .unwrap();
    let from_memory = test
        .service
        .asset_statistics("memory://a.tif", &request)
        .await
        .unwrap();
    assert_eq!(from_file, from_memory);
    assert_eq!(from_file.get("b1").unwrap().count, 400);
}

#[tokio::test]
async fn test_block_cache_serves_repeated_reads() {
    let tracking = TrackingReader::new(asset_a());
    let reads = tracking.reads.clone();
    let cache = BlockCache::with_capacity(tracking, 1024, 64);

    let dataset = GeoTiffDataset::open(&cache).await.unwrap();
    let request = WindowRequest {
        bounds: dataset.info().bounds,
        width: 20,
        height: 20,
        bands: None,
    };

    let first = dataset.read_window(&cache, &request).await.unwrap();
    let after_first = reads.load(Ordering::SeqCst);
    assert!(after_first > 0);

    let second = dataset.read_window(&cache, &request).await.unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), after_first);
    assert_eq!(first.bands, second.bands);
    assert!(cache.stats().hits > 0);
}

#[tokio::test]
async fn test_mercator_asset_footprint_is_lonlat() {
    // 16x16 px of 1000 m starting at the mercator origin
    let tiff = GeoTiffBuilder::lonlat(16, 16, 0.0, 16_000.0)
        .epsg(3857)
        .pixel_size(1000.0)
        .build(|_, _, _| 1);
    let test = memory_service(vec![("m.tif", tiff)], ServiceConfig::default());

    let info = test.reader.info("memory://m.tif").await.unwrap();
    assert_eq!(info.crs, Crs::WEB_MERCATOR);
    assert_eq!(info.width, 16);

    let asset = test.service.footprints().resolve("memory://m.tif").await.unwrap();
    assert_eq!(asset.crs, Crs::WEB_MERCATOR);
    assert!(asset.bounds.min_x.abs() < 1e-9);
    // 16 km east of the origin is about 0.1437 degrees
    assert!((asset.bounds.max_x - 0.143_730_1).abs() < 1e-4);
    assert!(asset.bounds.max_y > 0.14 && asset.bounds.max_y < 0.15);
}
