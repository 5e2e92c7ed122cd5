//! Statistics over real GeoTIFF bytes, through the COG reader.
//!
//! Tests verify:
//! - Whole-asset, bbox and polygon regions (including a reprojected bbox)
//! - Nodata masking and Deflate tiles
//! - Band selection and band-math expressions
//! - Per-asset and merged mosaic statistics

use cog_mosaic::error::{RegionError, ServiceError};
use cog_mosaic::geo::{lonlat_to_mercator, Bounds, Crs, Geometry};
use cog_mosaic::region::{OutputSize, RegionSpec};
use cog_mosaic::service::{MergeMode, ServiceConfig, StatisticsRequest};
use cog_mosaic::stats::Expression;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::test_utils::{
    asset_a, assert_close, demo_service, memory_service, GeoTiffBuilder, PIXEL,
};

fn rectangle(west: f64, south: f64, east: f64, north: f64) -> Geometry {
    Geometry::from_geojson(&json!({
        "type": "Polygon",
        "coordinates": [[[west, south], [east, south], [east, north], [west, north], [west, south]]]
    }))
    .unwrap()
}

// =============================================================================
// Single Asset
// =============================================================================

#[tokio::test]
async fn test_whole_asset_statistics() {
    let test = memory_service(vec![("a.tif", asset_a())], ServiceConfig::default());

    let stats = test
        .service
        .asset_statistics("memory://a.tif", &StatisticsRequest::default())
        .await
        .unwrap();

    assert_eq!(stats.labels().collect::<Vec<_>>(), vec!["b1"]);
    let b1 = stats.get("b1").unwrap();
    assert_eq!(b1.count, 400);
    assert_eq!(b1.masked_pixels, 0);
    assert_eq!(b1.min, Some(1.0));
    assert_eq!(b1.max, Some(20.0));
    assert_close(b1.mean.unwrap(), 10.5);
    assert_close(b1.sum.unwrap(), 4200.0);
    assert_close(b1.valid_percent, 100.0);
    assert_eq!(b1.unique, 20);
}

#[tokio::test]
async fn test_nodata_pixels_are_masked() {
    let tiff = GeoTiffBuilder::lonlat(20, 20, 0.0, 20.0 * PIXEL)
        .nodata("0")
        .deflate()
        .build(|_, col, _| if col < 5 { 0 } else { 9 });
    let test = memory_service(vec![("n.tif", tiff)], ServiceConfig::default());

    let stats = test
        .service
        .asset_statistics("memory://n.tif", &StatisticsRequest::default())
        .await
        .unwrap();
    let b1 = stats.get("b1").unwrap();

    assert_eq!(b1.count, 300);
    assert_eq!(b1.valid_pixels, 300);
    assert_eq!(b1.masked_pixels, 100);
    assert_close(b1.valid_percent, 75.0);
    assert_eq!(b1.min, Some(9.0));
    assert_eq!(b1.max, Some(9.0));
}

#[tokio::test]
async fn test_band_selection_and_expressions() {
    let tiff = GeoTiffBuilder::lonlat(20, 20, 0.0, 20.0 * PIXEL)
        .bands(2)
        .deflate()
        .build(|band, col, _| if band == 0 { col as u8 + 1 } else { 2 });
    let test = memory_service(vec![("m.tif", tiff)], ServiceConfig::default());

    let request = StatisticsRequest {
        bands: Some(vec![2]),
        ..Default::default()
    };
    let stats = test
        .service
        .asset_statistics("memory://m.tif", &request)
        .await
        .unwrap();
    assert_eq!(stats.labels().collect::<Vec<_>>(), vec!["b2"]);
    assert_eq!(stats.get("b2").unwrap().mean, Some(2.0));

    let ratio = Expression::parse("b1 / b2").unwrap();
    let label = ratio.text().to_string();
    let request = StatisticsRequest {
        expressions: vec![ratio],
        ..Default::default()
    };
    let stats = test
        .service
        .asset_statistics("memory://m.tif", &request)
        .await
        .unwrap();
    let s = stats.get(&label).unwrap();
    assert_eq!(s.count, 400);
    assert_eq!(s.min, Some(0.5));
    assert_eq!(s.max, Some(10.0));
    assert_close(s.mean.unwrap(), 5.25);
}

#[tokio::test]
async fn test_polygon_region_counts_only_inside_pixels() {
    let test = memory_service(vec![("a.tif", asset_a())], ServiceConfig::default());

    // Left half of the asset: columns 0..10, values 1..=10
    let request = StatisticsRequest::from(RegionSpec::Geometry {
        geometry: rectangle(0.0, 0.0, 10.0 * PIXEL, 20.0 * PIXEL),
        crs: Crs::WGS84,
    });
    let stats = test
        .service
        .asset_statistics("memory://a.tif", &request)
        .await
        .unwrap();
    let b1 = stats.get("b1").unwrap();

    assert_eq!(b1.count, 200);
    assert_eq!(b1.max, Some(10.0));
    assert_close(b1.sum.unwrap(), 1100.0);
}

#[tokio::test]
async fn test_bbox_in_another_crs_is_reprojected() {
    let test = memory_service(vec![("a.tif", asset_a())], ServiceConfig::default());

    let (min_x, min_y) = lonlat_to_mercator(0.0, 0.0);
    let (max_x, max_y) = lonlat_to_mercator(10.0 * PIXEL, 20.0 * PIXEL);
    let request = StatisticsRequest::from(RegionSpec::Bbox {
        bounds: Bounds::new(min_x, min_y, max_x, max_y),
        crs: Crs::WEB_MERCATOR,
    });
    let stats = test
        .service
        .asset_statistics("memory://a.tif", &request)
        .await
        .unwrap();

    let b1 = stats.get("b1").unwrap();
    assert_eq!(b1.count, 200);
    assert_eq!(b1.min, Some(1.0));
    assert_eq!(b1.max, Some(10.0));
}

#[tokio::test]
async fn test_output_size_limit_is_configurable() {
    let config = ServiceConfig {
        max_output_size: 16,
        ..ServiceConfig::default()
    };
    let test = memory_service(vec![("a.tif", asset_a())], config);

    let request = StatisticsRequest {
        size: Some(OutputSize::Exact { width: 20, height: 20 }),
        ..Default::default()
    };
    let result = test.service.asset_statistics("memory://a.tif", &request).await;
    assert!(matches!(
        result,
        Err(ServiceError::Region(RegionError::InvalidSize(_)))
    ));

    let request = StatisticsRequest {
        size: Some(OutputSize::MaxSize(16)),
        ..Default::default()
    };
    let stats = test
        .service
        .asset_statistics("memory://a.tif", &request)
        .await
        .unwrap();
    assert_eq!(stats.get("b1").unwrap().count, 256);

    // The default size is clamped to the limit
    let stats = test
        .service
        .asset_statistics("memory://a.tif", &StatisticsRequest::default())
        .await
        .unwrap();
    assert_eq!(stats.get("b1").unwrap().count, 256);
}

#[tokio::test]
async fn test_oversized_histogram_is_rejected() {
    let test = memory_service(vec![("a.tif", asset_a())], ServiceConfig::default());

    let mut request = StatisticsRequest::default();
    request.options.histogram_bins = 4_000_000_000_000;
    let result = test.service.asset_statistics("memory://a.tif", &request).await;
    assert!(matches!(result, Err(ServiceError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_downsampled_output_size() {
    let test = memory_service(vec![("a.tif", asset_a())], ServiceConfig::default());

    let request = StatisticsRequest {
        size: Some(OutputSize::MaxSize(10)),
        ..Default::default()
    };
    let stats = test
        .service
        .asset_statistics("memory://a.tif", &request)
        .await
        .unwrap();
    assert_eq!(stats.get("b1").unwrap().count, 100);
}

// =============================================================================
// Mosaics
// =============================================================================

#[tokio::test]
async fn test_mosaic_per_asset_statistics() {
    let service = demo_service().await;

    let result = service
        .mosaic_statistics(
            "demo",
            &StatisticsRequest::default(),
            MergeMode::PerAsset,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.skipped.is_empty());
    assert!(result.merged.is_none());
    let names: Vec<&str> = result.assets.iter().map(|a| a.asset.as_str()).collect();
    assert_eq!(names, vec!["memory://a.tif", "memory://b.tif"]);

    let a = result.assets[0].statistics.get("b1").unwrap();
    let b = result.assets[1].statistics.get("b1").unwrap();
    assert_eq!(a.count, 400);
    assert_eq!(b.count, 400);
    assert_eq!(b.mean, Some(50.0));
}

#[tokio::test]
async fn test_mosaic_merged_statistics_honour_precedence() {
    let service = demo_service().await;

    let result = service
        .mosaic_statistics(
            "demo",
            &StatisticsRequest::default(),
            MergeMode::Merged,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // 30x20 grid: a fills columns 0..20, b only the remaining 10 columns
    let merged = result.merged.unwrap();
    let b1 = merged.get("b1").unwrap();
    assert_eq!(b1.count, 600);
    assert_eq!(b1.min, Some(1.0));
    assert_eq!(b1.max, Some(50.0));
    assert_close(b1.sum.unwrap(), 4200.0 + 200.0 * 50.0);
    assert_eq!(result.contributing, vec!["memory://a.tif", "memory://b.tif"]);
    assert!(result.assets.is_empty());
}

#[tokio::test]
async fn test_mosaic_merged_polygon_selects_candidates() {
    let service = demo_service().await;

    // East strip covered by b only
    let request = StatisticsRequest::from(RegionSpec::Geometry {
        geometry: rectangle(22.0 * PIXEL, 0.0, 30.0 * PIXEL, 20.0 * PIXEL),
        crs: Crs::WGS84,
    });
    let result = service
        .mosaic_statistics("demo", &request, MergeMode::Merged, CancellationToken::new())
        .await
        .unwrap();

    let b1 = result.merged.as_ref().unwrap().get("b1").unwrap();
    assert_eq!(b1.count, 160);
    assert_eq!(b1.mean, Some(50.0));
    assert_eq!(result.contributing, vec!["memory://b.tif"]);
}

#[tokio::test]
async fn test_mosaic_region_outside_every_asset() {
    let service = demo_service().await;

    let request = StatisticsRequest::from(RegionSpec::Bbox {
        bounds: Bounds::new(5.0, 5.0, 6.0, 6.0),
        crs: Crs::WGS84,
    });
    for mode in [MergeMode::PerAsset, MergeMode::Merged] {
        let result = service
            .mosaic_statistics("demo", &request, mode, CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::Region(RegionError::EmptyRegion))
        ));
    }
}

#[tokio::test]
async fn test_cancelled_request_returns_cancelled() {
    let service = demo_service().await;

    let token = CancellationToken::new();
    token.cancel();
    let result = service
        .mosaic_statistics("demo", &StatisticsRequest::default(), MergeMode::PerAsset, token)
        .await;
    assert!(matches!(result, Err(ServiceError::Cancelled)));
}
