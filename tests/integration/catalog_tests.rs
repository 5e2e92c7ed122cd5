//! Catalog integration tests: creation from real GeoTIFF footprints,
//! lookups, appends, write conflicts and persistence.

use std::sync::Arc;

use cog_mosaic::error::{AssetError, CatalogError, ServiceError};
use cog_mosaic::geo::{lonlat_to_mercator, Bounds};
use cog_mosaic::mosaic::{CreateOptions, MosaicRegistry, PrefixPathResolver, UrlStore};
use cog_mosaic::service::{ServiceConfig, StatisticsService};
use cog_mosaic::tile::{TileMatrixSet, WebMercatorQuad};

use super::test_utils::{asset_a, asset_b, demo_service, memory_service, GeoTiffBuilder, PIXEL};

fn paths(assets: Vec<&cog_mosaic::Asset>) -> Vec<&str> {
    assets.into_iter().map(|a| a.path.as_str()).collect()
}

// =============================================================================
// Creation and Lookup
// =============================================================================

#[tokio::test]
async fn test_create_resolves_footprints() {
    let service = demo_service().await;
    let catalog = service.mosaics().get("demo").await.unwrap();

    let summary = catalog.summary();
    assert_eq!(summary.asset_count, 2);
    assert!(summary.minzoom <= summary.maxzoom);
    assert_eq!(summary.quadkey_zoom, summary.minzoom);

    let a = catalog.asset("memory://a.tif").unwrap();
    assert!((a.bounds.max_x - 20.0 * PIXEL).abs() < 1e-9);
    assert!((a.bounds.max_y - 20.0 * PIXEL).abs() < 1e-9);
    assert_eq!(a.band_count, 1);

    let bounds = catalog.bounds();
    assert!((bounds.max_x - 30.0 * PIXEL).abs() < 1e-9);
}

#[tokio::test]
async fn test_point_and_bbox_lookups() {
    let service = demo_service().await;
    let catalog = service.mosaics().get("demo").await.unwrap();

    assert_eq!(paths(catalog.assets_for_point(0.05, 0.1)), vec!["memory://a.tif"]);
    assert_eq!(
        paths(catalog.assets_for_point(0.2, 0.1)),
        vec!["memory://a.tif", "memory://b.tif"]
    );
    assert_eq!(paths(catalog.assets_for_point(0.4, 0.1)), vec!["memory://b.tif"]);
    assert!(catalog.assets_for_point(1.0, 1.0).is_empty());

    let east = Bounds::new(0.35, 0.0, 0.45, 0.1);
    assert_eq!(paths(catalog.assets_for_bbox(&east)), vec!["memory://b.tif"]);

    let far = Bounds::new(10.0, 10.0, 11.0, 11.0);
    assert!(catalog.assets_for_bbox(&far).is_empty());
}

#[tokio::test]
async fn test_tile_lookup_keeps_precedence() {
    let service = demo_service().await;
    let catalog = service.mosaics().get("demo").await.unwrap();

    let (x, y) = lonlat_to_mercator(0.2, 0.1);
    let tile = WebMercatorQuad.tile_for_point(x, y, catalog.quadkey_zoom());
    assert_eq!(
        paths(catalog.assets_for_tile(&tile)),
        vec!["memory://a.tif", "memory://b.tif"]
    );
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_create_without_overwrite_conflicts() {
    let service = demo_service().await;

    let result = service
        .create_mosaic(
            "demo",
            &["memory://b.tif".to_string()],
            &CreateOptions::default(),
            false,
        )
        .await;
    assert!(matches!(
        result,
        Err(ServiceError::Catalog(CatalogError::WriteConflict { .. }))
    ));

    // The original catalog is untouched
    let catalog = service.mosaics().get("demo").await.unwrap();
    assert_eq!(catalog.len(), 2);

    let replaced = service
        .create_mosaic(
            "demo",
            &["memory://b.tif".to_string()],
            &CreateOptions::default(),
            true,
        )
        .await
        .unwrap();
    assert_eq!(replaced.len(), 1);
}

#[tokio::test]
async fn test_partial_resolution_failure_reports_both_sides() {
    let test = memory_service(
        vec![("a.tif", asset_a()), ("junk.tif", b"not a tiff".to_vec())],
        ServiceConfig::default(),
    );

    let result = test
        .service
        .create_mosaic(
            "broken",
            &[
                "memory://a.tif".to_string(),
                "memory://junk.tif".to_string(),
                "memory://missing.tif".to_string(),
            ],
            &CreateOptions::default(),
            false,
        )
        .await;

    match result {
        Err(ServiceError::Catalog(CatalogError::PartialResolutionFailure { failed, resolved })) => {
            assert_eq!(resolved.len(), 1);
            assert_eq!(resolved[0].path, "memory://a.tif");
            assert_eq!(failed.len(), 2);
            assert!(failed
                .iter()
                .any(|e| matches!(e, AssetError::Unreadable { path, .. } if path == "memory://junk.tif")));
            assert!(failed
                .iter()
                .any(|e| matches!(e, AssetError::NotFound { path } if path == "memory://missing.tif")));
        }
        other => panic!("expected a partial failure, got {:?}", other.map(|c| c.len())),
    }

    // Nothing was written
    assert!(matches!(
        test.service.mosaics().get("broken").await,
        Err(CatalogError::NotFound(_))
    ));
}

// =============================================================================
// Updates
// =============================================================================

#[tokio::test]
async fn test_update_adds_first_and_skips_known_paths() {
    let test = memory_service(
        vec![
            ("a.tif", asset_a()),
            ("b.tif", asset_b()),
            (
                "c.tif",
                GeoTiffBuilder::lonlat(20, 20, 0.0, 20.0 * PIXEL).build(|_, _, _| 7),
            ),
        ],
        ServiceConfig::default(),
    );
    test.service
        .create_mosaic(
            "demo",
            &["memory://a.tif".to_string(), "memory://b.tif".to_string()],
            &CreateOptions::default(),
            false,
        )
        .await
        .unwrap();

    let (added, catalog) = test
        .service
        .update_mosaic(
            "demo",
            &["memory://b.tif".to_string(), "memory://c.tif".to_string()],
            true,
        )
        .await
        .unwrap();

    assert_eq!(added, 1);
    let order: Vec<&str> = catalog.assets().iter().map(|a| a.path.as_str()).collect();
    assert_eq!(
        order,
        vec!["memory://c.tif", "memory://a.tif", "memory://b.tif"]
    );
    assert_eq!(catalog.tiles(), &catalog.rebuild_index());
    assert_eq!(
        paths(catalog.assets_for_point(0.05, 0.1)),
        vec!["memory://c.tif", "memory://a.tif"]
    );

    // Readers see the new snapshot
    let reloaded = test.service.mosaics().get("demo").await.unwrap();
    assert_eq!(reloaded.fingerprint(), catalog.fingerprint());

    // Nothing new: no write, same snapshot
    let (added, unchanged) = test
        .service
        .update_mosaic("demo", &["memory://a.tif".to_string()], false)
        .await
        .unwrap();
    assert_eq!(added, 0);
    assert_eq!(unchanged.fingerprint(), catalog.fingerprint());
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_gzip_catalog_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().to_str().unwrap().to_string();

    let test = memory_service(
        vec![("a.tif", asset_a()), ("b.tif", asset_b())],
        ServiceConfig::default(),
    );
    let registry = MosaicRegistry::new(
        Arc::new(UrlStore::new(None)),
        Arc::new(PrefixPathResolver::new(Some(prefix))),
        Arc::new(WebMercatorQuad),
    );
    let service = StatisticsService::new(test.reader.clone(), Arc::new(registry), ServiceConfig::default());

    let created = service
        .create_mosaic(
            "demo.json.gz",
            &["memory://a.tif".to_string(), "memory://b.tif".to_string()],
            &CreateOptions {
                name: Some("demo".to_string()),
                ..CreateOptions::default()
            },
            false,
        )
        .await
        .unwrap();

    let bytes = std::fs::read(dir.path().join("demo.json.gz")).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

    service.mosaics().invalidate("demo.json.gz").await.unwrap();
    let loaded = service.mosaics().get("demo.json.gz").await.unwrap();
    assert_eq!(loaded.fingerprint(), created.fingerprint());
    assert_eq!(loaded.name(), Some("demo"));
    assert_eq!(loaded.assets(), created.assets());
    assert_eq!(loaded.tiles(), created.tiles());
}
