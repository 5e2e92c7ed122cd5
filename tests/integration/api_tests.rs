//! HTTP API integration tests.
//!
//! Tests verify:
//! - Asset info and statistics endpoints (query and GeoJSON bodies)
//! - Catalog info with ETag revalidation and asset lookups
//! - Mosaic statistics in both merge modes
//! - Error mapping to status codes and JSON error bodies

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use cog_mosaic::geo::lonlat_to_mercator;
use cog_mosaic::service::ServiceConfig;
use cog_mosaic::tile::{TileMatrixSet, WebMercatorQuad};
use cog_mosaic::{create_router, RouterConfig};

use super::test_utils::{
    asset_a, assert_close, demo_service, get, memory_service, post_json, PIXEL,
};

fn router_for(service: cog_mosaic::StatisticsService) -> Router {
    create_router(service, RouterConfig::new().with_tracing(false))
}

async fn demo_router() -> Router {
    router_for(demo_service().await)
}

fn polygon_feature(name: &str, west: f64, east: f64) -> Value {
    json!({
        "type": "Feature",
        "properties": { "name": name },
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [west, 0.0], [east, 0.0], [east, 20.0 * PIXEL], [west, 20.0 * PIXEL], [west, 0.0]
            ]]
        }
    })
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (status, body) = get(demo_router().await, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// Single Asset Endpoints
// =============================================================================

#[tokio::test]
async fn test_cog_info() {
    let (status, body) = get(demo_router().await, "/cog/info?url=memory://a.tif").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "memory://a.tif");
    assert_eq!(body["width"], 20);
    assert_eq!(body["height"], 20);
    assert_eq!(body["band_count"], 1);
}

#[tokio::test]
async fn test_cog_statistics_query_parameters() {
    let router = demo_router().await;

    let (status, body) = get(router.clone(), "/cog/statistics?url=memory://a.tif").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["b1"]["count"], 400);
    assert_eq!(body["b1"]["max"], 20.0);
    assert!(body["b1"]["percentile_98"].is_number());

    let (status, body) = get(
        router.clone(),
        "/cog/statistics?url=memory://a.tif&bbox=0,0,0.15625,0.3125&percentiles=50",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["b1"]["count"], 200);
    assert!(body["b1"]["percentile_50"].is_number());
    assert!(body["b1"].get("percentile_98").is_none());

    let (status, body) = get(
        router,
        "/cog/statistics?url=memory://a.tif&expression=b1*2&histogram_bins=4",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["b1*2"]["max"], 40.0);
    assert_eq!(body["b1*2"]["histogram"][0].as_array().unwrap().len(), 4);
    assert_eq!(body["b1*2"]["histogram"][1].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_cog_statistics_per_feature() {
    let collection = json!({
        "type": "FeatureCollection",
        "features": [
            polygon_feature("west", 0.0, 10.0 * PIXEL),
            polygon_feature("east", 10.0 * PIXEL, 20.0 * PIXEL),
        ]
    });

    let (status, body) = post_json(
        demo_router().await,
        "/cog/statistics?url=memory://a.tif",
        &collection,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "FeatureCollection");

    let features = body["features"].as_array().unwrap();
    assert_eq!(features.len(), 2);
    assert_eq!(features[0]["properties"]["name"], "west");
    assert_eq!(features[0]["properties"]["statistics"]["b1"]["count"], 200);
    assert_close(
        features[0]["properties"]["statistics"]["b1"]["sum"]
            .as_f64()
            .unwrap(),
        1100.0,
    );
    assert_eq!(features[1]["properties"]["statistics"]["b1"]["min"], 11.0);
}

#[tokio::test]
async fn test_cog_errors() {
    let test = memory_service(
        vec![("a.tif", asset_a()), ("junk.tif", b"GIF89a".to_vec())],
        ServiceConfig::default(),
    );
    let router = router_for(test.service);

    let (status, body) = get(router.clone(), "/cog/statistics?url=memory://missing.tif").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["status"], 404);

    let (status, body) = get(router.clone(), "/cog/statistics?url=memory://junk.tif").await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error"], "unreadable_asset");

    let (status, body) = get(
        router.clone(),
        "/cog/statistics?url=memory://a.tif&expression=(b1",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_expression");

    let (status, body) = get(router.clone(), "/cog/statistics?url=memory://a.tif&bidx=3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = get(
        router.clone(),
        "/cog/statistics?url=memory://a.tif&bbox=10,10,11,11",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "empty_region");

    let (status, _) = get(router, "/cog/statistics").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cog_statistics_output_limits() {
    let router = demo_router().await;

    let (status, body) = get(
        router.clone(),
        "/cog/statistics?url=memory://a.tif&width=200000&height=200000",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_size");

    let (status, body) = get(
        router.clone(),
        "/cog/statistics?url=memory://a.tif&max_size=1000000",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_size");

    let (status, body) = get(
        router.clone(),
        "/cog/statistics?url=memory://a.tif&histogram_bins=4000000000000",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = get(
        router.clone(),
        "/mosaic/demo/statistics?width=200000&height=200000&merge=true",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_size");

    let nested = format!("{}b1{}", "(".repeat(200), ")".repeat(200));
    let (status, body) = get(
        router,
        &format!("/cog/statistics?url=memory://a.tif&expression={}", nested),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_expression");
}

// =============================================================================
// Catalog Endpoints
// =============================================================================

#[tokio::test]
async fn test_mosaic_info_and_etag() {
    let router = demo_router().await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/mosaic/demo/info")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::CACHE_CONTROL));
    let etag = response
        .headers()
        .get(header::ETAG)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let (status, body) = get(router.clone(), "/mosaic/demo/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assetCount"], 2);
    assert_eq!(format!("\"{}\"", body["fingerprint"].as_str().unwrap()), etag);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/mosaic/demo/info")
                .header(header::IF_NONE_MATCH, &etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_mosaic_asset_lookups() {
    let service = demo_service().await;
    let zoom = service.mosaics().get("demo").await.unwrap().quadkey_zoom();
    let router = router_for(service);

    let (status, body) = get(router.clone(), "/mosaic/demo/point/0.2,0.1/assets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["memory://a.tif", "memory://b.tif"]));

    let (status, body) = get(router.clone(), "/mosaic/demo/bbox/0.35,0,0.45,0.1/assets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["memory://b.tif"]));

    let (x, y) = lonlat_to_mercator(0.2, 0.1);
    let tile = WebMercatorQuad.tile_for_point(x, y, zoom);
    let (status, body) = get(
        router.clone(),
        &format!("/mosaic/demo/tiles/{}/{}/{}/assets", tile.z, tile.x, tile.y),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["memory://a.tif", "memory://b.tif"]));

    // x out of range at zoom 1
    let (status, _) = get(router.clone(), "/mosaic/demo/tiles/1/5/0/assets").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(router.clone(), "/mosaic/demo/point/0.2/assets").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(router, "/mosaic/missing/info").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "mosaic_not_found");
}

// =============================================================================
// Mosaic Statistics
// =============================================================================

#[tokio::test]
async fn test_mosaic_statistics_modes() {
    let router = demo_router().await;

    let (status, body) = get(router.clone(), "/mosaic/demo/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "per_asset");
    assert_eq!(body["assets"][0]["asset"], "memory://a.tif");
    assert_eq!(body["assets"][1]["statistics"]["b1"]["mean"], 50.0);
    assert_eq!(body["skipped"], json!([]));

    let (status, body) = get(router.clone(), "/mosaic/demo/statistics?merge=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "merged");
    assert_eq!(body["merged"]["b1"]["count"], 600);
    assert_eq!(body["contributing"], json!(["memory://a.tif", "memory://b.tif"]));

    let (status, body) = get(router, "/mosaic/demo/statistics?bbox=5,5,6,6").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "empty_region");
}

#[tokio::test]
async fn test_mosaic_statistics_geojson_body() {
    let (status, body) = post_json(
        demo_router().await,
        "/mosaic/demo/statistics",
        &polygon_feature("east", 22.0 * PIXEL, 30.0 * PIXEL),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let assets = body["assets"].as_array().unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0]["asset"], "memory://b.tif");
    assert_eq!(assets[0]["statistics"]["b1"]["count"], 160);
}
