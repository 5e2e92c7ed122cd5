//! HTTP request handlers for the statistics and mosaic API.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /cog/info?url=` - Asset metadata
//! - `GET /cog/statistics?url=&bbox=...` - Asset statistics
//! - `POST /cog/statistics?url=` - Asset statistics per GeoJSON feature
//! - `GET /mosaic/{id}/info` - Catalog summary
//! - `GET /mosaic/{id}/tiles/{z}/{x}/{y}/assets` - Assets for a tile
//! - `GET /mosaic/{id}/point/{lon},{lat}/assets` - Assets at a point
//! - `GET /mosaic/{id}/bbox/{minx},{miny},{maxx},{maxy}/assets` - Assets in a box
//! - `GET /mosaic/{id}/statistics?bbox=&merge=...` - Mosaic statistics
//! - `POST /mosaic/{id}/statistics` - Mosaic statistics over a GeoJSON body

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{AssetError, CatalogError, IoError, RegionError, ServiceError};
use crate::geo::{features, Bounds, Crs, Geometry};
use crate::region::{OutputSize, RegionSpec};
use crate::service::{
    AssetInfo, MergeMode, MosaicStatistics, StatisticsRequest, StatisticsService,
};
use crate::stats::{Expression, StatisticsMap, StatisticsOptions, MAX_HISTOGRAM_BINS};
use crate::tile::Tile;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the statistics service.
pub struct AppState {
    pub service: Arc<StatisticsService>,

    /// Cache-Control max-age for catalog responses, in seconds
    pub cache_max_age: u32,
}

impl AppState {
    pub fn new(service: StatisticsService) -> Self {
        Self::with_cache_max_age(service, 60)
    }

    pub fn with_cache_max_age(service: StatisticsService, cache_max_age: u32) -> Self {
        Self {
            service: Arc::new(service),
            cache_max_age,
        }
    }
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters naming a single asset.
#[derive(Debug, Deserialize)]
pub struct AssetQueryParams {
    pub url: String,
}

/// Query parameters shared by the statistics endpoints.
///
/// List values are comma separated (`bidx=1,3`, `percentiles=5,50,95`).
#[derive(Debug, Default, Deserialize)]
pub struct StatisticsQueryParams {
    /// Asset location (`/cog` endpoints only)
    #[serde(default)]
    pub url: Option<String>,

    /// `minx,miny,maxx,maxy` in `coord_crs`
    #[serde(default)]
    pub bbox: Option<String>,

    /// CRS of `bbox` or of the GeoJSON body (default EPSG:4326)
    #[serde(default)]
    pub coord_crs: Option<String>,

    /// Band-math expressions separated by `;`
    #[serde(default)]
    pub expression: Option<String>,

    /// 1-based band indexes
    #[serde(default)]
    pub bidx: Option<String>,

    #[serde(default)]
    pub max_size: Option<usize>,
    #[serde(default)]
    pub width: Option<usize>,
    #[serde(default)]
    pub height: Option<usize>,

    #[serde(default)]
    pub percentiles: Option<String>,

    #[serde(default)]
    pub histogram_bins: Option<usize>,

    /// `min,max`
    #[serde(default)]
    pub histogram_range: Option<String>,

    #[serde(default)]
    pub categorical: Option<bool>,

    /// Category values to report in categorical mode
    #[serde(default)]
    pub categories: Option<String>,

    /// Merge mosaic assets into a single result (`/mosaic` endpoints only)
    #[serde(default)]
    pub merge: Option<bool>,
}

impl StatisticsQueryParams {
    fn crs(&self) -> Result<Crs, ServiceError> {
        match &self.coord_crs {
            Some(crs) => Ok(Crs::parse(crs)?),
            None => Ok(Crs::WGS84),
        }
    }

    fn region(&self) -> Result<RegionSpec, ServiceError> {
        match &self.bbox {
            Some(bbox) => Ok(RegionSpec::Bbox {
                bounds: Bounds::parse(bbox)?,
                crs: self.crs()?,
            }),
            None => Ok(RegionSpec::Whole),
        }
    }

    fn merge_mode(&self) -> MergeMode {
        if self.merge.unwrap_or(false) {
            MergeMode::Merged
        } else {
            MergeMode::PerAsset
        }
    }

    /// Build a statistics request over `region`.
    pub fn to_request(&self, region: RegionSpec) -> Result<StatisticsRequest, ServiceError> {
        let size = match (self.width, self.height, self.max_size) {
            (Some(width), Some(height), _) => Some(OutputSize::Exact { width, height }),
            (Some(_), None, _) | (None, Some(_), _) => {
                return Err(invalid("width and height must be given together"))
            }
            (None, None, Some(max)) => Some(OutputSize::MaxSize(max)),
            (None, None, None) => None,
        };

        let expressions = match &self.expression {
            Some(text) => Expression::parse_list(text, &Default::default())?,
            None => Vec::new(),
        };

        let mut options = StatisticsOptions::default();
        if let Some(percentiles) = &self.percentiles {
            options.percentiles = parse_list("percentiles", percentiles)?;
            if options.percentiles.iter().any(|p| !(0.0..=100.0).contains(p)) {
                return Err(invalid("percentiles must be between 0 and 100"));
            }
        }
        if let Some(bins) = self.histogram_bins {
            if bins == 0 || bins > MAX_HISTOGRAM_BINS {
                return Err(invalid(format!(
                    "histogram_bins must be between 1 and {}",
                    MAX_HISTOGRAM_BINS
                )));
            }
            options.histogram_bins = bins;
        }
        if let Some(range) = &self.histogram_range {
            match parse_list::<f64>("histogram_range", range)?.as_slice() {
                [lo, hi] if lo < hi => options.histogram_range = Some((*lo, *hi)),
                _ => return Err(invalid("histogram_range must be 'min,max' with min < max")),
            }
        }
        options.categorical = self.categorical.unwrap_or(false);
        if let Some(categories) = &self.categories {
            options.categories = Some(parse_list("categories", categories)?);
        }

        let bands = match &self.bidx {
            Some(bidx) => Some(parse_list("bidx", bidx)?),
            None => None,
        };

        Ok(StatisticsRequest {
            region,
            size,
            bands,
            expressions,
            options,
        })
    }
}

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::InvalidRequest(message.into())
}

fn parse_list<T: FromStr>(name: &str, value: &str) -> Result<Vec<T>, ServiceError> {
    value
        .split(',')
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| invalid(format!("invalid value '{}' in {}", v, name)))
        })
        .collect()
}

/// Path parameters for tile asset lookups.
#[derive(Debug, Deserialize)]
pub struct TileAssetsPath {
    pub id: String,
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "empty_region")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

fn io_status(err: &IoError) -> (StatusCode, &'static str) {
    match err {
        IoError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        IoError::Connection(_) => (StatusCode::BAD_GATEWAY, "connection_error"),
        IoError::InvalidLocation(_) => (StatusCode::BAD_REQUEST, "invalid_location"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
    }
}

/// Convert ServiceError to HTTP response.
///
/// 5xx are logged at ERROR, 404 at DEBUG and other 4xx at WARN.
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ServiceError::Asset(AssetError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            ServiceError::Asset(AssetError::Unreadable { .. }) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unreadable_asset")
            }

            ServiceError::Catalog(err) => match err {
                CatalogError::NotFound(_) => (StatusCode::NOT_FOUND, "mosaic_not_found"),
                CatalogError::WriteConflict { .. } => (StatusCode::CONFLICT, "write_conflict"),
                CatalogError::PartialResolutionFailure { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "partial_resolution_failure",
                ),
                CatalogError::InvalidName(_) => (StatusCode::BAD_REQUEST, "invalid_name"),
                CatalogError::InvalidZoom(_) | CatalogError::Empty => {
                    (StatusCode::BAD_REQUEST, "invalid_catalog")
                }
                CatalogError::Document(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_catalog"),
                CatalogError::Store(io) => io_status(io),
            },

            ServiceError::Region(RegionError::EmptyRegion) => {
                (StatusCode::NOT_FOUND, "empty_region")
            }
            ServiceError::Region(RegionError::Geometry(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_geometry")
            }
            ServiceError::Region(RegionError::InvalidSize(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_size")
            }

            ServiceError::Expression(_) => (StatusCode::BAD_REQUEST, "invalid_expression"),
            ServiceError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ServiceError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            ServiceError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle health check requests.
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Asset metadata with its footprint and zoom range.
///
/// `GET /cog/info?url={location}`
pub async fn cog_info_handler(
    State(state): State<AppState>,
    Query(query): Query<AssetQueryParams>,
) -> Result<Json<AssetInfo>, ServiceError> {
    Ok(Json(state.service.asset_info(&query.url).await?))
}

/// Statistics of one asset over a bbox or its whole extent.
///
/// `GET /cog/statistics?url={location}&bbox=&expression=&bidx=&...`
///
/// # Response
///
/// `200 OK` with a JSON object keyed by band (`b1`, ...) or expression.
pub async fn cog_statistics_handler(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQueryParams>,
) -> Result<Json<StatisticsMap>, ServiceError> {
    let url = query.url.as_deref().ok_or_else(|| invalid("missing 'url'"))?;
    let request = query.to_request(query.region()?)?;
    Ok(Json(state.service.asset_statistics(url, &request).await?))
}

/// Statistics of one asset for each feature of a GeoJSON body.
///
/// `POST /cog/statistics?url={location}`
///
/// The body is a Feature, a FeatureCollection or a bare geometry. The
/// response echoes it with `properties.statistics` set on every feature.
pub async fn cog_feature_statistics_handler(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQueryParams>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ServiceError> {
    let url = query.url.as_deref().ok_or_else(|| invalid("missing 'url'"))?;
    let crs = query.crs()?;

    let kind = body.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "FeatureCollection" => {
            let mut annotated = Vec::new();
            for feature in features(&body)? {
                annotated.push(feature_statistics(&state, url, &query, crs, feature.clone()).await?);
            }
            let mut collection = body.clone();
            collection["features"] = Value::Array(annotated);
            Ok(Json(collection))
        }
        "Feature" => Ok(Json(feature_statistics(&state, url, &query, crs, body).await?)),
        _ => {
            let feature = json!({ "type": "Feature", "geometry": body, "properties": {} });
            Ok(Json(feature_statistics(&state, url, &query, crs, feature).await?))
        }
    }
}

async fn feature_statistics(
    state: &AppState,
    url: &str,
    query: &StatisticsQueryParams,
    crs: Crs,
    mut feature: Value,
) -> Result<Value, ServiceError> {
    let geometry = Geometry::from_geojson(&feature)?;
    let request = query.to_request(RegionSpec::Geometry { geometry, crs })?;
    let statistics = state.service.asset_statistics(url, &request).await?;

    let statistics = serde_json::to_value(&statistics)
        .map_err(|e| invalid(format!("cannot encode statistics: {}", e)))?;
    if !feature.get("properties").is_some_and(Value::is_object) {
        feature["properties"] = json!({});
    }
    feature["properties"]["statistics"] = statistics;
    Ok(feature)
}

/// Catalog summary.
///
/// `GET /mosaic/{id}/info`
///
/// Responds with an `ETag` derived from the catalog content and honours
/// `If-None-Match`.
pub async fn mosaic_info_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let catalog = state.service.mosaics().get(&id).await?;
    let etag = format!("\"{}\"", catalog.fingerprint());
    let cache_control = format!("public, max-age={}", state.cache_max_age);

    let matches = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag));
    if matches {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::ETAG, etag), (header::CACHE_CONTROL, cache_control)],
        )
            .into_response());
    }

    Ok((
        [(header::ETAG, etag), (header::CACHE_CONTROL, cache_control)],
        Json(catalog.summary()),
    )
        .into_response())
}

/// Assets intersecting a tile, in precedence order.
///
/// `GET /mosaic/{id}/tiles/{z}/{x}/{y}/assets`
pub async fn mosaic_tile_assets_handler(
    State(state): State<AppState>,
    Path(path): Path<TileAssetsPath>,
) -> Result<Json<Vec<String>>, ServiceError> {
    let tile = Tile::new(path.x, path.y, path.z).map_err(|e| invalid(e.to_string()))?;
    let catalog = state.service.mosaics().get(&path.id).await?;
    Ok(Json(paths(catalog.assets_for_tile(&tile))))
}

/// Assets containing a point.
///
/// `GET /mosaic/{id}/point/{lon},{lat}/assets`
pub async fn mosaic_point_assets_handler(
    State(state): State<AppState>,
    Path((id, coords)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ServiceError> {
    let (lon, lat) = match parse_list::<f64>("point", &coords)?.as_slice() {
        [lon, lat] => (*lon, *lat),
        _ => return Err(invalid(format!("point '{}' must be 'lon,lat'", coords))),
    };
    let catalog = state.service.mosaics().get(&id).await?;
    Ok(Json(paths(catalog.assets_for_point(lon, lat))))
}

/// Assets intersecting a lon/lat box.
///
/// `GET /mosaic/{id}/bbox/{minx},{miny},{maxx},{maxy}/assets`
pub async fn mosaic_bbox_assets_handler(
    State(state): State<AppState>,
    Path((id, bbox)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ServiceError> {
    let bounds = Bounds::parse(&bbox)?;
    let catalog = state.service.mosaics().get(&id).await?;
    Ok(Json(paths(catalog.assets_for_bbox(&bounds))))
}

fn paths(assets: Vec<&crate::asset::Asset>) -> Vec<String> {
    assets.into_iter().map(|a| a.path.clone()).collect()
}

/// Mosaic statistics over a bbox or the whole catalog.
///
/// `GET /mosaic/{id}/statistics?bbox=&merge=&expression=&...`
///
/// # Response
///
/// - `200 OK`: per-asset or merged statistics plus the skipped assets
/// - `404 Not Found`: mosaic missing or region outside every asset
/// - `504 Gateway Timeout`: no asset finished before the deadline
pub async fn mosaic_statistics_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StatisticsQueryParams>,
) -> Result<Json<MosaicStatistics>, ServiceError> {
    let request = query.to_request(query.region()?)?;
    run_mosaic_statistics(&state, &id, &request, query.merge_mode()).await
}

/// Mosaic statistics over the geometry of a GeoJSON body.
///
/// `POST /mosaic/{id}/statistics?merge=&...`
///
/// Feature collections are combined into one multi-polygon region.
pub async fn mosaic_feature_statistics_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StatisticsQueryParams>,
    Json(body): Json<Value>,
) -> Result<Json<MosaicStatistics>, ServiceError> {
    let region = RegionSpec::Geometry {
        geometry: Geometry::from_geojson(&body)?,
        crs: query.crs()?,
    };
    let request = query.to_request(region)?;
    run_mosaic_statistics(&state, &id, &request, query.merge_mode()).await
}

async fn run_mosaic_statistics(
    state: &AppState,
    id: &str,
    request: &StatisticsRequest,
    mode: MergeMode,
) -> Result<Json<MosaicStatistics>, ServiceError> {
    // Dropping the handler future (client went away) cancels the fan-out
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let result = state
        .service
        .mosaic_statistics(id, request, mode, cancel)
        .await?;
    Ok(Json(result))
}
