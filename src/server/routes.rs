//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                                       - Health check
//! /cog/info                                     - Asset metadata
//! /cog/statistics                               - Asset statistics (GET, POST)
//! /mosaic/{id}/info                             - Catalog summary
//! /mosaic/{id}/tiles/{z}/{x}/{y}/assets         - Assets for a tile
//! /mosaic/{id}/point/{lon},{lat}/assets         - Assets at a point
//! /mosaic/{id}/bbox/{minx},{miny},{maxx},{maxy}/assets
//! /mosaic/{id}/statistics                       - Mosaic statistics (GET, POST)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cog_mosaic::server::{create_router, RouterConfig};
//!
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//! let router = create_router(service, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{routing::get, Router};
use http::header::{AUTHORIZATION, CONTENT_TYPE, IF_NONE_MATCH};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    cog_feature_statistics_handler, cog_info_handler, cog_statistics_handler, health_handler,
    mosaic_bbox_assets_handler, mosaic_feature_statistics_handler, mosaic_info_handler,
    mosaic_point_assets_handler, mosaic_statistics_handler, mosaic_tile_assets_handler, AppState,
};
use crate::service::StatisticsService;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds for catalog responses
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// By default CORS allows any origin, catalog responses are cacheable
    /// for 60 seconds and tracing is enabled.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 60,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router with CORS and (optionally) request tracing.
pub fn create_router(service: StatisticsService, config: RouterConfig) -> Router {
    let app_state = AppState::with_cache_max_age(service, config.cache_max_age);
    let cors = build_cors_layer(&config);

    // `{coords}` and `{bbox}` capture a whole comma separated segment
    let mosaic_routes = Router::new()
        .route("/{id}/info", get(mosaic_info_handler))
        .route(
            "/{id}/tiles/{z}/{x}/{y}/assets",
            get(mosaic_tile_assets_handler),
        )
        .route("/{id}/point/{coords}/assets", get(mosaic_point_assets_handler))
        .route("/{id}/bbox/{bbox}/assets", get(mosaic_bbox_assets_handler))
        .route(
            "/{id}/statistics",
            get(mosaic_statistics_handler).post(mosaic_feature_statistics_handler),
        );

    let cog_routes = Router::new()
        .route("/info", get(cog_info_handler))
        .route(
            "/statistics",
            get(cog_statistics_handler).post(cog_feature_statistics_handler),
        );

    let router = Router::new()
        .route("/health", get(health_handler))
        .nest("/cog", cog_routes)
        .nest("/mosaic", mosaic_routes)
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, IF_NONE_MATCH])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
