//! HTTP adapter over the statistics service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │      /cog/{info,statistics}     /mosaic/{id}/{info,...}         │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (query parsing, errors)  │  │  (router, CORS, tracing)    │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 ▼
//!                        StatisticsService
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, AppState, AssetQueryParams, ErrorResponse, HealthResponse,
    StatisticsQueryParams, TileAssetsPath,
};
pub use routes::{create_router, RouterConfig};
