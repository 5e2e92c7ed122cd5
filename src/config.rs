//! Command-line configuration.
//!
//! Every option can also be set through an environment variable with the
//! `MOSAIC_` prefix:
//!
//! - `MOSAIC_HOST` - Server bind address (default: 0.0.0.0)
//! - `MOSAIC_PORT` - Server port (default: 3000)
//! - `MOSAIC_BACKEND` - Prefix turning short mosaic names into locations
//!   (e.g. `s3://bucket/mosaics`)
//! - `MOSAIC_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `MOSAIC_S3_REGION` - AWS region (default: us-east-1)
//! - `MOSAIC_CACHE_DATASETS` - Open datasets to cache (default: 256)
//! - `MOSAIC_CACHE_BLOCKS` - Blocks cached per dataset (default: 64)
//! - `MOSAIC_BLOCK_SIZE` - Block size in bytes (default: 256KiB)
//! - `MOSAIC_CACHE_CATALOGS` - Catalog snapshots to cache (default: 64)
//! - `MOSAIC_CONCURRENCY` - Concurrent asset reads per request (default: 8)
//! - `MOSAIC_TIMEOUT` - Statistics request deadline in seconds (default: 30)
//! - `MOSAIC_MAX_SIZE` - Default longest output side (default: 1024)
//! - `MOSAIC_CORS_ORIGINS` - Allowed CORS origins, comma separated
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use cog_mosaic::config::{Cli, Command};
//!
//! match Cli::parse().command {
//!     Command::Serve(config) => println!("listening on {}", config.bind_address()),
//!     _ => {}
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::io::{DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::mosaic::{CreateOptions, DEFAULT_CATALOG_CACHE_CAPACITY, DEFAULT_MAX_CONCURRENCY};
use crate::raster::DEFAULT_DATASET_CACHE_CAPACITY;
use crate::region::{DEFAULT_MAX_OUTPUT_SIZE, DEFAULT_MAX_SIZE};
use crate::service::{ServiceConfig, DEFAULT_READ_CONCURRENCY};
use crate::tile::MAX_QUADKEY_ZOOM;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default statistics request deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP cache max-age for catalog responses in seconds.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 60;

// =============================================================================
// CLI Arguments
// =============================================================================

/// cog-mosaic - Mosaic catalogs and raster statistics over cloud-optimized
/// GeoTIFFs.
#[derive(Parser, Debug, Clone)]
#[command(name = "cog-mosaic")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeConfig),

    /// Build a catalog from a list of assets
    Create(CreateConfig),

    /// Append assets to an existing catalog
    Update(UpdateConfig),

    /// Print a catalog summary as JSON
    Info(InfoConfig),
}

/// Storage options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Prefix turning short mosaic names into catalog locations.
    ///
    /// Full locations (`s3://`, `file://`, absolute paths) are used as is.
    #[arg(long, env = "MOSAIC_BACKEND")]
    pub backend: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "MOSAIC_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "MOSAIC_S3_REGION")]
    pub s3_region: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "MOSAIC_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "MOSAIC_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub storage: StorageArgs,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Maximum number of open datasets to keep in cache.
    #[arg(long, default_value_t = DEFAULT_DATASET_CACHE_CAPACITY, env = "MOSAIC_CACHE_DATASETS")]
    pub cache_datasets: usize,

    /// Maximum number of blocks to cache per dataset.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "MOSAIC_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Block size in bytes for the block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "MOSAIC_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of catalog snapshots to keep in cache.
    #[arg(long, default_value_t = DEFAULT_CATALOG_CACHE_CAPACITY, env = "MOSAIC_CACHE_CATALOGS")]
    pub cache_catalogs: usize,

    /// HTTP Cache-Control max-age for catalog responses in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "MOSAIC_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // Request Limits
    // =========================================================================
    /// Concurrent asset reads per statistics request.
    #[arg(long, default_value_t = DEFAULT_READ_CONCURRENCY, env = "MOSAIC_CONCURRENCY")]
    pub concurrency: usize,

    /// Statistics request deadline in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "MOSAIC_TIMEOUT")]
    pub timeout: u64,

    /// Longest output side when a request does not specify a size.
    #[arg(long, default_value_t = DEFAULT_MAX_SIZE, env = "MOSAIC_MAX_SIZE")]
    pub max_size: usize,

    /// Largest output side (width, height or max_size) a request may ask for.
    #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT_SIZE, env = "MOSAIC_MAX_OUTPUT_SIZE")]
    pub max_output_size: usize,

    // =========================================================================
    // CORS / Tracing
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "MOSAIC_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_datasets == 0 {
            return Err("cache_datasets must be greater than 0".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.cache_catalogs == 0 {
            return Err("cache_catalogs must be greater than 0".to_string());
        }
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".to_string());
        }
        if self.timeout == 0 {
            return Err("timeout must be greater than 0".to_string());
        }
        if self.max_size == 0 {
            return Err("max_size must be greater than 0".to_string());
        }
        if self.max_size > self.max_output_size {
            return Err("max_size must not exceed max_output_size".to_string());
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            max_concurrency: self.concurrency,
            request_timeout: Duration::from_secs(self.timeout),
            default_max_size: self.max_size,
            max_output_size: self.max_output_size,
            ..ServiceConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CreateConfig {
    /// Catalog name or location.
    pub mosaic: String,

    /// File listing asset locations, one per line (`-` for stdin).
    pub list: PathBuf,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Replace an existing catalog.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// Fixed minimum zoom (derived from the assets when omitted).
    #[arg(long)]
    pub minzoom: Option<u8>,

    /// Fixed maximum zoom (derived from the assets when omitted).
    #[arg(long)]
    pub maxzoom: Option<u8>,

    /// Zoom of the quadkey index (defaults to minzoom).
    #[arg(long)]
    pub quadkey_zoom: Option<u8>,

    /// Catalog display name.
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// Concurrent footprint resolutions.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub concurrency: usize,
}

impl CreateConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, zoom) in [
            ("minzoom", self.minzoom),
            ("maxzoom", self.maxzoom),
            ("quadkey_zoom", self.quadkey_zoom),
        ] {
            if zoom.is_some_and(|z| z > MAX_QUADKEY_ZOOM) {
                return Err(format!("{} must be at most {}", name, MAX_QUADKEY_ZOOM));
            }
        }
        if let (Some(min), Some(max)) = (self.minzoom, self.maxzoom) {
            if min > max {
                return Err("minzoom must not exceed maxzoom".to_string());
            }
        }
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn create_options(&self) -> CreateOptions {
        CreateOptions {
            name: self.name.clone(),
            description: self.description.clone(),
            minzoom: self.minzoom,
            maxzoom: self.maxzoom,
            quadkey_zoom: self.quadkey_zoom,
            max_concurrency: self.concurrency,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct UpdateConfig {
    /// Catalog name or location.
    pub mosaic: String,

    /// File listing asset locations, one per line (`-` for stdin).
    pub list: PathBuf,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Give the new assets precedence over existing ones.
    #[arg(long, default_value_t = false)]
    pub add_first: bool,

    /// Concurrent footprint resolutions.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub concurrency: usize,
}

#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Catalog name or location.
    pub mosaic: String,

    #[command(flatten)]
    pub storage: StorageArgs,
}

/// Parse an asset list: one location per line, blank lines and `#`
/// comments ignored.
pub fn parse_asset_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Read an asset list from a file, or stdin when `path` is `-`.
pub fn read_asset_list(path: &Path) -> std::io::Result<Vec<String>> {
    let content = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path)?
    };
    Ok(parse_asset_list(&content))
}

// =============================================================================
// Tests
// =============================================================================
