//! cog-mosaic - mosaic catalogs and raster statistics over cloud-optimized
//! GeoTIFFs.
//!
//! This binary starts the HTTP server or runs one catalog command.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cog_mosaic::{
    config::{
        read_asset_list, Cli, Command, CreateConfig, InfoConfig, ServeConfig, StorageArgs,
        UpdateConfig,
    },
    create_s3_client,
    io::{DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE},
    mosaic::{MosaicRegistry, PrefixPathResolver, UrlStore, DEFAULT_CATALOG_CACHE_CAPACITY},
    raster::{CogRasterReader, UrlAssetSource, DEFAULT_DATASET_CACHE_CAPACITY},
    server::{create_router, RouterConfig},
    service::{ServiceConfig, StatisticsService},
    tile::WebMercatorQuad,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => run_serve(config).await,
        Command::Create(config) => run_create(config).await,
        Command::Update(config) => run_update(config).await,
        Command::Info(config) => run_info(config).await,
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// Cache sizes for the raster and catalog layers.
struct CacheSizes {
    datasets: usize,
    block_size: usize,
    blocks: usize,
    catalogs: usize,
}

impl Default for CacheSizes {
    fn default() -> Self {
        Self {
            datasets: DEFAULT_DATASET_CACHE_CAPACITY,
            block_size: DEFAULT_BLOCK_SIZE,
            blocks: DEFAULT_BLOCK_CACHE_CAPACITY,
            catalogs: DEFAULT_CATALOG_CACHE_CAPACITY,
        }
    }
}

async fn build_service(
    storage: &StorageArgs,
    caches: CacheSizes,
    config: ServiceConfig,
) -> StatisticsService {
    let s3_client = create_s3_client(storage.s3_endpoint.as_deref(), &storage.s3_region).await;

    let reader = CogRasterReader::with_capacity(
        UrlAssetSource::new(Some(s3_client.clone())),
        caches.datasets,
        caches.block_size,
        caches.blocks,
    );
    let mosaics = MosaicRegistry::with_capacity(
        Arc::new(UrlStore::new(Some(s3_client))),
        Arc::new(PrefixPathResolver::new(storage.backend.clone())),
        Arc::new(WebMercatorQuad),
        caches.catalogs,
    );

    StatisticsService::new(Arc::new(reader), Arc::new(mosaics), config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "cog_mosaic=debug,tower_http=debug"
    } else {
        "cog_mosaic=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: cannot encode output: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.storage.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("cog-mosaic v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    match config.storage.backend {
        Some(ref backend) => info!("  Catalog backend: {}", backend),
        None => info!("  Catalog backend: none (mosaic ids must be full locations)"),
    }
    if let Some(ref endpoint) = config.storage.s3_endpoint {
        info!("  S3 endpoint: {}", endpoint);
    }
    info!("  S3 region: {}", config.storage.s3_region);
    info!(
        "  Cache: {} datasets, {} blocks/dataset of {}KiB, {} catalogs",
        config.cache_datasets,
        config.cache_blocks,
        config.block_size / 1024,
        config.cache_catalogs
    );
    info!(
        "  Requests: {} concurrent reads, {}s timeout, max size {}",
        config.concurrency, config.timeout, config.max_size
    );

    let caches = CacheSizes {
        datasets: config.cache_datasets,
        block_size: config.block_size,
        blocks: config.cache_blocks,
        catalogs: config.cache_catalogs,
    };
    let service = build_service(&config.storage, caches, config.service_config()).await;

    let router = create_router(service, build_router_config(&config));

    let addr = config.bind_address();
    info!("Server listening on: http://{}", addr);
    info!("  curl http://{}/health", addr);
    info!("  curl 'http://{}/cog/statistics?url=<location>'", addr);
    info!("  curl http://{}/mosaic/<id>/info", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Build RouterConfig from the ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_cache_max_age(config.cache_max_age);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Catalog Commands
// =============================================================================

async fn run_create(config: CreateConfig) -> ExitCode {
    init_logging(config.storage.verbose);

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let paths = match read_asset_list(&config.list) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", config.list.display(), e);
            return ExitCode::FAILURE;
        }
    };
    info!("Resolving {} asset(s)", paths.len());

    let service = build_service(&config.storage, CacheSizes::default(), ServiceConfig::default()).await;
    match service
        .create_mosaic(&config.mosaic, &paths, &config.create_options(), config.overwrite)
        .await
    {
        Ok(catalog) => print_json(&catalog.summary()),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_update(config: UpdateConfig) -> ExitCode {
    init_logging(config.storage.verbose);

    if config.concurrency == 0 {
        eprintln!("Error: concurrency must be greater than 0");
        return ExitCode::FAILURE;
    }

    let paths = match read_asset_list(&config.list) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", config.list.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let service_config = ServiceConfig {
        footprint_concurrency: config.concurrency,
        ..ServiceConfig::default()
    };
    let service = build_service(&config.storage, CacheSizes::default(), service_config).await;
    match service
        .update_mosaic(&config.mosaic, &paths, config.add_first)
        .await
    {
        Ok((added, catalog)) => {
            info!("Added {} new asset(s) to {}", added, config.mosaic);
            print_json(&catalog.summary())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_info(config: InfoConfig) -> ExitCode {
    init_logging(config.storage.verbose);

    let service = build_service(&config.storage, CacheSizes::default(), ServiceConfig::default()).await;
    match service.mosaics().get(&config.mosaic).await {
        Ok(catalog) => print_json(&catalog.summary()),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
