//! Mosaic catalogs: creation, incremental updates, lookup and persistence.
//!
//! ```text
//!   MosaicRegistry ── PathResolver   (name -> location)
//!        │        └── CatalogStore   (bytes <-> location)
//!        ▼
//!   Arc<MosaicCatalog> ── assets (precedence order) + quadkey index
//!        │
//!        └── document (MosaicJSON 0.0.3, optional gzip)
//! ```

mod catalog;
pub mod document;
mod registry;
mod resolver;
mod store;

pub use catalog::{
    resolve_batch, CatalogSummary, CreateOptions, MosaicCatalog, DEFAULT_MAX_CONCURRENCY,
};
pub use document::{MosaicDocument, ZoomOverride, MOSAICJSON_VERSION};
pub use registry::{MosaicRegistry, DEFAULT_CATALOG_CACHE_CAPACITY};
pub use resolver::{PathResolver, PrefixPathResolver};
pub use store::{CatalogStore, FileStore, MemoryStore, S3Store, UrlStore};
