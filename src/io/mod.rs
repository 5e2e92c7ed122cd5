//! Byte-range I/O for raster assets and catalog documents.
//!
//! ```text
//!   Location::parse("s3://b/k.tif" | "/data/k.tif" | "memory://k")
//!                │
//!                ▼
//!   AnyRangeReader ── S3RangeReader | LocalRangeReader | MemoryRangeReader
//!                │
//!                ▼
//!   BlockCache<R>   (LRU blocks, shared in-flight fetches)
//! ```

mod block_cache;
mod local_reader;
mod location;
mod range_reader;
mod s3_reader;

pub use block_cache::{
    BlockCache, BlockCacheStats, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE,
};
pub use local_reader::LocalRangeReader;
pub use location::Location;
pub use range_reader::{AnyRangeReader, MemoryRangeReader, RangeReader};
pub use s3_reader::{create_s3_client, S3RangeReader};

pub(crate) use local_reader::map_io_error;
pub(crate) use s3_reader::classify_sdk_error;
