use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

use super::{LocalRangeReader, S3RangeReader};

/// Byte-range access to a raster file.
///
/// The GeoTIFF parser only ever asks for small, scattered ranges (headers,
/// IFDs, offset arrays, individual tiles), so a dataset never has to be
/// downloaded or read in full.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Identifier used in logs and error messages (`s3://bucket/key`, a path...).
    fn identifier(&self) -> &str;
}

/// Check a requested range against the resource size.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        }),
    }
}

// =============================================================================
// In-memory reader
// =============================================================================

/// A reader over bytes already held in memory.
#[derive(Debug, Clone)]
pub struct MemoryRangeReader {
    data: Bytes,
    identifier: String,
}

impl MemoryRangeReader {
    pub fn new(identifier: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

#[async_trait]
impl RangeReader for MemoryRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size())?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Location-dispatched reader
// =============================================================================

/// A reader for whichever backend a location resolved to.
pub enum AnyRangeReader {
    Local(LocalRangeReader),
    S3(S3RangeReader),
    Memory(MemoryRangeReader),
}

#[async_trait]
impl RangeReader for AnyRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        match self {
            AnyRangeReader::Local(r) => r.read_exact_at(offset, len).await,
            AnyRangeReader::S3(r) => r.read_exact_at(offset, len).await,
            AnyRangeReader::Memory(r) => r.read_exact_at(offset, len).await,
        }
    }

    fn size(&self) -> u64 {
        match self {
            AnyRangeReader::Local(r) => r.size(),
            AnyRangeReader::S3(r) => r.size(),
            AnyRangeReader::Memory(r) => r.size(),
        }
    }

    fn identifier(&self) -> &str {
        match self {
            AnyRangeReader::Local(r) => r.identifier(),
            AnyRangeReader::S3(r) => r.identifier(),
            AnyRangeReader::Memory(r) => r.identifier(),
        }
    }
}
