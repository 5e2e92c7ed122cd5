//! Storage locations for assets and catalogs.
//!
//! Every path handled by the crate is one of:
//!
//! ```text
//! /data/scene.tif              local file (absolute or relative)
//! file:///data/scene.tif       local file URL
//! s3://bucket/key/scene.tif    object in S3 or an S3-compatible store
//! memory://name                in-process object
//! ```

use std::fmt;
use std::path::PathBuf;

use url::Url;

use crate::error::IoError;

/// A parsed storage location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// Path on the local filesystem
    Local(PathBuf),

    /// Object in an S3 bucket
    S3 { bucket: String, key: String },

    /// Key in an in-process store
    Memory(String),
}

impl Location {
    /// Parse a path or URL into a location.
    ///
    /// Strings without a scheme are treated as local paths.
    pub fn parse(input: &str) -> Result<Self, IoError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(IoError::InvalidLocation("empty location".to_string()));
        }

        if !trimmed.contains("://") {
            return Ok(Location::Local(PathBuf::from(trimmed)));
        }

        let url = Url::parse(trimmed)
            .map_err(|e| IoError::InvalidLocation(format!("{}: {}", trimmed, e)))?;

        match url.scheme() {
            "file" => url
                .to_file_path()
                .map(Location::Local)
                .map_err(|_| IoError::InvalidLocation(trimmed.to_string())),
            "s3" => {
                let bucket = url
                    .host_str()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| IoError::InvalidLocation(format!("{}: missing bucket", trimmed)))?
                    .to_string();
                let key = url.path().trim_start_matches('/').to_string();
                if key.is_empty() {
                    return Err(IoError::InvalidLocation(format!("{}: missing key", trimmed)));
                }
                Ok(Location::S3 { bucket, key })
            }
            "memory" => {
                let name = trimmed.trim_start_matches("memory://").to_string();
                if name.is_empty() {
                    return Err(IoError::InvalidLocation(format!("{}: missing name", trimmed)));
                }
                Ok(Location::Memory(name))
            }
            other => Err(IoError::InvalidLocation(format!(
                "unsupported scheme '{}' in {}",
                other, trimmed
            ))),
        }
    }

    /// Whether the location (by convention) holds gzip-compressed content.
    pub fn is_gzip(&self) -> bool {
        match self {
            Location::Local(path) => path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("gz"))
                .unwrap_or(false),
            Location::S3 { key, .. } => key.to_ascii_lowercase().ends_with(".gz"),
            Location::Memory(name) => name.to_ascii_lowercase().ends_with(".gz"),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::S3 { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
            Location::Memory(name) => write!(f, "memory://{}", name),
        }
    }
}
