//! Asset sources: turning an asset path into a range reader.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::error::IoError;
use crate::io::{AnyRangeReader, LocalRangeReader, Location, MemoryRangeReader, S3RangeReader};

/// Creates range readers for asset paths.
///
/// Lets the raster registry work with different storage backends without
/// being tied to a specific implementation.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// The type of range reader this source creates.
    type Reader: crate::io::RangeReader + 'static;

    async fn create_reader(&self, path: &str) -> Result<Self::Reader, IoError>;
}

/// Source that dispatches on the path's scheme: local paths and `file://`,
/// `s3://bucket/key` and `memory://name`.
///
/// `s3://` paths need a client; without one they are rejected.
#[derive(Default)]
pub struct UrlAssetSource {
    s3: Option<Client>,
    memory: RwLock<HashMap<String, Bytes>>,
}

impl UrlAssetSource {
    pub fn new(s3: Option<Client>) -> Self {
        Self {
            s3,
            memory: RwLock::new(HashMap::new()),
        }
    }

    /// Register bytes served for `memory://{name}`.
    pub fn insert_memory(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        if let Ok(mut memory) = self.memory.write() {
            memory.insert(name.into(), data.into());
        }
    }
}

#[async_trait]
impl AssetSource for UrlAssetSource {
    type Reader = AnyRangeReader;

    async fn create_reader(&self, path: &str) -> Result<Self::Reader, IoError> {
        match Location::parse(path)? {
            Location::Local(file) => Ok(AnyRangeReader::Local(LocalRangeReader::open(file).await?)),
            Location::S3 { bucket, key } => {
                let client = self.s3.clone().ok_or_else(|| {
                    IoError::InvalidLocation(format!("{}: S3 access is not configured", path))
                })?;
                Ok(AnyRangeReader::S3(S3RangeReader::new(client, bucket, key).await?))
            }
            Location::Memory(name) => {
                let data = self
                    .memory
                    .read()
                    .ok()
                    .and_then(|memory| memory.get(&name).cloned())
                    .ok_or_else(|| IoError::NotFound(path.to_string()))?;
                Ok(AnyRangeReader::Memory(MemoryRangeReader::new(path, data)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::RangeReader;

    #[tokio::test]
    async fn test_memory_objects() {
        let source = UrlAssetSource::new(None);
        source.insert_memory("a.tif", vec![1u8, 2, 3]);

        let reader = source.create_reader("memory://a.tif").await.unwrap();
        assert_eq!(reader.size(), 3);
        assert_eq!(reader.identifier(), "memory://a.tif");

        assert!(matches!(
            source.create_reader("memory://missing.tif").await,
            Err(IoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_s3_without_client_rejected() {
        let source = UrlAssetSource::new(None);
        assert!(matches!(
            source.create_reader("s3://bucket/a.tif").await,
            Err(IoError::InvalidLocation(_))
        ));
    }

    #[tokio::test]
    async fn test_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tif");
        std::fs::write(&path, b"II*\0").unwrap();

        let source = UrlAssetSource::default();
        let reader = source
            .create_reader(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(reader.size(), 4);

        let missing = dir.path().join("b.tif");
        assert!(matches!(
            source.create_reader(missing.to_str().unwrap()).await,
            Err(IoError::NotFound(_))
        ));
    }
}
