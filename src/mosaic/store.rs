//! Catalog persistence.
//!
//! A [`CatalogStore`] moves raw catalog bytes to and from a destination. The
//! `overwrite` flag gives optimistic protection: without it an existing
//! destination is never replaced and the save fails with
//! [`CatalogError::WriteConflict`].
//!
//! | Store         | Destinations                 | Conflict detection            |
//! |---------------|------------------------------|-------------------------------|
//! | `FileStore`   | `/path`, `file:///path`      | hard link of a complete file  |
//! | `S3Store`     | `s3://bucket/key`            | `If-None-Match: *` (HTTP 412) |
//! | `MemoryStore` | `memory://name`              | map entry                     |
//! | `UrlStore`    | any of the above             | delegated                     |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CatalogError, IoError};
use crate::io::{classify_sdk_error, map_io_error, Location};

/// Load/save raw catalog documents.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Read the bytes at `destination`; a missing destination is
    /// [`CatalogError::NotFound`].
    async fn load(&self, destination: &str) -> Result<Bytes, CatalogError>;

    /// Write `bytes` to `destination`, failing with
    /// [`CatalogError::WriteConflict`] if it exists and `overwrite` is false.
    async fn save(&self, destination: &str, bytes: Bytes, overwrite: bool)
        -> Result<(), CatalogError>;

    async fn exists(&self, destination: &str) -> Result<bool, CatalogError>;
}

fn not_found(err: IoError) -> CatalogError {
    match err {
        IoError::NotFound(path) => CatalogError::NotFound(path),
        other => CatalogError::Store(other),
    }
}

fn conflict(destination: &str) -> CatalogError {
    CatalogError::WriteConflict {
        destination: destination.to_string(),
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// Catalogs on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStore;

impl FileStore {
    fn path(destination: &str) -> Result<PathBuf, CatalogError> {
        match Location::parse(destination)? {
            Location::Local(path) => Ok(path),
            other => Err(CatalogError::Store(IoError::InvalidLocation(format!(
                "{} is not a local path",
                other
            )))),
        }
    }

    /// Sibling path for staging a write; unique within the process.
    fn temp_path(path: &Path) -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(
            ".tmp-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        PathBuf::from(tmp)
    }

    async fn ensure_parent(path: &Path, identifier: &str) -> Result<(), CatalogError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_error(identifier, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for FileStore {
    async fn load(&self, destination: &str) -> Result<Bytes, CatalogError> {
        let path = Self::path(destination)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| not_found(map_io_error(destination, e)))
    }

    async fn save(
        &self,
        destination: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<(), CatalogError> {
        let path = Self::path(destination)?;
        Self::ensure_parent(&path, destination).await?;

        // The destination only ever appears with its complete content
        let tmp = Self::temp_path(&path);
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(map_io_error(destination, e).into());
        }

        let published = if overwrite {
            tokio::fs::rename(&tmp, &path).await
        } else {
            // Linking fails if the destination exists, leaving it untouched
            tokio::fs::hard_link(&tmp, &path).await
        };
        let _ = tokio::fs::remove_file(&tmp).await;

        match published {
            Ok(()) => {
                debug!(
                    destination = destination,
                    bytes = bytes.len(),
                    overwrite = overwrite,
                    "Wrote catalog file"
                );
                Ok(())
            }
            Err(e) if !overwrite && e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(conflict(destination))
            }
            Err(e) => Err(map_io_error(destination, e).into()),
        }
    }

    async fn exists(&self, destination: &str) -> Result<bool, CatalogError> {
        let path = Self::path(destination)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| map_io_error(destination, e).into())
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process catalogs, keyed by name (`memory://` prefix optional).
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(destination: &str) -> &str {
        destination.strip_prefix("memory://").unwrap_or(destination)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn load(&self, destination: &str) -> Result<Bytes, CatalogError> {
        self.objects
            .read()
            .await
            .get(Self::key(destination))
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(destination.to_string()))
    }

    async fn save(
        &self,
        destination: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<(), CatalogError> {
        let mut objects = self.objects.write().await;
        let key = Self::key(destination);
        if !overwrite && objects.contains_key(key) {
            return Err(conflict(destination));
        }
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn exists(&self, destination: &str) -> Result<bool, CatalogError> {
        Ok(self.objects.read().await.contains_key(Self::key(destination)))
    }
}

// =============================================================================
// S3Store
// =============================================================================

/// Catalogs in S3 or an S3-compatible store.
///
/// Non-overwriting saves use a conditional put (`If-None-Match: *`), so two
/// writers racing for the same key cannot both succeed.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn object(destination: &str) -> Result<(String, String), CatalogError> {
        match Location::parse(destination)? {
            Location::S3 { bucket, key } => Ok((bucket, key)),
            other => Err(CatalogError::Store(IoError::InvalidLocation(format!(
                "{} is not an s3:// location",
                other
            )))),
        }
    }
}

#[async_trait]
impl CatalogStore for S3Store {
    async fn load(&self, destination: &str) -> Result<Bytes, CatalogError> {
        let (bucket, key) = Self::object(destination)?;
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| not_found(classify_sdk_error(destination, e)))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();
        Ok(data)
    }

    async fn save(
        &self,
        destination: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<(), CatalogError> {
        let (bucket, key) = Self::object(destination)?;
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(bytes));
        if !overwrite {
            request = request.if_none_match("*");
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                let code = e.as_service_error().and_then(|se| se.code());
                if status == Some(412)
                    || matches!(code, Some("PreconditionFailed" | "ConditionalRequestConflict"))
                {
                    Err(conflict(destination))
                } else {
                    Err(classify_sdk_error(destination, e).into())
                }
            }
        }
    }

    async fn exists(&self, destination: &str) -> Result<bool, CatalogError> {
        let (bucket, key) = Self::object(destination)?;
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if missing {
                    return Ok(false);
                }
                match classify_sdk_error(destination, e) {
                    IoError::NotFound(_) => Ok(false),
                    other => Err(other.into()),
                }
            }
        }
    }
}

// =============================================================================
// UrlStore
// =============================================================================

/// Store that dispatches on the destination's scheme.
///
/// `s3://` destinations need a client; without one they are rejected.
#[derive(Debug, Default)]
pub struct UrlStore {
    file: FileStore,
    memory: MemoryStore,
    s3: Option<S3Store>,
}

impl UrlStore {
    pub fn new(s3: Option<Client>) -> Self {
        Self {
            file: FileStore,
            memory: MemoryStore::new(),
            s3: s3.map(S3Store::new),
        }
    }

    fn route(&self, destination: &str) -> Result<&dyn CatalogStore, CatalogError> {
        match Location::parse(destination)? {
            Location::Local(_) => Ok(&self.file),
            Location::Memory(_) => Ok(&self.memory),
            Location::S3 { .. } => match &self.s3 {
                Some(store) => Ok(store),
                None => Err(CatalogError::Store(IoError::InvalidLocation(format!(
                    "{}: S3 access is not configured",
                    destination
                )))),
            },
        }
    }
}

#[async_trait]
impl CatalogStore for UrlStore {
    async fn load(&self, destination: &str) -> Result<Bytes, CatalogError> {
        self.route(destination)?.load(destination).await
    }

    async fn save(
        &self,
        destination: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<(), CatalogError> {
        self.route(destination)?
            .save(destination, bytes, overwrite)
            .await
    }

    async fn exists(&self, destination: &str) -> Result<bool, CatalogError> {
        self.route(destination)?.exists(destination).await
    }
}
