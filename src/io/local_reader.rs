use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Local-file implementation of RangeReader.
///
/// The file handle is opened once and shared; reads seek under a mutex.
pub struct LocalRangeReader {
    file: Mutex<File>,
    size: u64,
    identifier: String,
}

impl LocalRangeReader {
    /// Open `path` for range reads. Missing files map to `IoError::NotFound`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let identifier = path.display().to_string();

        let file = File::open(&path).await.map_err(|e| map_io_error(&identifier, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| map_io_error(&identifier, e))?;

        if !metadata.is_file() {
            return Err(IoError::NotFound(identifier));
        }

        Ok(Self {
            file: Mutex::new(file),
            size: metadata.len(),
            identifier,
        })
    }
}

pub(crate) fn map_io_error(identifier: &str, err: std::io::Error) -> IoError {
    match err.kind() {
        std::io::ErrorKind::NotFound => IoError::NotFound(identifier.to_string()),
        _ => IoError::Local(format!("{}: {}", identifier, err)),
    }
}

#[async_trait]
impl RangeReader for LocalRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| map_io_error(&self.identifier, e))?;
        file.read_exact(&mut buf)
            .await
            .map_err(|e| map_io_error(&self.identifier, e))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_local_reader_reads_ranges() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&(0u8..100).collect::<Vec<_>>()).unwrap();

        let reader = LocalRangeReader::open(file.path()).await.unwrap();
        assert_eq!(reader.size(), 100);

        let bytes = reader.read_exact_at(10, 5).await.unwrap();
        assert_eq!(&bytes[..], &[10, 11, 12, 13, 14]);

        let tail = reader.read_exact_at(95, 5).await.unwrap();
        assert_eq!(&tail[..], &[95, 96, 97, 98, 99]);

        assert!(matches!(
            reader.read_exact_at(99, 2).await,
            Err(IoError::RangeOutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = LocalRangeReader::open(dir.path().join("missing.tif")).await;
        assert!(matches!(result, Err(IoError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = LocalRangeReader::open(dir.path()).await;
        assert!(matches!(result, Err(IoError::NotFound(_))));
    }
}
