use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// S3-backed implementation of RangeReader.
///
/// Reads byte ranges of COGs in S3 or S3-compatible storage (MinIO, etc.)
/// with HTTP range requests. The object size is fetched once via HEAD.
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    identifier: String,
}

impl S3RangeReader {
    /// Create a reader for `s3://bucket/key`.
    ///
    /// Performs a HEAD request; missing objects map to `IoError::NotFound`.
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let identifier = format!("s3://{}/{}", bucket, key);

        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if is_not_found {
                    IoError::NotFound(identifier.clone())
                } else {
                    classify_sdk_error(&identifier, e)
                }
            })?;

        let size = head.content_length().unwrap_or(0).max(0) as u64;

        Ok(Self {
            client,
            bucket,
            key,
            size,
            identifier,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Map an SDK error to an `IoError`, recognizing 404s and connection failures.
pub(crate) fn classify_sdk_error<E, R>(identifier: &str, err: SdkError<E, R>) -> IoError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.as_service_error().and_then(|se| se.code()).unwrap_or("");
    if matches!(code, "NoSuchKey" | "NotFound" | "NoSuchBucket") {
        return IoError::NotFound(identifier.to_string());
    }

    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            IoError::Connection(format!("{}: {}", identifier, err))
        }
        other => {
            let message = other.to_string();
            if message.contains("404") || message.contains("NoSuchKey") {
                IoError::NotFound(identifier.to_string())
            } else {
                IoError::S3(format!("{}: {}", identifier, message))
            }
        }
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        // Range header is inclusive on both ends
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&self.identifier, e))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        if data.len() != len {
            return Err(IoError::S3(format!(
                "{}: short read, expected {} bytes at {}, got {}",
                self.identifier,
                len,
                offset,
                data.len()
            )));
        }

        Ok(data)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Custom endpoints (MinIO and friends) use path-style addressing.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
