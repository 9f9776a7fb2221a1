use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use std::{fmt, io};

use s3::creds::Credentials;
use s3::{Bucket, Region};
use tokio::io::AsyncWrite;

use crate::common::{BackendError, BackendResult, RangeRead, StorageClient};
use crate::payload::Payload;

/// The S3 dialect spoken by an [`S3Compatible`] client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum S3Flavor {
    /// Amazon S3 in the given region.
    Aws {
        /// AWS region, for example `us-east-1`.
        region: String,
    },
    /// Cloudflare R2 for the given account.
    R2 {
        /// Cloudflare account ID, used to derive the endpoint.
        account_id: String,
    },
    /// Any other S3-compatible service, such as MinIO.
    Custom {
        /// Full endpoint URL including scheme.
        endpoint: String,
        /// Region name sent in request signatures.
        region: String,
    },
}

impl S3Flavor {
    /// Returns the endpoint URL requests are sent to.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Aws { region } => format!("https://s3.{region}.amazonaws.com"),
            Self::R2 { account_id } => format!("https://{account_id}.r2.cloudflarestorage.com"),
            Self::Custom { endpoint, .. } => endpoint.clone(),
        }
    }

    /// Returns the region used for request signing.
    pub fn region(&self) -> &str {
        match self {
            Self::Aws { region } | Self::Custom { region, .. } => region,
            Self::R2 { .. } => "auto",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Aws { .. } => "s3",
            Self::R2 { .. } => "r2",
            Self::Custom { .. } => "s3-compatible",
        }
    }
}

/// Connection settings for an [`S3Compatible`] client.
#[derive(Debug)]
pub struct S3CompatibleConfig {
    /// The service dialect and location.
    pub flavor: S3Flavor,
    /// Name of the bucket holding the benchmark objects.
    pub bucket: String,
    /// Use path-style instead of virtual-host-style addressing.
    pub path_style: bool,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Option<Duration>,
    /// Access key ID. Falls back to the environment when unset.
    pub access_key: Option<String>,
    /// Secret access key. Falls back to the environment when unset.
    pub secret_key: Option<String>,
    /// Optional session token for temporary credentials.
    pub session_token: Option<String>,
}

/// A [`StorageClient`] for AWS S3, Cloudflare R2 and other S3-compatible services.
pub struct S3Compatible {
    flavor: S3Flavor,
    bucket: Box<Bucket>,
}

impl S3Compatible {
    /// Creates a new client bound to the configured bucket.
    pub fn new(config: S3CompatibleConfig) -> BackendResult<Self> {
        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            config.session_token.as_deref(),
            None,
        )
        .map_err(|err| BackendError::Config(format!("failed to load credentials: {err}")))?;

        let region = Region::Custom {
            region: config.flavor.region().to_owned(),
            endpoint: config.flavor.endpoint(),
        };

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|cause| BackendError::from_s3("failed to create bucket handle", cause))?;

        if config.path_style {
            bucket = bucket.with_path_style();
        }

        if let Some(request_timeout) = config.request_timeout {
            bucket = bucket
                .with_request_timeout(request_timeout)
                .map_err(|cause| BackendError::from_s3("failed to set request timeout", cause))?;
        }

        Ok(Self {
            flavor: config.flavor,
            bucket,
        })
    }
}

impl fmt::Debug for S3Compatible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Compatible")
            .field("flavor", &self.flavor)
            .field("bucket", &self.bucket.name())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl StorageClient for S3Compatible {
    fn name(&self) -> &'static str {
        self.flavor.name()
    }

    fn endpoint(&self) -> String {
        self.flavor.endpoint()
    }

    #[tracing::instrument(level = "trace", fields(%key, start, length), skip_all)]
    async fn get_range(&self, key: &str, start: u64, length: u64) -> BackendResult<RangeRead> {
        // Range ends are inclusive, and zero-length reads are rejected by configuration.
        let end = start + length.saturating_sub(1);

        let mut sink = CountingSink::default();
        let status = self
            .bucket
            .get_object_range_to_writer(key, start, Some(end), &mut sink)
            .await
            .map_err(|cause| BackendError::from_s3("range read failed", cause))?;

        Ok(RangeRead {
            bytes: sink.bytes,
            status,
        })
    }

    #[tracing::instrument(level = "trace", fields(%key), skip_all)]
    async fn object_size(&self, key: &str) -> BackendResult<Option<u64>> {
        match self.bucket.head_object(key).await {
            Ok((head, _)) => Ok(Some(head.content_length.unwrap_or_default().max(0) as u64)),
            Err(s3::error::S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Err(cause) => Err(BackendError::from_s3("head request failed", cause)),
        }
    }

    #[tracing::instrument(level = "debug", fields(%key, len = payload.len), skip_all)]
    async fn put(&self, key: &str, mut payload: Payload) -> BackendResult<()> {
        tracing::debug!("Uploading object");
        self.bucket
            .put_object_stream(&mut payload, key)
            .await
            .map_err(|cause| BackendError::from_s3("upload failed", cause))?;
        Ok(())
    }
}

/// Discards the response body while counting its length.
#[derive(Debug, Default)]
struct CountingSink {
    bytes: u64,
}

impl AsyncWrite for CountingSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.bytes += buf.len() as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
