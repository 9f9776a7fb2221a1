use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

use crate::payload::Payload;

/// A type-erased [`StorageClient`] shared between all workers of a run.
pub type SharedClient = Arc<dyn StorageClient>;

/// The response of a completed range read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RangeRead {
    /// Number of body bytes actually received.
    pub bytes: u64,
    /// HTTP status code of the response, `206` for a regular partial read.
    pub status: u16,
}

/// The capabilities the benchmark needs from an object store.
#[async_trait::async_trait]
pub trait StorageClient: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics and the run summary.
    fn name(&self) -> &'static str;

    /// The endpoint this client talks to.
    fn endpoint(&self) -> String;

    /// Reads `length` bytes of `key` starting at byte `start`.
    ///
    /// The returned future resolves once the full body has been received.
    async fn get_range(&self, key: &str, start: u64, length: u64) -> BackendResult<RangeRead>;

    /// Returns the size of `key` in bytes, or `None` if the object does not exist.
    async fn object_size(&self, key: &str) -> BackendResult<Option<u64>>;

    /// Uploads `payload` under `key`, replacing any existing object.
    async fn put(&self, key: &str, payload: Payload) -> BackendResult<()>;

    /// Returns `true` if `key` exists.
    async fn exists(&self, key: &str) -> BackendResult<bool> {
        Ok(self.object_size(key).await?.is_some())
    }
}

/// Errors returned by storage backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// IO errors related to payload streaming.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend answered with a non-success HTTP status.
    #[error("unexpected status {status}: {message}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body or a short description.
        message: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// All errors stemming from the S3 client that do not carry an HTTP status, most notably
    /// connection and TLS failures.
    #[error("s3 error: {context}")]
    S3 {
        /// What the client was doing when the error occurred.
        context: String,
        /// The underlying client error.
        #[source]
        cause: s3::error::S3Error,
    },

    /// The backend could not be constructed from its configuration.
    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl BackendError {
    /// Returns the HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_s3(context: impl Into<String>, cause: s3::error::S3Error) -> Self {
        match cause {
            s3::error::S3Error::HttpFailWithBody(status, message) => Self::Status { status, message },
            cause => Self::S3 {
                context: context.into(),
                cause,
            },
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
