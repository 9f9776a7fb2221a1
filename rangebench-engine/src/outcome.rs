use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rangebench_backend::BackendError;
use serde::Serialize;

use crate::phase::PhaseLabel;

/// Classification of a completed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The full range was received with a success status.
    Success,
    /// The store answered with a non-success HTTP status.
    HttpError,
    /// The request failed below HTTP, for instance on connect or TLS.
    Transport,
    /// The request did not complete within the request timeout.
    Timeout,
}

impl OutcomeStatus {
    /// Returns the snake-case name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::HttpError => "http_error",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
        }
    }

    /// Returns `true` for [`OutcomeStatus::Success`].
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Classifies a backend error.
    pub fn classify(error: &BackendError) -> Self {
        match error {
            BackendError::Timeout => Self::Timeout,
            BackendError::Status { .. } => Self::HttpError,
            BackendError::Io(_) | BackendError::S3 { .. } | BackendError::Config(_) => {
                Self::Transport
            }
        }
    }
}

/// The result of a single range read, as produced by a worker.
///
/// Outcomes are plain values. They are handed to the result sink exactly once and are never
/// retained by the worker.
#[derive(Clone, Debug, Serialize)]
pub struct RequestOutcome {
    /// Wall-clock time at which the request was issued.
    #[serde(with = "humantime_serde")]
    pub timestamp: SystemTime,
    /// Run offset at which the request was issued.
    #[serde(rename = "offset_ms", with = "crate::millis")]
    pub offset: Duration,
    /// The worker that issued the request.
    pub worker_id: usize,
    /// The window the request was issued in.
    pub phase: PhaseLabel,
    /// Target concurrency in effect when the request was issued.
    pub concurrency: usize,
    /// The object that was read.
    pub object_key: Arc<str>,
    /// First byte of the requested range.
    pub range_start: u64,
    /// Length of the requested range.
    pub range_len: u64,
    /// Body bytes actually received.
    pub bytes: u64,
    /// Time from issuing the request until the full body was received.
    #[serde(rename = "latency_ms", with = "crate::millis")]
    pub latency: Duration,
    /// Classification of the outcome.
    pub status: OutcomeStatus,
    /// The HTTP status, if a response was received.
    pub http_status: Option<u16>,
    /// Error detail for failed requests.
    pub error: Option<String>,
    /// Number of immediate retries spent on this request.
    pub retry_count: u32,
}

impl RequestOutcome {
    /// Run offset at which the request completed.
    ///
    /// Windows place outcomes by this offset, so the order in which outcomes arrive does not
    /// matter.
    pub fn completed(&self) -> Duration {
        self.offset + self.latency
    }

    /// Returns `true` if the request succeeded.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Builds an outcome that completes at `completed_ms` after taking `latency_ms`.
    pub fn outcome(completed_ms: u64, latency_ms: u64, bytes: u64) -> RequestOutcome {
        let latency = Duration::from_millis(latency_ms);
        let offset = Duration::from_millis(completed_ms) - latency;
        RequestOutcome {
            timestamp: SystemTime::UNIX_EPOCH + offset,
            offset,
            worker_id: 0,
            phase: PhaseLabel::Warmup,
            concurrency: 1,
            object_key: Arc::from("object-0"),
            range_start: 0,
            range_len: bytes,
            bytes,
            latency,
            status: OutcomeStatus::Success,
            http_status: Some(206),
            error: None,
            retry_count: 0,
        }
    }

    /// Builds a failed outcome completing at `completed_ms`.
    pub fn failure(completed_ms: u64, latency_ms: u64) -> RequestOutcome {
        RequestOutcome {
            bytes: 0,
            status: OutcomeStatus::HttpError,
            http_status: Some(503),
            error: Some("unexpected status 503".into()),
            ..outcome(completed_ms, latency_ms, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let status = BackendError::Status {
            status: 404,
            message: String::new(),
        };
        assert_eq!(OutcomeStatus::classify(&status), OutcomeStatus::HttpError);
        assert_eq!(
            OutcomeStatus::classify(&BackendError::Timeout),
            OutcomeStatus::Timeout
        );
        let io = BackendError::Io(std::io::Error::other("reset"));
        assert_eq!(OutcomeStatus::classify(&io), OutcomeStatus::Transport);
    }

    #[test]
    fn serializes_as_flat_record() {
        let outcome = testing::outcome(1500, 500, 1024);
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["offset_ms"], 1000.0);
        assert_eq!(json["latency_ms"], 500.0);
        assert_eq!(json["phase"], "warmup");
        assert_eq!(json["status"], "success");
        assert_eq!(json["object_key"], "object-0");
        assert_eq!(outcome.completed(), Duration::from_millis(1500));
    }
}
