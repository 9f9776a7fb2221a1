use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::common::{BackendError, BackendResult, RangeRead, StorageClient};
use crate::payload::Payload;

/// An in-memory [`StorageClient`] with a synthetic performance model.
///
/// Only object sizes are stored. Every range read waits for a fixed first-byte `latency` and then
/// for its transfer over a single shared link with the configured `bandwidth`. Transfers are
/// serialized on the link, so aggregate throughput grows with concurrency until the link
/// saturates, which gives the benchmark a well-defined plateau.
///
/// All waiting uses the tokio clock, so tests can run with paused time.
#[derive(Debug)]
pub struct SimulatedBackend {
    objects: RwLock<HashMap<String, u64>>,
    latency: Duration,
    bandwidth: Option<u64>,
    link_free_at: Mutex<Option<Instant>>,
    fail_every: Option<u64>,
    requests: AtomicU64,
}

impl SimulatedBackend {
    /// Returns a builder for a simulated backend without objects, latency or bandwidth limit.
    pub fn builder() -> SimulatedBackendBuilder {
        SimulatedBackendBuilder::default()
    }

    /// Total number of range reads issued against this backend.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Reserves the shared link for `bytes` and returns the instant the transfer completes.
    fn reserve_link(&self, bytes: u64) -> Option<Instant> {
        let bandwidth = self.bandwidth?;
        let transfer = Duration::from_secs_f64(bytes as f64 / bandwidth as f64);

        let mut free_at = self
            .link_free_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let start = match *free_at {
            Some(free_at) if free_at > now => free_at,
            _ => now,
        };
        let done = start + transfer;
        *free_at = Some(done);
        Some(done)
    }

    fn size_of(&self, key: &str) -> Option<u64> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }
}

#[async_trait::async_trait]
impl StorageClient for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn endpoint(&self) -> String {
        "simulated://local".to_owned()
    }

    async fn get_range(&self, key: &str, start: u64, length: u64) -> BackendResult<RangeRead> {
        let sequence = self.requests.fetch_add(1, Ordering::Relaxed) + 1;

        let size = self.size_of(key).ok_or_else(|| BackendError::Status {
            status: 404,
            message: format!("no such key: {key}"),
        })?;
        if start + length > size {
            return Err(BackendError::Status {
                status: 416,
                message: format!("range {start}+{length} exceeds object size {size}"),
            });
        }

        tokio::time::sleep(self.latency).await;

        if let Some(every) = self.fail_every
            && sequence % every == 0
        {
            return Err(BackendError::Status {
                status: 503,
                message: "injected failure".to_owned(),
            });
        }

        if let Some(done) = self.reserve_link(length) {
            tokio::time::sleep_until(done).await;
        }

        Ok(RangeRead {
            bytes: length,
            status: 206,
        })
    }

    async fn object_size(&self, key: &str) -> BackendResult<Option<u64>> {
        Ok(self.size_of(key))
    }

    async fn put(&self, key: &str, payload: Payload) -> BackendResult<()> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), payload.len);
        Ok(())
    }
}

/// Builder for [`SimulatedBackend`].
#[derive(Debug, Default)]
pub struct SimulatedBackendBuilder {
    objects: HashMap<String, u64>,
    latency: Duration,
    bandwidth: Option<u64>,
    fail_every: Option<u64>,
}

impl SimulatedBackendBuilder {
    /// Sets the time to first byte of every range read.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sets the shared link bandwidth in bytes per second.
    pub fn bandwidth(mut self, bytes_per_second: u64) -> Self {
        self.bandwidth = (bytes_per_second > 0).then_some(bytes_per_second);
        self
    }

    /// Fails every `n`-th range read with status `503`.
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Adds an object of the given size.
    pub fn object(mut self, key: impl Into<String>, size: u64) -> Self {
        self.objects.insert(key.into(), size);
        self
    }

    /// Adds objects for all the given keys, each of the given size.
    pub fn objects<I, K>(mut self, keys: I, size: u64) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        for key in keys {
            self.objects.insert(key.into(), size);
        }
        self
    }

    /// Creates the backend.
    pub fn build(self) -> SimulatedBackend {
        SimulatedBackend {
            objects: RwLock::new(self.objects),
            latency: self.latency,
            bandwidth: self.bandwidth,
            link_free_at: Mutex::new(None),
            fail_every: self.fail_every,
            requests: AtomicU64::new(0),
        }
    }
}
