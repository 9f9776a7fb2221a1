//! Simulated object pools for integration tests.
//!
//! ```
//! use std::time::Duration;
//!
//! use rangebench_test::backend::PoolBuilder;
//!
//! let backend = PoolBuilder::new("object-", 3, 1024)
//!     .latency(Duration::from_millis(100))
//!     .build();
//! ```

use std::sync::Arc;
use std::time::Duration;

use rangebench_backend::{SharedClient, SimulatedBackend};

/// Builds a [`SimulatedBackend`] holding a pool of equally sized objects.
#[derive(Debug)]
pub struct PoolBuilder {
    prefix: String,
    count: usize,
    size: u64,
    latency: Duration,
    bandwidth: u64,
    fail_every: u64,
}

impl PoolBuilder {
    /// Creates `count` objects named `{prefix}{index}` of `size` bytes each.
    pub fn new(prefix: &str, count: usize, size: u64) -> Self {
        Self {
            prefix: prefix.to_owned(),
            count,
            size,
            latency: Duration::ZERO,
            bandwidth: 0,
            fail_every: 0,
        }
    }

    /// Sets the first-byte latency of every range read.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Limits the shared link to `bytes_per_second`.
    pub fn bandwidth(mut self, bytes_per_second: u64) -> Self {
        self.bandwidth = bytes_per_second;
        self
    }

    /// Fails every `n`-th range read.
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = n;
        self
    }

    /// Builds the backend.
    pub fn build(self) -> Arc<SimulatedBackend> {
        let keys = (0..self.count).map(|index| format!("{}{index}", self.prefix));
        let backend = SimulatedBackend::builder()
            .objects(keys, self.size)
            .latency(self.latency)
            .bandwidth(self.bandwidth)
            .fail_every(self.fail_every)
            .build();
        Arc::new(backend)
    }
}

/// Erases the concrete backend type while keeping a handle for assertions.
pub fn shared(backend: &Arc<SimulatedBackend>) -> SharedClient {
    backend.clone()
}
