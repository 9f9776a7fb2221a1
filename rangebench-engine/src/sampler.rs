use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::error::ConfigError;

/// A single range read to issue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeRequest {
    /// The object to read from.
    pub key: Arc<str>,
    /// First byte of the range.
    pub start: u64,
    /// Number of bytes to read.
    pub length: u64,
}

/// Chooses the object and byte range of every request.
///
/// Objects are picked round-robin over the pool, shared by all workers, so every object receives
/// the same share of requests regardless of how many workers are running. The range start is
/// drawn uniformly from all positions where the range still fits into the object.
#[derive(Debug)]
pub struct RequestSampler {
    keys: Vec<Arc<str>>,
    object_size: u64,
    range_size: u64,
    cursor: AtomicUsize,
}

impl RequestSampler {
    /// Creates a sampler over `keys`, all of which are `object_size` bytes large.
    pub fn new(keys: Vec<String>, object_size: u64, range_size: u64) -> Result<Self, ConfigError> {
        if keys.is_empty() {
            return Err(ConfigError::NoObjects);
        }
        if range_size == 0 {
            return Err(ConfigError::EmptyRange);
        }
        if range_size > object_size {
            return Err(ConfigError::RangeExceedsObject {
                range_size,
                object_size,
            });
        }

        Ok(Self {
            keys: keys.into_iter().map(Arc::from).collect(),
            object_size,
            range_size,
            cursor: AtomicUsize::new(0),
        })
    }

    /// The object keys in round-robin order.
    pub fn keys(&self) -> &[Arc<str>] {
        &self.keys
    }

    /// Samples the next request.
    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R) -> RangeRequest {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();

        let max_start = self.object_size - self.range_size;
        let start = if max_start == 0 {
            0
        } else {
            rng.random_range(0..=max_start)
        };

        RangeRequest {
            key: Arc::clone(&self.keys[index]),
            start,
            length: self.range_size,
        }
    }
}
