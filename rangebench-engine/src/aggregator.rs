use std::time::Duration;

use serde::Serialize;

use crate::outcome::RequestOutcome;
use crate::phase::PhaseLabel;

/// A half-open interval `[start, end)` of run offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WindowBounds {
    /// Inclusive start offset.
    #[serde(rename = "start_ms", with = "crate::millis")]
    pub start: Duration,
    /// Exclusive end offset.
    #[serde(rename = "end_ms", with = "crate::millis")]
    pub end: Duration,
}

impl WindowBounds {
    /// Creates bounds from `start` to `end`. An `end` before `start` yields an empty window.
    pub fn new(start: Duration, end: Duration) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Returns `true` if `offset` falls into the window.
    pub fn contains(&self, offset: Duration) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Length of the window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Moves the start forward by `fraction` of the window length.
    ///
    /// Used to exclude the settling period right after a concurrency change from a ramp step.
    pub fn skip_leading(self, fraction: f64) -> Self {
        let skip = self.duration().mul_f64(fraction.clamp(0.0, 1.0));
        Self::new(self.start + skip, self.end)
    }

    /// Moves the end back to `end` if it is earlier.
    pub fn truncate(self, end: Duration) -> Self {
        Self::new(self.start, self.end.min(end))
    }
}

/// Latency distribution of the successful requests in a window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Arithmetic mean.
    #[serde(rename = "avg_ms", with = "crate::millis")]
    pub avg: Duration,
    /// Median.
    #[serde(rename = "p50_ms", with = "crate::millis")]
    pub p50: Duration,
    /// 90th percentile.
    #[serde(rename = "p90_ms", with = "crate::millis")]
    pub p90: Duration,
    /// 95th percentile.
    #[serde(rename = "p95_ms", with = "crate::millis")]
    pub p95: Duration,
    /// 99th percentile.
    #[serde(rename = "p99_ms", with = "crate::millis")]
    pub p99: Duration,
}

impl LatencySummary {
    /// Computes exact nearest-rank percentiles. Sorts `latencies` in place.
    fn from_samples(latencies: &mut [Duration]) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }

        latencies.sort_unstable();
        let total: Duration = latencies.iter().sum();

        Self {
            avg: total / latencies.len() as u32,
            p50: nearest_rank(latencies, 50),
            p90: nearest_rank(latencies, 90),
            p95: nearest_rank(latencies, 95),
            p99: nearest_rank(latencies, 99),
        }
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice.
fn nearest_rank(sorted: &[Duration], percentile: usize) -> Duration {
    let rank = (percentile * sorted.len()).div_ceil(100);
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Aggregate statistics of a closed window. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WindowStats {
    /// The window this covers.
    pub label: PhaseLabel,
    /// Target concurrency during the window.
    pub concurrency: usize,
    /// The measured interval.
    #[serde(flatten)]
    pub bounds: WindowBounds,
    /// Number of completed requests.
    pub requests: u64,
    /// Number of successful requests.
    pub successes: u64,
    /// Number of failed requests.
    pub errors: u64,
    /// Body bytes received.
    pub bytes: u64,
    /// Throughput in bits per second over the window duration.
    pub throughput_bps: f64,
    /// Latency distribution of successful requests.
    pub latency: LatencySummary,
    /// Failed requests divided by all requests, zero for an empty window.
    pub error_rate: f64,
}

impl WindowStats {
    /// Throughput in megabits per second.
    pub fn throughput_mbps(&self) -> f64 {
        self.throughput_bps / 1e6
    }

    /// Throughput in gigabits per second.
    pub fn throughput_gbps(&self) -> f64 {
        self.throughput_bps / 1e9
    }
}

/// The part of an outcome a window needs.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Sample {
    pub completed: Duration,
    latency: Duration,
    bytes: u64,
    success: bool,
}

impl From<&RequestOutcome> for Sample {
    fn from(outcome: &RequestOutcome) -> Self {
        Self {
            completed: outcome.completed(),
            latency: outcome.latency,
            bytes: outcome.bytes,
            success: outcome.is_success(),
        }
    }
}

/// Aggregates outcomes into the statistics of one window.
///
/// Outcomes are placed by their completion offset, so feeding the same outcomes in any order
/// yields identical statistics. Outcomes completing outside the window are ignored.
#[derive(Debug)]
pub struct MetricsAggregator {
    label: PhaseLabel,
    concurrency: usize,
    bounds: WindowBounds,
    samples: Vec<Sample>,
}

impl MetricsAggregator {
    /// Creates an empty aggregator for the given window.
    pub fn new(label: PhaseLabel, concurrency: usize, bounds: WindowBounds) -> Self {
        Self {
            label,
            concurrency,
            bounds,
            samples: Vec::new(),
        }
    }

    /// The window covered by this aggregator.
    pub fn bounds(&self) -> WindowBounds {
        self.bounds
    }

    /// Records an outcome. Returns `false` if it completed outside the window.
    pub fn observe(&mut self, outcome: &RequestOutcome) -> bool {
        self.observe_sample(Sample::from(outcome))
    }

    pub(crate) fn observe_sample(&mut self, sample: Sample) -> bool {
        if !self.bounds.contains(sample.completed) {
            return false;
        }
        self.samples.push(sample);
        true
    }

    /// Closes the window and computes its statistics.
    pub fn close(self) -> WindowStats {
        let end = self.bounds.end;
        self.close_at(end)
    }

    /// Closes the window early at `end`, discarding outcomes that completed after it.
    pub fn close_at(self, end: Duration) -> WindowStats {
        let bounds = self.bounds.truncate(end);

        let mut requests = 0;
        let mut successes = 0;
        let mut bytes = 0;
        let mut latencies = Vec::with_capacity(self.samples.len());

        for sample in self.samples.iter().filter(|s| bounds.contains(s.completed)) {
            requests += 1;
            bytes += sample.bytes;
            if sample.success {
                successes += 1;
                latencies.push(sample.latency);
            }
        }

        let errors = requests - successes;
        let seconds = bounds.duration().as_secs_f64();
        let throughput_bps = if seconds > 0.0 {
            (bytes * 8) as f64 / seconds
        } else {
            0.0
        };
        let error_rate = if requests > 0 {
            errors as f64 / requests as f64
        } else {
            0.0
        };

        WindowStats {
            label: self.label,
            concurrency: self.concurrency,
            bounds,
            requests,
            successes,
            errors,
            bytes,
            throughput_bps,
            latency: LatencySummary::from_samples(&mut latencies),
            error_rate,
        }
    }
}
