//! Benchmark parameters.
//!
//! [`BenchmarkConfig`] is deserialized as the `benchmark` section of the rangebench
//! configuration, so every field can also be set through `RB__BENCHMARK__<FIELD>` environment
//! variables. Durations use humantime notation (`5m`, `90s`), sizes use bytesize notation
//! (`1GiB`, `100MiB`).

use std::time::Duration;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Thresholds of the plateau detector.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlateauThresholds {
    /// Minimum relative throughput gain of a ramp step over the previous one.
    ///
    /// A step gaining less signals a plateau.
    ///
    /// # Default
    ///
    /// `0.05` (5%)
    pub growth_threshold: f64,

    /// Relative throughput loss of a ramp step that signals degradation.
    ///
    /// # Default
    ///
    /// `0.10` (10%)
    pub degradation_threshold: f64,

    /// Network bandwidth of the benchmarking host in gigabits per second.
    ///
    /// When set, ramping stops as soon as a step reaches 95% of this ceiling, since the host
    /// rather than the store is then the bottleneck. `0` disables the ceiling.
    ///
    /// # Default
    ///
    /// `None` (no ceiling)
    pub system_bandwidth_gbps: Option<f64>,
}

impl PlateauThresholds {
    /// The bandwidth ceiling in bits per second, if one is set.
    pub fn system_bandwidth_bps(&self) -> Option<f64> {
        self.system_bandwidth_gbps
            .filter(|gbps| *gbps > 0.0)
            .map(|gbps| gbps * 1e9)
    }
}

impl Default for PlateauThresholds {
    fn default() -> Self {
        Self {
            growth_threshold: 0.05,
            degradation_threshold: 0.10,
            system_bandwidth_gbps: None,
        }
    }
}

/// Immediate retries of failed range reads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of immediate retries after a failed request, without backoff.
    ///
    /// Retried requests report the number of retries on their outcome, and their latency
    /// covers all attempts.
    ///
    /// # Default
    ///
    /// `0` (retries disabled)
    pub max_retries: u32,
}

/// Aborts ramping when a step fails too many requests.
///
/// An aborted run skips the steady state and drains right away. The summary still reports the
/// best level measured so far, with [`StopReason::ErrorRate`](crate::StopReason::ErrorRate).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorRateAbort {
    /// Error rate above which the ramp is aborted.
    pub max_error_rate: f64,
    /// Minimum number of requests in a step before its error rate is considered.
    pub min_requests: u64,
}

impl Default for ErrorRateAbort {
    fn default() -> Self {
        Self {
            max_error_rate: 0.5,
            min_requests: 10,
        }
    }
}

/// Parameters of a benchmark run.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Number of objects in the pool.
    ///
    /// # Default
    ///
    /// `9`
    pub object_count: usize,

    /// Key prefix of the pool objects. Keys are `{object_prefix}{index}`.
    ///
    /// # Default
    ///
    /// `"rangebench/object-"`
    pub object_prefix: String,

    /// Size of every pool object.
    ///
    /// Objects should be larger than the edge cache limit of the store, so that every read
    /// reaches the origin.
    ///
    /// # Default
    ///
    /// `1GiB`
    pub object_size: ByteSize,

    /// Length of every range read.
    ///
    /// # Default
    ///
    /// `100MiB`
    pub range_size: ByteSize,

    /// Duration of the warmup phase.
    ///
    /// # Default
    ///
    /// `5m`
    #[serde(with = "humantime_serde")]
    pub warmup: Duration,

    /// Duration of every ramp step.
    ///
    /// # Default
    ///
    /// `5m`
    #[serde(with = "humantime_serde")]
    pub ramp_step_duration: Duration,

    /// Concurrency increment between ramp steps.
    ///
    /// # Default
    ///
    /// `8`
    pub ramp_step: usize,

    /// Concurrency of warmup and the first ramp step.
    ///
    /// # Default
    ///
    /// `8`
    pub initial_concurrency: usize,

    /// Upper bound of the ramp.
    ///
    /// # Default
    ///
    /// `256`
    pub max_concurrency: usize,

    /// Duration of the steady-state phase.
    ///
    /// # Default
    ///
    /// `3h`
    #[serde(with = "humantime_serde")]
    pub steady_state: Duration,

    /// Plateau detection thresholds.
    pub plateau: PlateauThresholds,

    /// Leading share of every ramp step excluded from its statistics.
    ///
    /// New connections need a moment to settle after a concurrency change.
    ///
    /// # Default
    ///
    /// `0.1` (10%)
    pub warm_fraction: f64,

    /// How long in-flight requests may take to finish when draining.
    ///
    /// Workers still running afterwards are aborted. Zero aborts immediately.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(with = "humantime_serde")]
    pub drain_grace: Duration,

    /// Number of outcomes the result sink buffers before dropping.
    ///
    /// # Default
    ///
    /// `10000`
    pub sink_capacity: usize,

    /// Timeout of a single range read, including the full body.
    ///
    /// # Default
    ///
    /// `None` (no timeout)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Immediate retries of failed requests. Disabled by default.
    pub retry: RetryPolicy,

    /// Aborts the ramp on a high error rate. Disabled by default.
    pub abort_on_error_rate: Option<ErrorRateAbort>,

    /// Interval of host statistics sampling.
    ///
    /// # Default
    ///
    /// `10s`
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,

    /// Width of the live statistics windows exported while running.
    ///
    /// # Default
    ///
    /// `1s`
    #[serde(with = "humantime_serde")]
    pub live_window: Duration,

    /// Seed for the range sampler. Random when unset.
    pub seed: Option<u64>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            object_count: 9,
            object_prefix: "rangebench/object-".to_owned(),
            object_size: ByteSize::gib(1),
            range_size: ByteSize::mib(100),
            warmup: Duration::from_secs(5 * 60),
            ramp_step_duration: Duration::from_secs(5 * 60),
            ramp_step: 8,
            initial_concurrency: 8,
            max_concurrency: 256,
            steady_state: Duration::from_secs(3 * 60 * 60),
            plateau: PlateauThresholds::default(),
            warm_fraction: 0.1,
            drain_grace: Duration::from_secs(30),
            sink_capacity: 10_000,
            request_timeout: None,
            retry: RetryPolicy::default(),
            abort_on_error_rate: None,
            monitor_interval: Duration::from_secs(10),
            live_window: Duration::from_secs(1),
            seed: None,
        }
    }
}

impl BenchmarkConfig {
    /// Keys of all objects in the pool.
    pub fn object_keys(&self) -> Vec<String> {
        (0..self.object_count)
            .map(|index| format!("{}{index}", self.object_prefix))
            .collect()
    }

    /// Checks all invariants of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.object_count == 0 {
            return Err(ConfigError::NoObjects);
        }
        if self.range_size.as_u64() == 0 {
            return Err(ConfigError::EmptyRange);
        }
        if self.range_size > self.object_size {
            return Err(ConfigError::RangeExceedsObject {
                range_size: self.range_size.as_u64(),
                object_size: self.object_size.as_u64(),
            });
        }

        if self.initial_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_concurrency < self.initial_concurrency {
            return Err(ConfigError::MaxBelowInitial {
                initial: self.initial_concurrency,
                max: self.max_concurrency,
            });
        }
        if self.ramp_step == 0 {
            return Err(ConfigError::ZeroStep);
        }

        let durations = [
            ("warmup", self.warmup),
            ("ramp_step_duration", self.ramp_step_duration),
            ("steady_state", self.steady_state),
            ("monitor_interval", self.monitor_interval),
            ("live_window", self.live_window),
        ];
        for (name, duration) in durations {
            if duration.is_zero() {
                return Err(ConfigError::NonPositiveDuration(name));
            }
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::NonPositiveDuration("request_timeout"));
        }

        check_ratio("warm_fraction", self.warm_fraction)?;
        check_ratio("plateau.growth_threshold", self.plateau.growth_threshold)?;
        check_ratio(
            "plateau.degradation_threshold",
            self.plateau.degradation_threshold,
        )?;
        if let Some(abort) = &self.abort_on_error_rate {
            check_ratio("abort_on_error_rate.max_error_rate", abort.max_error_rate)?;
        }
        if let Some(gbps) = self.plateau.system_bandwidth_gbps
            && !(gbps.is_finite() && gbps >= 0.0)
        {
            return Err(ConfigError::InvalidBandwidth(gbps));
        }

        if self.sink_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        Ok(())
    }
}

fn check_ratio(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRatio { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BenchmarkConfig::default();
        config.validate().unwrap();
        assert_eq!(config.object_keys().len(), 9);
        assert_eq!(config.object_keys()[3], "rangebench/object-3");
    }

    #[test]
    fn range_larger_than_object() {
        let config = BenchmarkConfig {
            object_size: ByteSize::mib(10),
            range_size: ByteSize::mib(11),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::RangeExceedsObject {
                range_size: ByteSize::mib(11).as_u64(),
                object_size: ByteSize::mib(10).as_u64(),
            })
        );
    }

    #[test]
    fn range_equal_to_object_is_valid() {
        let config = BenchmarkConfig {
            object_size: ByteSize::mib(10),
            range_size: ByteSize::mib(10),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn bandwidth_ceiling_must_be_finite_and_not_negative() {
        let with_ceiling = |gbps| BenchmarkConfig {
            plateau: PlateauThresholds {
                system_bandwidth_gbps: Some(gbps),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(
            with_ceiling(-1.0).validate(),
            Err(ConfigError::InvalidBandwidth(-1.0))
        );
        assert!(matches!(
            with_ceiling(f64::NAN).validate(),
            Err(ConfigError::InvalidBandwidth(_))
        ));
        assert!(with_ceiling(f64::INFINITY).validate().is_err());

        let disabled = with_ceiling(0.0);
        disabled.validate().unwrap();
        assert_eq!(disabled.plateau.system_bandwidth_bps(), None);
        assert_eq!(with_ceiling(2.5).plateau.system_bandwidth_bps(), Some(2.5e9));
    }

    #[test]
    fn rejects_zero_durations() {
        let config = BenchmarkConfig {
            steady_state: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositiveDuration("steady_state"))
        );

        let config = BenchmarkConfig {
            request_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositiveDuration("request_timeout"))
        );
    }

    #[test]
    fn rejects_bad_concurrency() {
        let config = BenchmarkConfig {
            initial_concurrency: 16,
            max_concurrency: 8,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MaxBelowInitial {
                initial: 16,
                max: 8
            })
        );

        let config = BenchmarkConfig {
            ramp_step: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroStep));
    }

    #[test]
    fn rejects_bad_ratios() {
        let config = BenchmarkConfig {
            warm_fraction: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRatio {
                name: "warm_fraction",
                ..
            })
        ));
    }

    #[test]
    fn deserializes_human_units() {
        let config: BenchmarkConfig = serde_json::from_str(
            r#"{
                "object_size": "2 GiB",
                "range_size": "64 MiB",
                "ramp_step_duration": "90s",
                "request_timeout": "30s",
                "plateau": { "growth_threshold": 0.02 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.object_size, ByteSize::gib(2));
        assert_eq!(config.range_size, ByteSize::mib(64));
        assert_eq!(config.ramp_step_duration, Duration::from_secs(90));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.plateau.growth_threshold, 0.02);
        assert_eq!(config.plateau.degradation_threshold, 0.10);
        assert_eq!(config.warmup, Duration::from_secs(300));
    }
}
