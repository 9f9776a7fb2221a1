use rangebench_backend::BackendError;
use thiserror::Error;

/// An invalid benchmark configuration.
///
/// Configuration errors are fatal and always raised before any worker starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The read range is larger than the objects it reads from.
    #[error("range size {range_size} exceeds object size {object_size}")]
    RangeExceedsObject {
        /// Configured range size in bytes.
        range_size: u64,
        /// Configured object size in bytes.
        object_size: u64,
    },
    /// The read range is empty.
    #[error("range size must be positive")]
    EmptyRange,
    /// The object pool is empty.
    #[error("object count must be at least 1")]
    NoObjects,
    /// The initial concurrency is zero.
    #[error("initial concurrency must be at least 1")]
    ZeroConcurrency,
    /// The maximum concurrency is below the initial concurrency.
    #[error("max concurrency {max} is below initial concurrency {initial}")]
    MaxBelowInitial {
        /// Configured initial concurrency.
        initial: usize,
        /// Configured maximum concurrency.
        max: usize,
    },
    /// The ramp step is zero.
    #[error("ramp step must be at least 1")]
    ZeroStep,
    /// A duration that must be positive is zero.
    #[error("{0} must be positive")]
    NonPositiveDuration(&'static str),
    /// A ratio is outside its valid range.
    #[error("{name} must be within [0, 1), got {value}")]
    InvalidRatio {
        /// Name of the setting.
        name: &'static str,
        /// The configured value.
        value: f64,
    },
    /// The host bandwidth ceiling is negative or not a number.
    #[error("plateau.system_bandwidth_gbps must be a non-negative number, got {0}")]
    InvalidBandwidth(f64),
    /// The result sink has no capacity.
    #[error("sink capacity must be at least 1")]
    ZeroCapacity,
}

/// Errors that abort a benchmark run before it starts.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// An object of the pool does not exist.
    #[error("benchmark object {key} does not exist")]
    MissingObject {
        /// Key of the missing object.
        key: String,
    },
    /// An object of the pool is smaller than the read range.
    #[error("benchmark object {key} has {size} bytes, at least {required} are required")]
    ObjectTooSmall {
        /// Key of the object.
        key: String,
        /// Actual size in bytes.
        size: u64,
        /// Configured object size in bytes.
        required: u64,
    },
    /// The pre-flight check could not reach the store.
    #[error("pre-flight check for {key} failed")]
    Preflight {
        /// Key that was being checked.
        key: String,
        /// The backend error.
        #[source]
        cause: BackendError,
    },
}
