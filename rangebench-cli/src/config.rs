//! Configuration of the `rangebench` binary.
//!
//! Values come from three layers. Defaults are overridden by an optional YAML file passed with
//! `-c`, which is in turn overridden by environment variables. Variables start with `RB__` and
//! separate nesting levels with `__`:
//!
//! ```sh
//! RB__STORAGE__TYPE=r2
//! RB__STORAGE__ACCOUNT_ID=abc123
//! RB__STORAGE__BUCKET=benchmark
//! RB__BENCHMARK__RANGE_SIZE=64MiB
//! ```
//!
//! is equivalent to
//!
//! ```yaml
//! storage:
//!   type: r2
//!   account_id: abc123
//!   bucket: benchmark
//! benchmark:
//!   range_size: 64MiB
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use bytesize::ByteSize;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use rangebench_engine::BenchmarkConfig;
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

const ENV_PREFIX: &str = "RB__";

/// A credential or key read from configuration.
///
/// Always held in a [`SecretBox`], which zeroizes it on drop. `Debug` never prints the value.
#[derive(Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps `value` into a boxed secret.
    pub fn boxed(value: impl Into<String>) -> SecretBox<Self> {
        SecretBox::new(Box::new(Self(value.into())))
    }

    /// The secret value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl Zeroize for Secret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl CloneableSecret for Secret {}
impl SerializableSecret for Secret {}

/// The object store under test.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
///
/// Used in: [`Config::storage`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// Amazon S3 (type `"s3"`).
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: s3
    ///   region: us-east-1
    ///   bucket: my-benchmark-bucket
    /// ```
    S3 {
        /// AWS region of the bucket.
        ///
        /// # Environment Variable
        ///
        /// `RB__STORAGE__REGION`
        region: String,

        /// Bucket holding the benchmark objects.
        ///
        /// # Environment Variable
        ///
        /// `RB__STORAGE__BUCKET`
        bucket: String,
    },

    /// Cloudflare R2 (type `"r2"`).
    ///
    /// The endpoint is derived from the account ID.
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: r2
    ///   account_id: 0123456789abcdef
    ///   bucket: my-benchmark-bucket
    /// ```
    R2 {
        /// Cloudflare account ID.
        ///
        /// # Environment Variable
        ///
        /// `RB__STORAGE__ACCOUNT_ID`
        account_id: String,

        /// Bucket holding the benchmark objects.
        ///
        /// # Environment Variable
        ///
        /// `RB__STORAGE__BUCKET`
        bucket: String,
    },

    /// Any other S3-compatible service, such as MinIO (type `"custom"`).
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: custom
    ///   endpoint: http://localhost:9000
    ///   bucket: benchmark
    ///   path_style: true
    /// ```
    Custom {
        /// Endpoint URL including the scheme.
        ///
        /// # Environment Variable
        ///
        /// `RB__STORAGE__ENDPOINT`
        endpoint: String,

        /// Region used for request signing.
        ///
        /// # Default
        ///
        /// `us-east-1`
        #[serde(default = "default_region")]
        region: String,

        /// Bucket holding the benchmark objects.
        ///
        /// # Environment Variable
        ///
        /// `RB__STORAGE__BUCKET`
        bucket: String,

        /// Use path-style addressing, which most self-hosted services require.
        ///
        /// # Default
        ///
        /// `false`
        #[serde(default)]
        path_style: bool,
    },

    /// An in-process store with a synthetic latency and bandwidth model (type `"simulated"`).
    ///
    /// The object pool is created on startup. Useful to try out configurations without
    /// touching a real store.
    Simulated {
        /// Time to first byte of every range read.
        ///
        /// # Default
        ///
        /// `50ms`
        #[serde(with = "humantime_serde")]
        latency: Duration,

        /// Bandwidth of the simulated link per second.
        ///
        /// # Default
        ///
        /// `1GiB`
        bandwidth: Option<ByteSize>,
    },
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

impl Default for Storage {
    fn default() -> Self {
        Self::Simulated {
            latency: Duration::from_millis(50),
            bandwidth: Some(ByteSize::gib(1)),
        }
    }
}

/// Credentials for S3-compatible stores.
///
/// Unset values fall back to the standard AWS environment variables and profiles.
///
/// Used in: [`Config::credentials`]
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Credentials {
    /// Access key ID.
    ///
    /// # Environment Variable
    ///
    /// `RB__CREDENTIALS__ACCESS_KEY_ID`
    pub access_key_id: Option<SecretBox<Secret>>,

    /// Secret access key.
    ///
    /// # Environment Variable
    ///
    /// `RB__CREDENTIALS__SECRET_ACCESS_KEY`
    pub secret_access_key: Option<SecretBox<Secret>>,

    /// Session token for temporary credentials.
    ///
    /// # Environment Variable
    ///
    /// `RB__CREDENTIALS__SESSION_TOKEN`
    pub session_token: Option<SecretBox<Secret>>,
}

/// Where run results are written.
///
/// Used in: [`Config::output`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Output {
    /// Directory receiving one subdirectory per run.
    ///
    /// # Default
    ///
    /// `results`
    ///
    /// # Environment Variable
    ///
    /// `RB__OUTPUT__DIR`
    pub dir: PathBuf,

    /// Write every request outcome as a JSON line to `outcomes.jsonl`.
    ///
    /// The run summary is always written.
    ///
    /// # Default
    ///
    /// `true`
    ///
    /// # Environment Variable
    ///
    /// `RB__OUTPUT__OUTCOMES`
    pub outcomes: bool,

    /// Sample CPU and network statistics of this host while running.
    ///
    /// # Default
    ///
    /// `true`
    ///
    /// # Environment Variable
    ///
    /// `RB__OUTPUT__HOST_MONITOR`
    pub host_monitor: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
            outcomes: true,
            host_monitor: true,
        }
    }
}

/// The Tokio runtime that drives workers and the result pipeline.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Runtime threads, `RB__RUNTIME__WORKER_THREADS`. Defaults to one per CPU core.
    ///
    /// Benchmark workers are tasks, so this bounds CPU parallelism, not concurrency.
    pub worker_threads: usize,

    /// How often runtime gauges such as alive tasks are reported.
    ///
    /// # Default
    ///
    /// `10s`
    #[serde(with = "humantime_serde")]
    pub metrics_interval: Duration,
}

impl Runtime {
    fn validate(&self) -> Result<()> {
        ensure!(self.worker_threads > 0, "runtime.worker_threads must be at least 1");
        ensure!(
            !self.metrics_interval.is_zero(),
            "runtime.metrics_interval must be positive"
        );
        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            metrics_interval: Duration::from_secs(10),
        }
    }
}

/// Error reporting to [Sentry](https://sentry.io/).
///
/// Nothing is sent unless `dsn` is set. Warnings and errors become Sentry events, `INFO` logs
/// are forwarded as Sentry logs.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Project DSN. `RB__SENTRY__DSN`
    pub dsn: Option<SecretBox<Secret>>,

    /// Environment tag of every event, for example `ci` or `lab`. `RB__SENTRY__ENVIRONMENT`
    pub environment: Option<String>,

    /// Overrides the host name reported with events. `RB__SENTRY__SERVER_NAME`
    pub server_name: Option<String>,

    /// Share of error events that are sent.
    ///
    /// # Default
    ///
    /// `1.0`
    pub sample_rate: f32,

    /// Share of traces that are sent.
    ///
    /// # Default
    ///
    /// `0.01`
    pub traces_sample_rate: f32,

    /// Prints diagnostics of the Sentry SDK itself.
    pub debug: bool,

    /// Tags set on the scope of every event, for example `RB__SENTRY__TAGS__REGION=eu`.
    pub tags: BTreeMap<String, String>,
}

impl Sentry {
    /// `true` if a DSN is configured.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            server_name: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
            debug: false,
            tags: BTreeMap::new(),
        }
    }
}

/// How log lines are rendered on stderr.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact colored lines when stderr is a terminal, [`LogFormat::Simplified`] otherwise.
    #[default]
    Auto,
    /// Multi-line records with colors and source locations.
    Pretty,
    /// Plain lines without colors, for log files and CI.
    Simplified,
    /// One JSON object per line.
    Json,
}

/// Verbosity of logging.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Logging disabled.
    Off,
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warn,
    /// Progress of the run.
    #[default]
    Info,
    /// Live windows and worker details.
    Debug,
    /// Everything.
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Logging to stderr. Stdout is reserved for the run report.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Maximum verbosity, `RB__LOGGING__LEVEL`. A level set in `RUST_LOG` wins.
    pub level: LogLevel,

    /// Line format, `RB__LOGGING__FORMAT`.
    pub format: LogFormat,
}

/// Live metrics, submitted to Datadog.
///
/// Used in: [`Config::metrics`]
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Metrics {
    /// Datadog API key, `RB__METRICS__DATADOG_KEY`. Metrics stay in-process without one.
    pub datadog_key: Option<SecretBox<Secret>>,

    /// Tags added to every metric, for example `RB__METRICS__TAGS__HOST=bench-1`.
    pub tags: BTreeMap<String, String>,
}

/// The complete configuration, loaded with [`Config::load`].
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The store under test. See [`Storage`] for available options.
    ///
    /// # Default
    ///
    /// A simulated store.
    pub storage: Storage,

    /// Credentials for S3-compatible stores.
    pub credentials: Credentials,

    /// Benchmark parameters, set through `RB__BENCHMARK__<FIELD>`.
    pub benchmark: BenchmarkConfig,

    /// Where run results are written.
    pub output: Output,

    /// Async runtime sizing.
    pub runtime: Runtime,

    /// Log level and format.
    pub logging: Logging,

    /// Error reporting.
    pub sentry: Sentry,

    /// Datadog metrics.
    pub metrics: Metrics,
}

impl Config {
    /// Loads the configuration, optionally reading the YAML file at `path`.
    ///
    /// Environment variables override the file, which overrides the defaults. Fails if the file
    /// cannot be read or a value does not parse.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut sources = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            sources = sources.merge(Yaml::file(path));
        }

        let config: Self = sources
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.runtime.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert!(matches!(config.storage, Storage::Simulated { .. }));
            assert_eq!(config.benchmark, BenchmarkConfig::default());
            assert_eq!(config.output.dir, PathBuf::from("results"));
            assert!(!config.sentry.is_enabled());

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RB__STORAGE__TYPE", "r2");
            jail.set_env("RB__STORAGE__ACCOUNT_ID", "abc123");
            jail.set_env("RB__STORAGE__BUCKET", "bench");
            jail.set_env("RB__CREDENTIALS__ACCESS_KEY_ID", "AKIA");
            jail.set_env("RB__CREDENTIALS__SECRET_ACCESS_KEY", "hunter2");
            jail.set_env("RB__BENCHMARK__RANGE_SIZE", "64MiB");
            jail.set_env("RB__BENCHMARK__WARMUP", "30s");
            jail.set_env("RB__BENCHMARK__MAX_CONCURRENCY", "64");
            jail.set_env("RB__BENCHMARK__PLATEAU__GROWTH_THRESHOLD", "0.02");
            jail.set_env("RB__METRICS__TAGS__HOST", "bench-1");
            jail.set_env("RB__LOGGING__LEVEL", "debug");

            let config = Config::load(None).unwrap();

            let Storage::R2 { account_id, bucket } = &dbg!(&config).storage else {
                panic!("expected r2 storage");
            };
            assert_eq!(account_id, "abc123");
            assert_eq!(bucket, "bench");

            let credentials = &config.credentials;
            let secret = credentials.secret_access_key.as_ref().unwrap();
            assert_eq!(secret.expose_secret().as_str(), "hunter2");
            assert_eq!(
                credentials.access_key_id.as_ref().unwrap().expose_secret().as_str(),
                "AKIA"
            );

            assert_eq!(config.benchmark.range_size, ByteSize::mib(64));
            assert_eq!(config.benchmark.warmup, Duration::from_secs(30));
            assert_eq!(config.benchmark.max_concurrency, 64);
            assert_eq!(config.benchmark.plateau.growth_threshold, 0.02);
            // untouched fields keep their defaults
            assert_eq!(config.benchmark.object_size, ByteSize::gib(1));

            assert_eq!(config.metrics.tags, [("host".into(), "bench-1".into())].into());
            assert_eq!(config.logging.level, LogLevel::Debug);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            storage:
                type: custom
                endpoint: http://localhost:9000
                bucket: bench
                path_style: true
            benchmark:
                object_count: 4
                steady_state: 1h
                abort_on_error_rate:
                    max_error_rate: 0.2
            output:
                outcomes: false
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            let Storage::Custom {
                endpoint,
                region,
                bucket,
                path_style,
            } = &dbg!(&config).storage
            else {
                panic!("expected custom storage");
            };
            assert_eq!(endpoint, "http://localhost:9000");
            assert_eq!(region, "us-east-1");
            assert_eq!(bucket, "bench");
            assert!(path_style);

            assert_eq!(config.benchmark.object_count, 4);
            assert_eq!(config.benchmark.steady_state, Duration::from_secs(3600));
            let abort = config.benchmark.abort_on_error_rate.as_ref().unwrap();
            assert_eq!(abort.max_error_rate, 0.2);
            assert_eq!(abort.min_requests, 10);
            assert!(!config.output.outcomes);

            Ok(())
        });
    }

    #[test]
    fn configured_with_env_and_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            storage:
                type: s3
                region: us-east-1
                bucket: bench
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("RB__STORAGE__REGION", "eu-west-1");

            let config = Config::load(Some(tempfile.path())).unwrap();

            let Storage::S3 { region, .. } = &dbg!(&config).storage else {
                panic!("expected s3 storage");
            };
            // Env should overwrite the yaml config
            assert_eq!(region, "eu-west-1");

            Ok(())
        });
    }

    #[test]
    fn rejects_zero_runtime_settings() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RB__RUNTIME__METRICS_INTERVAL", "0s");
            let error = Config::load(None).unwrap_err();
            assert!(error.to_string().contains("metrics_interval"));

            jail.set_env("RB__RUNTIME__METRICS_INTERVAL", "5s");
            jail.set_env("RB__RUNTIME__WORKER_THREADS", "0");
            let error = Config::load(None).unwrap_err();
            assert!(error.to_string().contains("worker_threads"));

            jail.set_env("RB__RUNTIME__WORKER_THREADS", "2");
            let config = Config::load(None).unwrap();
            assert_eq!(config.runtime.metrics_interval, Duration::from_secs(5));

            Ok(())
        });
    }

    #[test]
    fn secrets_are_redacted() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RB__METRICS__DATADOG_KEY", "very-secret");

            let config = Config::load(None).unwrap();
            let debug = format!("{config:?}");
            assert!(!debug.contains("very-secret"));

            Ok(())
        });
    }
}
