//! Logging, error reporting and metrics setup.

use std::env;
use std::io::IsTerminal;

use secrecy::ExposeSecret;
use sentry::integrations::tracing as sentry_tracing;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{Config, LogFormat};

/// Initializes the Datadog metrics exporter if an API key is configured.
pub fn init_metrics(config: &Config) -> std::io::Result<Option<merni::DatadogFlusher>> {
    config
        .metrics
        .datadog_key
        .as_ref()
        .map(|api_key| {
            let mut builder = merni::datadog(api_key.expose_secret().as_str()).prefix("rangebench.");
            for (k, v) in &config.metrics.tags {
                builder = builder.global_tag(k, v);
            }
            builder.try_init()
        })
        .transpose()
}

/// Initializes Sentry if a DSN is configured. Must be called before the runtime starts.
pub fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let sentry_config = &config.sentry;
    let dsn = sentry_config.dsn.as_ref()?;

    let guard = sentry::init(sentry::ClientOptions {
        dsn: dsn.expose_secret().as_str().parse().ok(),
        release: sentry::release_name!(),
        environment: sentry_config.environment.clone().map(Into::into),
        server_name: sentry_config.server_name.clone().map(Into::into),
        enable_logs: true,
        sample_rate: sentry_config.sample_rate,
        traces_sample_rate: sentry_config.traces_sample_rate,
        debug: sentry_config.debug,
        ..Default::default()
    });

    sentry::configure_scope(|scope| {
        for (k, v) in &sentry_config.tags {
            scope.set_tag(k, v);
        }
    });

    Some(guard)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
    Json,
    Pretty,
    Compact,
    Plain,
}

fn layout(format: LogFormat, terminal: bool) -> Layout {
    match format {
        LogFormat::Json => Layout::Json,
        LogFormat::Pretty => Layout::Pretty,
        LogFormat::Auto if terminal => Layout::Compact,
        LogFormat::Auto | LogFormat::Simplified => Layout::Plain,
    }
}

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    // Warnings and errors become events, everything down to INFO is forwarded as logs.
    let sentry_layer = config.sentry.is_enabled().then(|| {
        sentry_tracing::layer().event_filter(|metadata| {
            let level = *metadata.level();
            if level <= Level::WARN {
                sentry_tracing::EventFilter::Event | sentry_tracing::EventFilter::Log
            } else if level == Level::INFO {
                sentry_tracing::EventFilter::Log
            } else {
                sentry_tracing::EventFilter::Ignore
            }
        })
    });

    let (level, env_filter) = parse_rust_log(config.logging.level.into());
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let format = match layout(config.logging.format, std::io::stderr().is_terminal()) {
        Layout::Json => format.json().flatten_event(true).boxed(),
        Layout::Pretty => format.pretty().boxed(),
        Layout::Compact => format.compact().boxed(),
        Layout::Plain => format.with_ansi(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(sentry_layer)
        .with(env_filter)
        .init();
}

/// Returns the effective level and the filter of internal modules.
///
/// `RUST_LOG` takes precedence over the configured level. A plain level in `RUST_LOG` applies
/// the default per-crate overrides, anything else is used literally.
pub fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<Level>() {
            Ok(level) => LevelFilter::from(level),
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // Upper bound per crate, the fmt layer narrows this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        rangebench_cli=TRACE,\
        rangebench_engine=TRACE,\
        rangebench_backend=TRACE,\
        ",
    );

    (level, env_filter)
}
