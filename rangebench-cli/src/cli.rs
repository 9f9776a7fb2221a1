//! Command line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use argh::FromArgs;
use rangebench_engine::PhaseController;

use crate::config::Config;
use crate::export::RunExporter;
use crate::monitor::HostMonitor;
use crate::output::{self, JsonLines};
use crate::{observability, prepare, report, runtime, storage};

/// Adaptive range-read benchmark for S3-compatible object stores.
#[derive(Debug, FromArgs)]
struct Args {
    /// YAML file with benchmark and storage settings
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Prepare(PrepareCommand),
    Check(CheckCommand),
    Version(VersionCommand),
}

/// run the benchmark against the configured store
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// upload missing benchmark objects to the configured store
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "prepare")]
struct PrepareCommand {
    /// number of concurrent uploads
    #[argh(option, default = "4")]
    concurrency: usize,
}

/// verify that all benchmark objects exist and can be read
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "check")]
struct CheckCommand {}

/// print the rangebench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Parses the command line, sets up observability and runs the selected command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();
    if matches!(args.command, Command::Version(_)) {
        println!("rangebench {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    // The Sentry client has to exist before any runtime thread is spawned.
    let _sentry = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("rangebench-rt")
        .worker_threads(config.runtime.worker_threads)
        .enable_all()
        .build()?;
    let _entered = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);
    let metrics = observability::init_metrics(&config)?;

    let result = runtime.block_on(dispatch(args.command, config));

    // Submit what was collected, also when the command failed.
    if let Some(metrics) = metrics {
        runtime.block_on(metrics.flush(None)).ok();
    }

    result
}

async fn dispatch(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Run(RunCommand {}) => run(config).await,
        Command::Prepare(PrepareCommand { concurrency }) => {
            let client = storage::client(&config)?;
            prepare::prepare(client, &config.benchmark, concurrency).await
        }
        Command::Check(CheckCommand {}) => {
            let client = storage::client(&config)?;
            prepare::check(client, &config.benchmark).await
        }
        Command::Version(VersionCommand {}) => Ok(()),
    }
}

async fn run(config: Config) -> Result<()> {
    let client = storage::client(&config)?;
    let run_dir = output::create_run_dir(&config.output.dir)?;
    tracing::info!(dir = %run_dir.display(), "Writing results");

    let mut controller = PhaseController::new(config.benchmark.clone(), client)
        .with_exporter(Arc::new(RunExporter::new()));
    if config.output.outcomes {
        let outcomes = JsonLines::create(&run_dir.join("outcomes.jsonl"))?;
        controller = controller.with_persistence(outcomes);
    }
    if config.output.host_monitor {
        controller = controller.with_monitor(HostMonitor::new());
    }

    let token = controller.cancellation_token();
    let signals = tokio::spawn(async move {
        elegant_departure::tokio::depart()
            .on_termination()
            .on_sigint()
            .await;
        tracing::warn!("Received shutdown signal, draining");
        token.cancel();
    });
    let gauges = tokio::spawn(runtime::report_runtime_gauges(
        config.runtime.metrics_interval,
    ));

    let result = controller.run().await;
    signals.abort();
    gauges.abort();

    let summary = result?;
    report::print_summary(&summary);

    let path = run_dir.join("summary.json");
    output::write_summary(&path, &summary)?;
    println!("\nresults written to {}", run_dir.display());

    Ok(())
}
