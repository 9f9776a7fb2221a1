use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rangebench_backend::{SharedClient, StorageClient};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{MetricsAggregator, WindowBounds, WindowStats};
use crate::clock::RunClock;
use crate::collector::CollectorHandle;
use crate::config::BenchmarkConfig;
use crate::error::EngineError;
use crate::export::{MetricsExporter, NoopExporter};
use crate::monitor::{MonitorTask, SystemMonitor};
use crate::persistence::{DiscardPersistence, PersistenceHandle, ResultPersistence};
use crate::phase::{Phase, PhaseLabel, PhaseTracker};
use crate::plateau::{PlateauDetector, PlateauState, StepSample, StopReason, Verdict};
use crate::pool::WorkerPool;
use crate::sampler::RequestSampler;
use crate::sink::result_sink;
use crate::summary::TerminalSummary;
use crate::worker::{StepTag, WorkerContext};

/// Runs a benchmark from warmup to termination.
///
/// The controller owns every piece of run state: the phase, the target concurrency, the plateau
/// history and the worker pool. Collaborators are injected before the run starts:
///
/// ```ignore
/// let summary = PhaseController::new(config, client)
///     .with_exporter(exporter)
///     .with_persistence(writer)
///     .with_cancellation(token.clone())
///     .run()
///     .await?;
/// ```
///
/// Cancelling the token moves the run into draining from whichever phase is active. The run
/// then still terminates normally and returns a summary.
pub struct PhaseController {
    config: BenchmarkConfig,
    client: SharedClient,
    exporter: Arc<dyn MetricsExporter>,
    persistence: Box<dyn ResultPersistence>,
    monitor: Option<Box<dyn SystemMonitor>>,
    cancel: CancellationToken,
}

impl PhaseController {
    /// Creates a controller that discards outcomes and exports nothing.
    pub fn new(config: BenchmarkConfig, client: SharedClient) -> Self {
        Self {
            config,
            client,
            exporter: Arc::new(NoopExporter),
            persistence: Box::new(DiscardPersistence),
            monitor: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Pushes live metrics to `exporter`. The exporter is stopped when the run terminates.
    pub fn with_exporter(mut self, exporter: Arc<dyn MetricsExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    /// Stores every consumed outcome in `persistence`.
    pub fn with_persistence(mut self, persistence: impl ResultPersistence) -> Self {
        self.persistence = Box::new(persistence);
        self
    }

    /// Samples host statistics from `monitor` while running.
    pub fn with_monitor(mut self, monitor: impl SystemMonitor) -> Self {
        self.monitor = Some(Box::new(monitor));
        self
    }

    /// Uses `token` to cancel the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the token that cancels this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the benchmark to completion.
    ///
    /// Only an invalid configuration or a failed pre-flight check return an error, both before
    /// any worker has started. Request failures are recorded in the statistics instead.
    pub async fn run(self) -> Result<TerminalSummary, EngineError> {
        let Self {
            config,
            client,
            exporter,
            persistence,
            monitor,
            cancel,
        } = self;

        config.validate()?;
        let sampler = RequestSampler::new(
            config.object_keys(),
            config.object_size.as_u64(),
            config.range_size.as_u64(),
        )?;
        preflight(client.as_ref(), &sampler, config.object_size.as_u64()).await?;

        tracing::info!(
            backend = client.name(),
            endpoint = %client.endpoint(),
            objects = config.object_count,
            object_size = %config.object_size,
            range_size = %config.range_size,
            "Starting benchmark"
        );

        let started = Instant::now();
        let clock = RunClock::start();
        let (sink, receiver) = result_sink(config.sink_capacity);
        let collector = CollectorHandle::spawn(
            receiver,
            PersistenceHandle::spawn(persistence),
            Arc::clone(&exporter),
            clock,
            config.live_window,
        );
        let monitor = monitor
            .map(|monitor| MonitorTask::spawn(monitor, config.monitor_interval, Arc::clone(&exporter)));

        let (step, step_rx) = watch::channel(StepTag {
            label: PhaseLabel::Warmup,
            concurrency: config.initial_concurrency,
        });
        let context = WorkerContext::new(Arc::clone(&client), sampler, sink, clock, step_rx)
            .with_request_timeout(config.request_timeout)
            .with_max_retries(config.retry.max_retries);
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let pool = WorkerPool::new(Arc::new(context), cancel.child_token(), seed);

        let detector = PlateauDetector::new(
            config.plateau.clone(),
            config.initial_concurrency,
            config.ramp_step,
            config.max_concurrency,
        );

        let mut run = Run {
            config,
            clock,
            collector,
            pool,
            step,
            exporter,
            cancel,
            tracker: PhaseTracker::new(),
            plateau: PlateauState::new(detector),
            warmup: None,
            ramp: Vec::new(),
            steady_state: None,
            interrupted: None,
        };
        run.execute().await;

        let mut summary = run.terminate(monitor).await;
        summary.backend = client.name().to_owned();
        summary.endpoint = client.endpoint();
        summary.elapsed = started.elapsed();

        tracing::info!(
            cancelled = summary.cancelled,
            selected_concurrency = ?summary.selected_concurrency(),
            dropped = summary.dropped_outcomes,
            "Benchmark finished"
        );
        Ok(summary)
    }
}

impl fmt::Debug for PhaseController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseController")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("exporter", &self.exporter)
            .finish_non_exhaustive()
    }
}

/// Verifies that every object of the pool exists and is large enough.
async fn preflight(
    client: &dyn StorageClient,
    sampler: &RequestSampler,
    object_size: u64,
) -> Result<(), EngineError> {
    let checks = sampler.keys().iter().map(|key| async move {
        let size = match client.object_size(key).await {
            Ok(size) => size,
            Err(cause) => {
                return Err(EngineError::Preflight {
                    key: key.to_string(),
                    cause,
                });
            }
        };

        match size {
            None => Err(EngineError::MissingObject {
                key: key.to_string(),
            }),
            Some(size) if size < object_size => Err(EngineError::ObjectTooSmall {
                key: key.to_string(),
                size,
                required: object_size,
            }),
            Some(_) => Ok(()),
        }
    });

    futures::future::try_join_all(checks).await?;
    Ok(())
}

enum WindowEnd {
    Completed(WindowStats),
    Interrupted(WindowStats),
}

/// The state of a run in progress.
struct Run {
    config: BenchmarkConfig,
    clock: RunClock,
    collector: CollectorHandle,
    pool: WorkerPool,
    step: watch::Sender<StepTag>,
    exporter: Arc<dyn MetricsExporter>,
    cancel: CancellationToken,
    tracker: PhaseTracker,
    plateau: PlateauState,
    warmup: Option<WindowStats>,
    ramp: Vec<WindowStats>,
    steady_state: Option<WindowStats>,
    interrupted: Option<WindowStats>,
}

impl Run {
    /// Runs warmup, ramp and steady state, stopping early on cancellation.
    async fn execute(&mut self) {
        self.exporter.phase(Phase::Warmup);
        let initial = self.config.initial_concurrency;
        let warmup = self.config.warmup;
        match self.measure(PhaseLabel::Warmup, initial, warmup, 0.0).await {
            WindowEnd::Completed(stats) => self.warmup = Some(stats),
            WindowEnd::Interrupted(stats) => {
                self.interrupted = Some(stats);
                return;
            }
        }

        self.enter(Phase::Ramping);
        let Some(concurrency) = self.ramp().await else {
            return;
        };

        self.enter(Phase::SteadyState);
        let duration = self.config.steady_state;
        match self
            .measure(PhaseLabel::SteadyState, concurrency, duration, 0.0)
            .await
        {
            WindowEnd::Completed(stats) => self.steady_state = Some(stats),
            WindowEnd::Interrupted(stats) => self.interrupted = Some(stats),
        }
    }

    /// Ramps until the plateau detector stops. Returns the steady-state concurrency, or `None`
    /// if the run must not continue.
    async fn ramp(&mut self) -> Option<usize> {
        let duration = self.config.ramp_step_duration;
        let warm_fraction = self.config.warm_fraction;
        let mut concurrency = self.config.initial_concurrency;
        let mut step = 1;

        loop {
            let label = PhaseLabel::Ramp(step);
            let stats = match self.measure(label, concurrency, duration, warm_fraction).await {
                WindowEnd::Completed(stats) => stats,
                WindowEnd::Interrupted(stats) => {
                    self.interrupted = Some(stats);
                    return None;
                }
            };

            if let Some(abort) = &self.config.abort_on_error_rate
                && stats.requests >= abort.min_requests
                && stats.error_rate > abort.max_error_rate
            {
                tracing::error!(
                    step,
                    concurrency,
                    error_rate = stats.error_rate,
                    "Error rate too high, aborting ramp"
                );
                self.ramp.push(stats);
                self.plateau.abort(StopReason::ErrorRate);
                return None;
            }

            let verdict = self.plateau.record(StepSample {
                concurrency,
                throughput_bps: stats.throughput_bps,
            });
            self.ramp.push(stats);

            match verdict {
                Verdict::Continue { next_concurrency } => {
                    concurrency = next_concurrency;
                    step += 1;
                }
                Verdict::Stop {
                    at_concurrency,
                    reason,
                } => {
                    tracing::info!(
                        concurrency = at_concurrency,
                        ?reason,
                        "Plateau found"
                    );
                    return Some(at_concurrency);
                }
            }
        }
    }

    fn enter(&mut self, phase: Phase) {
        if self.tracker.advance(phase, self.clock.offset()) {
            self.exporter.phase(phase);
        }
    }

    /// Runs one window at the given concurrency and returns its statistics.
    ///
    /// The leading `warm_fraction` of the window is excluded from the statistics. On
    /// cancellation the window is truncated at the moment of cancellation.
    async fn measure(
        &mut self,
        label: PhaseLabel,
        concurrency: usize,
        duration: Duration,
        warm_fraction: f64,
    ) -> WindowEnd {
        self.step.send_replace(StepTag { label, concurrency });
        self.pool.scale(concurrency);
        self.exporter.concurrency(concurrency);

        let start = self.clock.offset();
        let end = start + duration;
        let bounds = WindowBounds::new(start, end).skip_leading(warm_fraction);
        let id = self.collector.open(label, concurrency, bounds).await;
        tracing::debug!(%label, concurrency, "Window opened");

        let interrupted_at = tokio::select! {
            _ = tokio::time::sleep_until(self.clock.instant_at(end)) => None,
            _ = self.cancel.cancelled() => {
                self.pool.stop_all();
                Some(self.clock.offset())
            }
        };

        let stats = match self.collector.close(id, interrupted_at).await {
            Some(stats) => stats,
            None => MetricsAggregator::new(label, concurrency, bounds)
                .close_at(interrupted_at.unwrap_or(end)),
        };

        tracing::info!(
            %label,
            concurrency,
            requests = stats.requests,
            errors = stats.errors,
            throughput_gbps = stats.throughput_gbps(),
            p50_ms = stats.latency.p50.as_millis() as u64,
            p99_ms = stats.latency.p99.as_millis() as u64,
            "Window closed"
        );

        match interrupted_at {
            None => WindowEnd::Completed(stats),
            Some(_) => {
                tracing::info!(%label, "Run cancelled");
                WindowEnd::Interrupted(stats)
            }
        }
    }

    /// Drains the workers, flushes all pipelines and builds the summary.
    async fn terminate(mut self, monitor: Option<MonitorTask>) -> TerminalSummary {
        let cancelled = self.cancel.is_cancelled();

        // a cancellation outside of a window is observed here first
        self.enter(Phase::Draining);
        let forced_workers = self.pool.join(self.config.drain_grace).await;
        let admitted_after_stop = self.pool.admitted_after_stop();
        self.exporter.concurrency(0);

        self.enter(Phase::Terminated);
        let report = self.collector.shutdown().await;
        let host = match monitor {
            Some(monitor) => Some(monitor.stop().await),
            None => None,
        };
        self.exporter.stop().await;
        let ended = self.clock.offset();

        TerminalSummary {
            backend: String::new(),
            endpoint: String::new(),
            cancelled,
            phases: self.tracker.into_spans(ended),
            warmup: self.warmup,
            ramp: self.ramp,
            plateau_history: self.plateau.history().to_vec(),
            plateau: self.plateau.decision(),
            steady_state: self.steady_state,
            interrupted: self.interrupted,
            totals: report.totals,
            dropped_outcomes: report.dropped,
            persistence: report.persistence,
            forced_workers,
            admitted_after_stop,
            host,
            elapsed: Duration::ZERO,
        }
    }
}
