//! End-to-end runs of the phase controller against simulated object pools.
//!
//! All tests run with a paused clock, so phases of several virtual minutes finish instantly and
//! the simulated link behaves deterministically.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use rangebench_engine::{
    BenchmarkConfig, ConfigError, EngineError, ErrorRateAbort, MetricsExporter, Phase, PhaseController,
    PhaseLabel, RequestOutcome, ResultPersistence, StopReason, WindowKind, WindowStats,
};
use rangebench_test::backend::{PoolBuilder, shared};

const MIB: u64 = 1024 * 1024;

fn config() -> BenchmarkConfig {
    BenchmarkConfig {
        object_count: 3,
        object_prefix: "object-".to_owned(),
        object_size: ByteSize::mib(4),
        range_size: ByteSize::mib(1),
        warmup: Duration::from_secs(10),
        ramp_step_duration: Duration::from_secs(10),
        ramp_step: 2,
        initial_concurrency: 2,
        max_concurrency: 20,
        steady_state: Duration::from_secs(10),
        drain_grace: Duration::from_secs(5),
        seed: Some(7),
        ..Default::default()
    }
}

#[derive(Clone, Debug, Default)]
struct Counting {
    count: Arc<AtomicU64>,
    /// Latest issue offset of any persisted outcome, in milliseconds.
    latest_issue_ms: Arc<AtomicU64>,
}

impl Counting {
    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn latest_issue(&self) -> Duration {
        Duration::from_millis(self.latest_issue_ms.load(Ordering::Relaxed))
    }
}

impl ResultPersistence for Counting {
    fn write_batch(&mut self, batch: &[RequestOutcome]) -> io::Result<()> {
        self.count.fetch_add(batch.len() as u64, Ordering::Relaxed);
        for outcome in batch {
            self.latest_issue_ms
                .fetch_max(outcome.offset.as_millis() as u64, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Recorder {
    phases: Mutex<Vec<Phase>>,
    levels: Mutex<Vec<usize>>,
    live: Mutex<Vec<WindowStats>>,
    stops: AtomicU64,
}

#[async_trait::async_trait]
impl MetricsExporter for Recorder {
    fn window(&self, kind: WindowKind, stats: &WindowStats) {
        if kind == WindowKind::Live {
            self.live.lock().unwrap().push(stats.clone());
        }
    }

    fn concurrency(&self, level: usize) {
        self.levels.lock().unwrap().push(level);
    }

    fn phase(&self, phase: Phase) {
        self.phases.lock().unwrap().push(phase);
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::test(start_paused = true)]
async fn finds_knee_of_saturated_link() -> Result<()> {
    rangebench_test::tracing::init();

    // Every worker needs 100ms + 25ms per 1MiB read, so the link saturates beyond 5 workers.
    let backend = PoolBuilder::new("object-", 3, 4 * MIB)
        .latency(Duration::from_millis(100))
        .bandwidth(40 * MIB)
        .build();
    let exporter = Arc::new(Recorder::default());
    let written = Counting::default();

    let summary = PhaseController::new(config(), shared(&backend))
        .with_exporter(exporter.clone())
        .with_persistence(written.clone())
        .run()
        .await?;

    let levels: Vec<_> = summary.ramp.iter().map(|step| step.concurrency).collect();
    assert_eq!(levels, [2, 4, 6, 8, 10]);
    let labels: Vec<_> = summary.ramp.iter().map(|step| step.label).collect();
    assert_eq!(labels[0], PhaseLabel::Ramp(1));
    assert_eq!(labels[4], PhaseLabel::Ramp(5));

    let decision = summary.plateau.unwrap();
    assert_eq!(decision.concurrency, 6);
    assert_eq!(decision.reason, StopReason::Plateau);

    let steady = summary.steady_state.as_ref().unwrap();
    assert_eq!(steady.concurrency, 6);
    assert_eq!(steady.label, PhaseLabel::SteadyState);
    let link_bps = (40 * MIB * 8) as f64;
    assert!((steady.throughput_bps - link_bps).abs() / link_bps < 0.05);
    assert_eq!(steady.errors, 0);

    assert!(!summary.cancelled);
    assert!(summary.interrupted.is_none());
    assert_eq!(summary.forced_workers, 0);
    assert_eq!(summary.admitted_after_stop, 0);
    assert_eq!(summary.dropped_outcomes, 0);
    assert_eq!(summary.totals.requests, backend.request_count());
    assert_eq!(summary.persistence.written, summary.totals.requests);
    assert_eq!(written.count(), summary.totals.requests);

    let phases: Vec<_> = summary.phases.iter().map(|span| span.phase).collect();
    assert!(summary.phases.windows(2).all(|w| w[0].end == w[1].start));
    let expected = [
        Phase::Warmup,
        Phase::Ramping,
        Phase::SteadyState,
        Phase::Draining,
        Phase::Terminated,
    ];
    assert_eq!(phases, expected);
    assert_eq!(*exporter.phases.lock().unwrap(), expected);
    assert_eq!(exporter.stops.load(Ordering::Relaxed), 1);

    // warmup, five ramp steps, steady state and the final drop to zero
    assert_eq!(
        *exporter.levels.lock().unwrap(),
        [2, 2, 4, 6, 8, 10, 6, 0]
    );

    let live = exporter.live.lock().unwrap();
    assert!(live.len() >= 70);
    assert!(live.windows(2).all(|w| w[0].bounds.start < w[1].bounds.start));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stops_at_max_concurrency() -> Result<()> {
    let backend = PoolBuilder::new("object-", 3, 4 * MIB)
        .latency(Duration::from_millis(100))
        .build();
    let config = BenchmarkConfig {
        max_concurrency: 6,
        ..config()
    };

    let summary = PhaseController::new(config, shared(&backend)).run().await?;

    let decision = summary.plateau.unwrap();
    assert_eq!(decision.reason, StopReason::MaxConcurrency);
    assert_eq!(decision.concurrency, 6);
    assert_eq!(summary.ramp.len(), 3);
    assert_eq!(summary.selected_concurrency(), Some(6));

    // without a link limit, throughput scales with concurrency
    let throughput: Vec<_> = summary.ramp.iter().map(|s| s.throughput_bps).collect();
    assert!(throughput.windows(2).all(|w| w[1] > w[0]));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancellation_drains_and_summarizes() -> Result<()> {
    let backend = PoolBuilder::new("object-", 3, 4 * MIB)
        .latency(Duration::from_millis(100))
        .build();
    let written = Counting::default();

    let controller = PhaseController::new(config(), shared(&backend)).with_persistence(written.clone());
    let token = controller.cancellation_token();

    let (summary, ()) = tokio::join!(controller.run(), async {
        // halfway through the first ramp step
        tokio::time::sleep(Duration::from_secs(15)).await;
        token.cancel();
    });
    let summary = summary?;

    assert!(summary.cancelled);
    assert!(summary.warmup.is_some());
    assert!(summary.ramp.is_empty());
    assert!(summary.plateau.is_none());
    assert!(summary.steady_state.is_none());

    let interrupted = summary.interrupted.as_ref().unwrap();
    assert_eq!(interrupted.label, PhaseLabel::Ramp(1));
    assert_eq!(interrupted.bounds.end, Duration::from_secs(15));
    assert!(interrupted.requests > 0);

    let phases: Vec<_> = summary.phases.iter().map(|span| span.phase).collect();
    assert_eq!(
        phases,
        [
            Phase::Warmup,
            Phase::Ramping,
            Phase::Draining,
            Phase::Terminated
        ]
    );

    // no request was issued after the cancellation, and every admitted one was accounted for
    assert_eq!(summary.admitted_after_stop, 0);
    assert!(written.latest_issue() <= Duration::from_secs(15));
    assert_eq!(summary.forced_workers, 0);
    assert_eq!(summary.dropped_outcomes, 0);
    assert_eq!(summary.totals.requests, backend.request_count());
    assert_eq!(written.count(), summary.totals.requests);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn error_rate_aborts_ramp() -> Result<()> {
    let backend = PoolBuilder::new("object-", 3, 4 * MIB)
        .latency(Duration::from_millis(100))
        .fail_every(2)
        .build();
    let config = BenchmarkConfig {
        abort_on_error_rate: Some(ErrorRateAbort {
            max_error_rate: 0.4,
            min_requests: 10,
        }),
        ..config()
    };

    let summary = PhaseController::new(config, shared(&backend)).run().await?;

    assert!(!summary.cancelled);
    assert_eq!(summary.ramp.len(), 1);
    assert!(summary.ramp[0].error_rate > 0.4);
    assert_eq!(summary.plateau.unwrap().reason, StopReason::ErrorRate);
    assert!(summary.steady_state.is_none());
    assert!(summary.totals.http_errors > 0);

    Ok(())
}

#[tokio::test]
async fn rejects_range_larger_than_objects() {
    let backend = PoolBuilder::new("object-", 3, 4 * MIB).build();
    let config = BenchmarkConfig {
        range_size: ByteSize::mib(8),
        ..config()
    };

    let result = PhaseController::new(config, shared(&backend)).run().await;
    assert!(matches!(
        result,
        Err(EngineError::Config(ConfigError::RangeExceedsObject { .. }))
    ));
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test]
async fn rejects_missing_objects() {
    let backend = PoolBuilder::new("object-", 2, 4 * MIB).build();

    let result = PhaseController::new(config(), shared(&backend)).run().await;
    match result {
        Err(EngineError::MissingObject { key }) => assert_eq!(key, "object-2"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test]
async fn rejects_undersized_objects() {
    let backend = PoolBuilder::new("object-", 3, 2 * MIB).build();

    let result = PhaseController::new(config(), shared(&backend)).run().await;
    assert!(matches!(
        result,
        Err(EngineError::ObjectTooSmall { size, required, .. })
            if size == 2 * MIB && required == 4 * MIB
    ));
}
