//! Live metrics of a run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rangebench_engine::{
    HostSample, MetricsExporter, Phase, RequestOutcome, WindowKind, WindowStats,
};

/// Pushes live benchmark metrics to merni and the log.
///
/// Metrics only leave the process if a Datadog key is configured. Live windows are logged at
/// `DEBUG`, phase windows are logged by the engine itself.
#[derive(Debug, Default)]
pub struct RunExporter {
    live_windows: AtomicU64,
}

impl RunExporter {
    /// Creates a new exporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live windows exported so far.
    pub fn live_windows(&self) -> u64 {
        self.live_windows.load(Ordering::Relaxed)
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[async_trait::async_trait]
impl MetricsExporter for RunExporter {
    fn outcome(&self, outcome: &RequestOutcome) {
        let phase = outcome.phase.phase().as_str();
        merni::counter!(
            "requests": 1,
            "status" => outcome.status.as_str(),
            "phase" => phase
        );

        if outcome.is_success() {
            merni::distribution!(
                "request.latency"@s: outcome.latency,
                "phase" => phase
            );
            merni::distribution!("request.size"@b: outcome.bytes, "phase" => phase);
        }
    }

    fn window(&self, kind: WindowKind, stats: &WindowStats) {
        let window = match kind {
            WindowKind::Live => "live",
            WindowKind::Phase => "phase",
        };
        merni::gauge!(
            "window.throughput"@b: (stats.throughput_bps / 8.0) as u64,
            "window" => window
        );
        merni::gauge!("window.requests": stats.requests, "window" => window);
        merni::gauge!("window.errors": stats.errors, "window" => window);

        if kind == WindowKind::Live {
            self.live_windows.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                label = %stats.label,
                concurrency = stats.concurrency,
                requests = stats.requests,
                errors = stats.errors,
                throughput_gbps = stats.throughput_gbps(),
                p50_ms = millis(stats.latency.p50),
                p99_ms = millis(stats.latency.p99),
                "Live window"
            );
        }
    }

    fn concurrency(&self, level: usize) {
        merni::gauge!("concurrency": level as u64);
    }

    fn phase(&self, phase: Phase) {
        merni::counter!("phase.entered": 1, "phase" => phase.as_str());
    }

    fn host(&self, sample: &HostSample) {
        merni::gauge!("host.cpu_pct": sample.cpu_utilization_pct.round() as u64);
        merni::gauge!("host.network.in"@b: sample.network_bytes_in);
        merni::gauge!("host.network.out"@b: sample.network_bytes_out);
        if let Some(retransmits) = sample.tcp_retransmits {
            merni::gauge!("host.tcp_retransmits": retransmits);
        }
    }

    fn dropped(&self, total: u64) {
        merni::gauge!("outcomes.dropped": total);
    }

    async fn stop(&self) {
        tracing::debug!(live_windows = self.live_windows(), "Exporter stopped");
    }
}
