use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::export::MetricsExporter;

/// A snapshot of host statistics.
///
/// Network counters are cumulative since boot. CPU utilization covers the time since the previous
/// sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct HostSample {
    /// CPU utilization across all cores in percent.
    pub cpu_utilization_pct: f32,
    /// Bytes received on all interfaces.
    pub network_bytes_in: u64,
    /// Bytes sent on all interfaces.
    pub network_bytes_out: u64,
    /// TCP segments retransmitted, where the platform exposes them.
    pub tcp_retransmits: Option<u64>,
}

/// Errors sampling host statistics. Never fatal to a run.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Reading a statistics source failed.
    #[error("failed to read host statistics")]
    Io(#[from] io::Error),
    /// The platform does not provide the statistic.
    #[error("host statistics unavailable: {0}")]
    Unavailable(String),
}

/// A source of host statistics, polled periodically while the benchmark runs.
pub trait SystemMonitor: Send + 'static {
    /// Takes a sample.
    fn sample(&mut self) -> Result<HostSample, MonitorError>;
}

/// Host statistics over the whole run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HostReport {
    /// Number of successful samples.
    pub samples: u64,
    /// Number of failed samples.
    pub failures: u64,
    /// Mean CPU utilization over all samples in percent.
    pub avg_cpu_pct: f32,
    /// Highest CPU utilization of any sample in percent.
    pub peak_cpu_pct: f32,
    /// Bytes received between the first and the last sample.
    pub network_bytes_in: u64,
    /// Bytes sent between the first and the last sample.
    pub network_bytes_out: u64,
    /// Retransmitted TCP segments between the first and the last sample.
    pub tcp_retransmits: Option<u64>,
}

impl HostReport {
    /// Returns `true` if any sample failed.
    pub fn degraded(&self) -> bool {
        self.failures > 0
    }
}

#[derive(Debug, Default)]
struct ReportBuilder {
    first: Option<HostSample>,
    last: Option<HostSample>,
    cpu_sum: f64,
    report: HostReport,
}

impl ReportBuilder {
    fn record(&mut self, sample: HostSample) {
        self.first.get_or_insert(sample);
        self.last = Some(sample);
        self.cpu_sum += f64::from(sample.cpu_utilization_pct);
        self.report.samples += 1;
        self.report.peak_cpu_pct = self.report.peak_cpu_pct.max(sample.cpu_utilization_pct);
    }

    fn finish(mut self) -> HostReport {
        if let (Some(first), Some(last)) = (self.first, self.last) {
            self.report.avg_cpu_pct = (self.cpu_sum / self.report.samples as f64) as f32;
            self.report.network_bytes_in = last.network_bytes_in.saturating_sub(first.network_bytes_in);
            self.report.network_bytes_out =
                last.network_bytes_out.saturating_sub(first.network_bytes_out);
            self.report.tcp_retransmits = last
                .tcp_retransmits
                .zip(first.tcp_retransmits)
                .map(|(last, first)| last.saturating_sub(first));
        }
        self.report
    }
}

/// Polls a [`SystemMonitor`] on a background task.
pub(crate) struct MonitorTask {
    token: CancellationToken,
    task: JoinHandle<HostReport>,
}

impl MonitorTask {
    pub fn spawn(
        mut monitor: Box<dyn SystemMonitor>,
        interval: Duration,
        exporter: Arc<dyn MetricsExporter>,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            let mut builder = ReportBuilder::default();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancelled.cancelled() => break,
                }

                match monitor.sample() {
                    Ok(sample) => {
                        exporter.host(&sample);
                        builder.record(sample);
                    }
                    Err(err) => {
                        if builder.report.failures == 0 {
                            tracing::warn!(
                                error = &err as &dyn std::error::Error,
                                "Host monitoring degraded, continuing without host statistics"
                            );
                        }
                        builder.report.failures += 1;
                    }
                }
            }

            builder.finish()
        });

        Self { token, task }
    }

    pub async fn stop(self) -> HostReport {
        self.token.cancel();
        self.task.await.unwrap_or_default()
    }
}
