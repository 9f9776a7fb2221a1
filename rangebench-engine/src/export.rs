use std::fmt::Debug;

use crate::aggregator::WindowStats;
use crate::monitor::HostSample;
use crate::outcome::RequestOutcome;
use crate::phase::Phase;

/// The kind of a closed window passed to [`MetricsExporter::window`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowKind {
    /// A short fixed-width window exported continuously while running.
    Live,
    /// The window of a warmup, ramp step or steady-state phase.
    Phase,
}

/// Push-only sink for live metrics.
///
/// The exporter is a single explicit instance owned by the controller and shared with the
/// collector and monitor tasks. All methods except [`stop`](Self::stop) are called from hot paths
/// and must not block. Every method has an empty default, so exporters only implement what they
/// need.
#[async_trait::async_trait]
pub trait MetricsExporter: Debug + Send + Sync + 'static {
    /// Called for every outcome consumed from the result sink.
    fn outcome(&self, _outcome: &RequestOutcome) {}

    /// Called when a window closes.
    fn window(&self, _kind: WindowKind, _stats: &WindowStats) {}

    /// Called when the target concurrency changes.
    fn concurrency(&self, _level: usize) {}

    /// Called when the run enters a new phase.
    fn phase(&self, _phase: Phase) {}

    /// Called for every host statistics sample.
    fn host(&self, _sample: &HostSample) {}

    /// Called with the running total of dropped outcomes.
    fn dropped(&self, _total: u64) {}

    /// Flushes and shuts down the exporter. Called once at termination.
    async fn stop(&self) {}
}

/// A [`MetricsExporter`] that ignores everything.
#[derive(Debug, Default)]
pub struct NoopExporter;

#[async_trait::async_trait]
impl MetricsExporter for NoopExporter {}
