use std::time::Duration;

use serde::Serialize;
use sketches_ddsketch::DDSketch;

use crate::aggregator::WindowStats;
use crate::monitor::HostReport;
use crate::outcome::{OutcomeStatus, RequestOutcome};
use crate::persistence::PersistenceReport;
use crate::phase::PhaseSpan;
use crate::plateau::{PlateauDecision, StepSample};

/// Approximate latency distribution over a whole run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LatencySketchSummary {
    /// Number of successful requests in the sketch.
    pub count: usize,
    /// Mean latency.
    #[serde(rename = "avg_ms", with = "crate::millis")]
    pub avg: Duration,
    /// Median latency.
    #[serde(rename = "p50_ms", with = "crate::millis")]
    pub p50: Duration,
    /// 90th percentile latency.
    #[serde(rename = "p90_ms", with = "crate::millis")]
    pub p90: Duration,
    /// 99th percentile latency.
    #[serde(rename = "p99_ms", with = "crate::millis")]
    pub p99: Duration,
}

impl LatencySketchSummary {
    fn from_sketch(sketch: &DDSketch) -> Option<Self> {
        let count = sketch.count();
        if count == 0 {
            return None;
        }

        let quantile = |q| {
            let seconds = sketch.quantile(q).ok().flatten()?;
            Some(Duration::from_secs_f64(seconds.max(0.0)))
        };

        Some(Self {
            count,
            avg: Duration::from_secs_f64((sketch.sum()? / count as f64).max(0.0)),
            p50: quantile(0.5)?,
            p90: quantile(0.9)?,
            p99: quantile(0.99)?,
        })
    }
}

/// Counters over every outcome consumed during a run, in all phases.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunTotals {
    /// All consumed outcomes.
    pub requests: u64,
    /// Successful requests.
    pub successes: u64,
    /// Requests answered with a non-success status.
    pub http_errors: u64,
    /// Requests that failed below HTTP.
    pub transport_errors: u64,
    /// Requests that timed out.
    pub timeouts: u64,
    /// Body bytes received.
    pub bytes: u64,
    /// Latency of successful requests.
    pub latency: Option<LatencySketchSummary>,
}

#[derive(Default)]
pub(crate) struct TotalsBuilder {
    totals: RunTotals,
    sketch: DDSketch,
}

impl TotalsBuilder {
    pub fn record(&mut self, outcome: &RequestOutcome) {
        let totals = &mut self.totals;
        totals.requests += 1;
        totals.bytes += outcome.bytes;

        match outcome.status {
            OutcomeStatus::Success => {
                totals.successes += 1;
                self.sketch.add(outcome.latency.as_secs_f64());
            }
            OutcomeStatus::HttpError => totals.http_errors += 1,
            OutcomeStatus::Transport => totals.transport_errors += 1,
            OutcomeStatus::Timeout => totals.timeouts += 1,
        }
    }

    pub fn finish(self) -> RunTotals {
        RunTotals {
            latency: LatencySketchSummary::from_sketch(&self.sketch),
            ..self.totals
        }
    }
}

/// The result of a benchmark run.
#[derive(Clone, Debug, Serialize)]
pub struct TerminalSummary {
    /// Name of the storage backend.
    pub backend: String,
    /// Endpoint of the storage backend.
    pub endpoint: String,
    /// Whether the run was cancelled before completing the steady state.
    pub cancelled: bool,
    /// Time spans of all phases that were entered.
    pub phases: Vec<PhaseSpan>,
    /// Statistics of the warmup window.
    pub warmup: Option<WindowStats>,
    /// Statistics of all completed ramp steps.
    pub ramp: Vec<WindowStats>,
    /// The step samples the plateau detector evaluated.
    pub plateau_history: Vec<StepSample>,
    /// The plateau decision, if ramping completed.
    pub plateau: Option<PlateauDecision>,
    /// Statistics of the steady-state window, if it completed.
    pub steady_state: Option<WindowStats>,
    /// Truncated statistics of the window that was active when the run was cancelled.
    pub interrupted: Option<WindowStats>,
    /// Counters over all outcomes of the run.
    pub totals: RunTotals,
    /// Outcomes dropped by the result sink because it was full.
    pub dropped_outcomes: u64,
    /// Outcomes handed to result persistence.
    pub persistence: PersistenceReport,
    /// Workers aborted after the drain grace period.
    pub forced_workers: usize,
    /// Iterations admitted after workers were told to stop. Always zero for a correct run.
    pub admitted_after_stop: u64,
    /// Host statistics, if a monitor was configured.
    pub host: Option<HostReport>,
    /// Wall time of the whole run.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl TerminalSummary {
    /// The concurrency held during the steady state.
    pub fn selected_concurrency(&self) -> Option<usize> {
        self.plateau.map(|decision| decision.concurrency)
    }
}

#[cfg(test)]
mod tests {
    use crate::outcome::testing::{failure, outcome};

    use super::*;

    #[test]
    fn totals_count_by_status() {
        let mut builder = TotalsBuilder::default();
        builder.record(&outcome(100, 50, 10));
        builder.record(&outcome(200, 150, 10));
        builder.record(&failure(300, 10));
        let mut timeout = failure(400, 10);
        timeout.status = OutcomeStatus::Timeout;
        builder.record(&timeout);

        let totals = builder.finish();
        assert_eq!(totals.requests, 4);
        assert_eq!(totals.successes, 2);
        assert_eq!(totals.http_errors, 1);
        assert_eq!(totals.timeouts, 1);
        assert_eq!(totals.bytes, 20);

        let latency = totals.latency.unwrap();
        assert_eq!(latency.count, 2);
        assert!((latency.avg.as_secs_f64() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn no_latency_without_successes() {
        let mut builder = TotalsBuilder::default();
        builder.record(&failure(300, 10));
        assert_eq!(builder.finish().latency, None);
    }
}
