//! Plateau detection over the ramp history.
//!
//! After every ramp step the detector looks at the throughput of the most recent step relative
//! to the one before. A step *signals* when its growth falls below the growth threshold, or when
//! throughput dropped by more than the degradation threshold. A single signalling step is
//! treated as noise. Only two signalling steps in a row commit a stop, and the selected level
//! is the best one measured before the first step of that pair.

use serde::Serialize;

use crate::config::PlateauThresholds;

/// Hosts are considered link-bound at this share of their configured bandwidth ceiling.
const CEILING_SHARE: f64 = 0.95;

/// The representative throughput of one completed ramp step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct StepSample {
    /// Concurrency of the step.
    pub concurrency: usize,
    /// Measured throughput in bits per second.
    pub throughput_bps: f64,
}

/// Why ramping stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Two consecutive steps gained less than the growth threshold.
    Plateau,
    /// Throughput regressed by more than the degradation threshold.
    Degradation,
    /// The maximum concurrency was reached without a plateau.
    MaxConcurrency,
    /// Throughput reached the host's bandwidth ceiling.
    BandwidthCeiling,
    /// The error rate of a step exceeded the configured limit.
    ErrorRate,
}

/// The decision after evaluating the ramp history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Keep ramping at the given concurrency.
    Continue {
        /// Concurrency of the next step.
        next_concurrency: usize,
    },
    /// Stop ramping and hold the given concurrency.
    Stop {
        /// The selected concurrency.
        at_concurrency: usize,
        /// Why ramping stopped.
        reason: StopReason,
    },
}

/// Evaluates ramp histories.
#[derive(Clone, Debug)]
pub struct PlateauDetector {
    thresholds: PlateauThresholds,
    initial: usize,
    step: usize,
    max: usize,
}

impl PlateauDetector {
    /// Creates a detector for a ramp from `initial` to `max` in increments of `step`.
    pub fn new(thresholds: PlateauThresholds, initial: usize, step: usize, max: usize) -> Self {
        Self {
            thresholds,
            initial,
            step,
            max,
        }
    }

    /// Decides whether to continue ramping given all completed steps in order.
    pub fn evaluate(&self, history: &[StepSample]) -> Verdict {
        let Some(last) = history.last() else {
            return Verdict::Continue {
                next_concurrency: self.initial,
            };
        };

        if let Some(ceiling) = self.thresholds.system_bandwidth_bps()
            && last.throughput_bps >= ceiling * CEILING_SHARE
        {
            return self.stop(history, StopReason::BandwidthCeiling);
        }

        let n = history.len() - 1;
        if n >= 2
            && let Some(reason) = self.signal(history, n - 1)
            && self.signal(history, n).is_some()
        {
            // the knee is the best level before the first signalling step
            return self.stop(&history[..n - 1], reason);
        }

        if last.concurrency >= self.max {
            return self.stop(history, StopReason::MaxConcurrency);
        }

        Verdict::Continue {
            next_concurrency: (last.concurrency + self.step).min(self.max),
        }
    }

    /// Returns why step `index` signals relative to its predecessor, if it does.
    fn signal(&self, history: &[StepSample], index: usize) -> Option<StopReason> {
        let previous = history[index - 1].throughput_bps;
        let current = history[index].throughput_bps;

        if previous <= 0.0 {
            return (current <= 0.0).then_some(StopReason::Plateau);
        }
        if current < previous * (1.0 - self.thresholds.degradation_threshold) {
            return Some(StopReason::Degradation);
        }

        let growth = (current - previous) / previous;
        (growth < self.thresholds.growth_threshold).then_some(StopReason::Plateau)
    }

    fn stop(&self, candidates: &[StepSample], reason: StopReason) -> Verdict {
        Verdict::Stop {
            at_concurrency: argmax(candidates).unwrap_or(self.initial),
            reason,
        }
    }
}

/// The concurrency with the highest throughput, preferring the lower level on ties.
fn argmax(samples: &[StepSample]) -> Option<usize> {
    samples
        .iter()
        .fold(None::<&StepSample>, |best, sample| match best {
            Some(best) if best.throughput_bps >= sample.throughput_bps => Some(best),
            _ => Some(sample),
        })
        .map(|best| best.concurrency)
}

/// The final plateau decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PlateauDecision {
    /// The concurrency selected for the steady state.
    pub concurrency: usize,
    /// Why ramping stopped.
    pub reason: StopReason,
}

/// The ramp history together with the decision derived from it.
///
/// Owned by the controller and only mutated through [`record`](Self::record) and
/// [`abort`](Self::abort).
#[derive(Debug)]
pub struct PlateauState {
    detector: PlateauDetector,
    history: Vec<StepSample>,
    decision: Option<PlateauDecision>,
}

impl PlateauState {
    /// Creates an empty state.
    pub fn new(detector: PlateauDetector) -> Self {
        Self {
            detector,
            history: Vec::new(),
            decision: None,
        }
    }

    /// Records a completed ramp step and evaluates the history.
    ///
    /// Once a stop has been decided, further samples are ignored and the decision is repeated.
    pub fn record(&mut self, sample: StepSample) -> Verdict {
        if let Some(decision) = self.decision {
            return Verdict::Stop {
                at_concurrency: decision.concurrency,
                reason: decision.reason,
            };
        }

        self.history.push(sample);
        let verdict = self.detector.evaluate(&self.history);
        if let Verdict::Stop {
            at_concurrency,
            reason,
        } = verdict
        {
            self.decision = Some(PlateauDecision {
                concurrency: at_concurrency,
                reason,
            });
        }
        verdict
    }

    /// Stops ramping for an external reason, selecting the best level recorded so far.
    pub fn abort(&mut self, reason: StopReason) -> PlateauDecision {
        if let Some(decision) = self.decision {
            return decision;
        }

        let decision = PlateauDecision {
            concurrency: argmax(&self.history).unwrap_or(self.detector.initial),
            reason,
        };
        self.decision = Some(decision);
        decision
    }

    /// All recorded steps in order.
    pub fn history(&self) -> &[StepSample] {
        &self.history
    }

    /// The decision, once ramping stopped.
    pub fn decision(&self) -> Option<PlateauDecision> {
        self.decision
    }
}
