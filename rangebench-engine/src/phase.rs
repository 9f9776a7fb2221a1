use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

/// The phases of a benchmark run, in the order they are entered.
///
/// Phases only ever move forward. Some phases may be skipped, for instance a cancelled run goes
/// straight from `Ramping` to `Draining`, but no phase is entered twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Fixed-duration warmup at the initial concurrency.
    Warmup,
    /// Stepwise concurrency increase until a plateau is found.
    Ramping,
    /// Extended measurement at the selected concurrency.
    SteadyState,
    /// Workers stop admitting requests and in-flight requests finish.
    Draining,
    /// All pipelines are flushed and the summary is built.
    Terminated,
}

impl Phase {
    /// Returns the snake-case name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Ramping => "ramping",
            Self::SteadyState => "steady_state",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the measurement window an outcome or statistic belongs to.
///
/// Outcomes carry the label of the window in which they were issued. No request is issued once
/// draining begins, so draining has no label of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseLabel {
    /// The warmup window.
    Warmup,
    /// The ramp step with the given 1-based index.
    Ramp(u32),
    /// The steady-state window.
    SteadyState,
}

impl PhaseLabel {
    /// The phase this label belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Warmup => Phase::Warmup,
            Self::Ramp(_) => Phase::Ramping,
            Self::SteadyState => Phase::SteadyState,
        }
    }
}

impl fmt::Display for PhaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warmup => f.write_str("warmup"),
            Self::Ramp(step) => write!(f, "ramp-{step}"),
            Self::SteadyState => f.write_str("steady_state"),
        }
    }
}

impl Serialize for PhaseLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The time span during which a phase was active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PhaseSpan {
    /// The phase.
    pub phase: Phase,
    /// Run offset at which the phase was entered.
    #[serde(rename = "start_ms", with = "crate::millis")]
    pub start: Duration,
    /// Run offset at which the phase was left, or the run ended.
    #[serde(rename = "end_ms", with = "crate::millis")]
    pub end: Duration,
}

/// Tracks the active phase and enforces forward-only transitions.
#[derive(Debug)]
pub struct PhaseTracker {
    current: Phase,
    entered: Duration,
    spans: Vec<PhaseSpan>,
}

impl PhaseTracker {
    /// Creates a tracker that entered `Warmup` at offset zero.
    pub fn new() -> Self {
        Self {
            current: Phase::Warmup,
            entered: Duration::ZERO,
            spans: Vec::new(),
        }
    }

    /// The currently active phase.
    pub fn current(&self) -> Phase {
        self.current
    }

    /// Moves to `next` at run offset `at`.
    ///
    /// Returns `false` and stays in the current phase if `next` is not after the current phase.
    pub fn advance(&mut self, next: Phase, at: Duration) -> bool {
        if next <= self.current {
            tracing::warn!(from = %self.current, to = %next, "Ignoring backwards phase transition");
            return false;
        }

        tracing::info!(from = %self.current, to = %next, "Entering phase");
        self.spans.push(PhaseSpan {
            phase: self.current,
            start: self.entered,
            end: at,
        });
        self.current = next;
        self.entered = at;
        true
    }

    /// Returns the spans of all phases that have been left so far.
    pub fn spans(&self) -> &[PhaseSpan] {
        &self.spans
    }

    /// Consumes the tracker and returns all spans, closing the current phase at `end`.
    pub fn into_spans(mut self, end: Duration) -> Vec<PhaseSpan> {
        self.spans.push(PhaseSpan {
            phase: self.current,
            start: self.entered,
            end: end.max(self.entered),
        });
        self.spans
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_forward_only() {
        let mut tracker = PhaseTracker::new();
        let secs = Duration::from_secs;

        assert!(tracker.advance(Phase::Ramping, secs(10)));
        assert!(!tracker.advance(Phase::Warmup, secs(11)));
        assert!(!tracker.advance(Phase::Ramping, secs(12)));
        // skipping steady state is allowed
        assert!(tracker.advance(Phase::Draining, secs(20)));
        assert!(tracker.advance(Phase::Terminated, secs(21)));
        assert!(!tracker.advance(Phase::Terminated, secs(22)));

        assert_eq!(tracker.current(), Phase::Terminated);
        let phases: Vec<_> = tracker.spans().iter().map(|s| s.phase).collect();
        assert_eq!(phases, [Phase::Warmup, Phase::Ramping, Phase::Draining]);
        assert_eq!(tracker.spans()[1].start, secs(10));
        assert_eq!(tracker.spans()[1].end, secs(20));

        let spans = tracker.into_spans(secs(25));
        let last = spans.last().unwrap();
        assert_eq!(spans.len(), 4);
        assert_eq!(last.phase, Phase::Terminated);
        assert_eq!((last.start, last.end), (secs(21), secs(25)));
    }

    #[test]
    fn current_phase_is_closed_at_end() {
        let mut tracker = PhaseTracker::new();
        tracker.advance(Phase::Ramping, Duration::from_secs(3));

        // an end before the phase was entered yields an empty span
        let spans = tracker.into_spans(Duration::from_secs(1));
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].phase, Phase::Ramping);
        assert_eq!(spans[1].start, spans[1].end);
    }

    #[test]
    fn label_display() {
        assert_eq!(PhaseLabel::Ramp(3).to_string(), "ramp-3");
        assert_eq!(PhaseLabel::SteadyState.to_string(), "steady_state");
        assert_eq!(PhaseLabel::Ramp(1).phase(), Phase::Ramping);
        assert_eq!(
            serde_json::to_string(&PhaseLabel::Ramp(2)).unwrap(),
            "\"ramp-2\""
        );
    }
}
