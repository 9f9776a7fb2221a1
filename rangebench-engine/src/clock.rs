use std::time::{Duration, SystemTime};

use tokio::time::Instant;

/// The time base of a benchmark run.
///
/// All windows and outcomes are placed by their offset from the start of the run, measured on
/// the monotonic tokio clock. The wall-clock origin is only kept to stamp outcomes for
/// persistence.
#[derive(Clone, Copy, Debug)]
pub struct RunClock {
    origin: Instant,
    wall_origin: SystemTime,
}

impl RunClock {
    /// Starts a new clock at the current instant.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: SystemTime::now(),
        }
    }

    /// Time elapsed since the start of the run.
    pub fn offset(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Converts an instant into a run offset, saturating at zero.
    pub fn offset_of(&self, instant: Instant) -> Duration {
        instant.saturating_duration_since(self.origin)
    }

    /// The instant at the given run offset.
    pub fn instant_at(&self, offset: Duration) -> Instant {
        self.origin + offset
    }

    /// The wall-clock time at the given run offset.
    pub fn wall_time(&self, offset: Duration) -> SystemTime {
        self.wall_origin + offset
    }
}
