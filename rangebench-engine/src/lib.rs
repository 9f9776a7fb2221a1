//! The adaptive range-read benchmark engine.
//!
//! A benchmark run is driven by the [`PhaseController`]. It walks through a fixed sequence of
//! phases:
//!
//! 1. **Warmup** at the initial concurrency, recorded but never used for decisions.
//! 2. **Ramping**, where concurrency grows by a fixed step after every ramp step until the
//!    [`PlateauDetector`] decides that more connections no longer buy more throughput.
//! 3. **Steady state** at the selected concurrency, which is the reported measurement.
//! 4. **Draining**, where workers stop admitting new requests and in-flight requests get a grace
//!    period to finish.
//!
//! Workers never wait for the statistics pipeline. Every completed request is offered to a
//! bounded [`ResultSink`], which drops outcomes when full and counts them instead. A single
//! collector task consumes the sink, feeds the open [`MetricsAggregator`] windows, forwards
//! batches to [`ResultPersistence`] and pushes live statistics to the [`MetricsExporter`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod aggregator;
mod clock;
mod collector;
mod config;
mod controller;
mod error;
mod export;
mod millis;
mod monitor;
mod outcome;
mod persistence;
mod phase;
mod plateau;
mod pool;
mod sampler;
mod sink;
mod summary;
mod worker;

pub use aggregator::{LatencySummary, MetricsAggregator, WindowBounds, WindowStats};
pub use clock::RunClock;
pub use config::{BenchmarkConfig, ErrorRateAbort, PlateauThresholds, RetryPolicy};
pub use controller::PhaseController;
pub use error::{ConfigError, EngineError};
pub use export::{MetricsExporter, NoopExporter, WindowKind};
pub use monitor::{HostReport, HostSample, MonitorError, SystemMonitor};
pub use outcome::{OutcomeStatus, RequestOutcome};
pub use persistence::{DiscardPersistence, PersistenceReport, ResultPersistence};
pub use phase::{Phase, PhaseLabel, PhaseSpan, PhaseTracker};
pub use plateau::{PlateauDecision, PlateauDetector, PlateauState, StepSample, StopReason, Verdict};
pub use pool::WorkerPool;
pub use sampler::{RangeRequest, RequestSampler};
pub use sink::{ResultSink, SinkReceiver, result_sink};
pub use summary::{LatencySketchSummary, RunTotals, TerminalSummary};
pub use worker::{StepTag, WorkerContext};
