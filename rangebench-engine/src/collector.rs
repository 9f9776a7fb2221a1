//! The single consumer of the result sink.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::aggregator::{MetricsAggregator, Sample, WindowBounds, WindowStats};
use crate::clock::RunClock;
use crate::export::{MetricsExporter, WindowKind};
use crate::outcome::RequestOutcome;
use crate::persistence::{PersistenceHandle, PersistenceReport};
use crate::phase::PhaseLabel;
use crate::sink::{BATCH_SIZE, SinkReceiver};
use crate::summary::{RunTotals, TotalsBuilder};

pub(crate) type WindowId = u64;

/// How long consumed outcomes are kept to seed windows that open late.
const RETENTION: Duration = Duration::from_secs(10);

enum Command {
    Open {
        id: WindowId,
        aggregator: MetricsAggregator,
    },
    Close {
        id: WindowId,
        end: Option<Duration>,
        reply: oneshot::Sender<Option<WindowStats>>,
    },
    Shutdown {
        reply: oneshot::Sender<CollectorReport>,
    },
}

/// Everything the collector accumulated over a run.
#[derive(Debug, Default)]
pub(crate) struct CollectorReport {
    pub totals: RunTotals,
    pub persistence: PersistenceReport,
    pub dropped: u64,
}

/// Controls the collector task.
pub(crate) struct CollectorHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    next_id: WindowId,
}

impl CollectorHandle {
    pub fn spawn(
        receiver: SinkReceiver,
        persistence: PersistenceHandle,
        exporter: Arc<dyn MetricsExporter>,
        clock: RunClock,
        live_width: Duration,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(16);

        let collector = Collector {
            receiver,
            commands: command_rx,
            open: Vec::new(),
            recent: VecDeque::new(),
            live: BTreeMap::new(),
            live_width,
            live_flushed: 0,
            totals: TotalsBuilder::default(),
            persistence,
            exporter,
            clock,
            reported_drops: 0,
        };
        let task = tokio::spawn(collector.run());

        Self {
            commands,
            task,
            next_id: 0,
        }
    }

    /// Starts aggregating a window.
    pub async fn open(
        &mut self,
        label: PhaseLabel,
        concurrency: usize,
        bounds: WindowBounds,
    ) -> WindowId {
        let id = self.next_id;
        self.next_id += 1;

        let aggregator = MetricsAggregator::new(label, concurrency, bounds);
        if self.commands.send(Command::Open { id, aggregator }).await.is_err() {
            tracing::error!("Collector is gone, window will be empty");
        }
        id
    }

    /// Closes a window after consuming all queued outcomes.
    ///
    /// With `end` set, the window is truncated there. Returns `None` if the collector is gone.
    pub async fn close(&self, id: WindowId, end: Option<Duration>) -> Option<WindowStats> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Close { id, end, reply })
            .await
            .ok()?;
        response.await.ok().flatten()
    }

    /// Drains the sink, flushes persistence and stops the collector.
    pub async fn shutdown(self) -> CollectorReport {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_err() {
            tracing::error!("Collector exited early, statistics are incomplete");
        }

        let report = response.await.unwrap_or_default();
        if let Err(err) = self.task.await {
            tracing::error!(error = &err as &dyn std::error::Error, "Collector task failed");
        }
        report
    }
}

struct Collector {
    receiver: SinkReceiver,
    commands: mpsc::Receiver<Command>,
    open: Vec<(WindowId, MetricsAggregator)>,
    /// Recently consumed outcomes, in arrival order.
    ///
    /// A window is registered shortly after its start offset, so outcomes completing right at
    /// the start may already have been consumed. They are replayed into the window on open.
    recent: VecDeque<Sample>,
    /// Live windows keyed by their index since the start of the run.
    live: BTreeMap<u64, MetricsAggregator>,
    live_width: Duration,
    /// Index of the first live window not yet exported.
    live_flushed: u64,
    totals: TotalsBuilder,
    persistence: PersistenceHandle,
    exporter: Arc<dyn MetricsExporter>,
    clock: RunClock,
    reported_drops: u64,
}

impl Collector {
    async fn run(mut self) {
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        let mut ticker = tokio::time::interval(self.live_width);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sink_open = true;

        let reply = loop {
            tokio::select! {
                received = self.receiver.next_batch(&mut batch), if sink_open => {
                    if received == 0 {
                        sink_open = false;
                    } else {
                        self.ingest(&mut batch);
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Open { id, aggregator }) => self.open_window(id, aggregator),
                    Some(Command::Close { id, end, reply }) => {
                        self.ingest_ready(&mut batch);
                        let _ = reply.send(self.close(id, end));
                    }
                    Some(Command::Shutdown { reply }) => break Some(reply),
                    None => break None,
                },
                _ = ticker.tick() => {
                    self.persistence.flush();
                    self.flush_live(false);
                    self.report_drops();
                }
            }
        };

        let report = self.shutdown(batch).await;
        if let Some(reply) = reply {
            let _ = reply.send(report);
        }
    }

    fn open_window(&mut self, id: WindowId, mut aggregator: MetricsAggregator) {
        for sample in &self.recent {
            aggregator.observe_sample(*sample);
        }
        self.open.push((id, aggregator));
    }

    fn ingest(&mut self, batch: &mut Vec<RequestOutcome>) {
        for outcome in batch.iter() {
            let sample = Sample::from(outcome);
            for (_, aggregator) in &mut self.open {
                aggregator.observe_sample(sample);
            }
            self.recent.push_back(sample);

            self.observe_live(outcome);
            self.totals.record(outcome);
            self.exporter.outcome(outcome);
        }

        let now = self.clock.offset();
        while self
            .recent
            .front()
            .is_some_and(|sample| sample.completed + RETENTION < now)
        {
            self.recent.pop_front();
        }

        self.persistence.extend(batch.drain(..));
    }

    fn ingest_ready(&mut self, batch: &mut Vec<RequestOutcome>) {
        if self.receiver.drain_ready(batch) > 0 {
            self.ingest(batch);
        }
    }

    fn observe_live(&mut self, outcome: &RequestOutcome) {
        let width = self.live_width.as_nanos().max(1);
        let index = (outcome.completed().as_nanos() / width) as u64;
        if index < self.live_flushed {
            // its window was already exported
            return;
        }

        let live_width = self.live_width;
        self.live
            .entry(index)
            .or_insert_with(|| {
                let start = live_width * index as u32;
                let bounds = WindowBounds::new(start, start + live_width);
                MetricsAggregator::new(outcome.phase, outcome.concurrency, bounds)
            })
            .observe(outcome);
    }

    /// Exports live windows that ended at least one window width ago, or all of them.
    fn flush_live(&mut self, all: bool) {
        let now = self.clock.offset();
        while let Some(entry) = self.live.first_entry() {
            let end = entry.get().bounds().end;
            if !all && end + self.live_width > now {
                break;
            }

            let index = *entry.key();
            let stats = entry.remove().close();
            self.exporter.window(WindowKind::Live, &stats);
            self.live_flushed = index + 1;
        }
    }

    fn report_drops(&mut self) {
        let dropped = self.receiver.dropped();
        if dropped != self.reported_drops {
            if self.reported_drops == 0 {
                tracing::warn!(dropped, "Result sink overflowed, statistics undercount");
            }
            self.reported_drops = dropped;
            self.exporter.dropped(dropped);
        }
    }

    fn close(&mut self, id: WindowId, end: Option<Duration>) -> Option<WindowStats> {
        let position = self.open.iter().position(|(open_id, _)| *open_id == id)?;
        let (_, aggregator) = self.open.swap_remove(position);

        let stats = match end {
            Some(end) => aggregator.close_at(end),
            None => aggregator.close(),
        };
        self.exporter.window(WindowKind::Phase, &stats);
        Some(stats)
    }

    async fn shutdown(mut self, mut batch: Vec<RequestOutcome>) -> CollectorReport {
        self.ingest_ready(&mut batch);
        self.flush_live(true);
        self.report_drops();

        for (_, aggregator) in self.open.drain(..) {
            tracing::debug!(bounds = ?aggregator.bounds(), "Discarding window that was never closed");
        }

        CollectorReport {
            persistence: self.persistence.finish().await,
            totals: self.totals.finish(),
            dropped: self.receiver.dropped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::outcome::testing::outcome;
    use crate::persistence::{DiscardPersistence, ResultPersistence};
    use crate::sink::result_sink;

    use super::*;

    #[derive(Debug, Default)]
    struct Windows(Mutex<Vec<(WindowKind, WindowStats)>>);

    #[async_trait::async_trait]
    impl MetricsExporter for Windows {
        fn window(&self, kind: WindowKind, stats: &WindowStats) {
            self.0.lock().unwrap().push((kind, stats.clone()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn closes_windows_after_draining_queue() {
        let (sink, receiver) = result_sink(1000);
        let exporter = Arc::new(Windows::default());
        let clock = RunClock::start();
        let mut collector = CollectorHandle::spawn(
            receiver,
            PersistenceHandle::spawn(Box::new(DiscardPersistence)),
            exporter.clone(),
            clock,
            Duration::from_secs(1),
        );

        let bounds = WindowBounds::new(Duration::ZERO, Duration::from_secs(2));
        let id = collector.open(PhaseLabel::Warmup, 1, bounds).await;

        sink.offer(outcome(500, 100, 10));
        sink.offer(outcome(1500, 100, 10));
        sink.offer(outcome(2500, 100, 10));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let stats = collector.close(id, None).await.unwrap();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.bytes, 20);

        // closing twice yields nothing
        assert!(collector.close(id, None).await.is_none());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let report = collector.shutdown().await;
        assert_eq!(report.totals.requests, 3);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.persistence.written, 3);

        let windows = exporter.0.lock().unwrap();
        let live: Vec<_> = windows
            .iter()
            .filter(|(kind, _)| *kind == WindowKind::Live)
            .map(|(_, stats)| (stats.bounds.start.as_secs(), stats.requests))
            .collect();
        assert_eq!(live, [(0, 1), (1, 1), (2, 1)]);
    }

    /// Takes a millisecond per batch, regardless of its size.
    struct SlowPersistence(Arc<AtomicU64>);

    impl ResultPersistence for SlowPersistence {
        fn write_batch(&mut self, batch: &[RequestOutcome]) -> io::Result<()> {
            std::thread::sleep(Duration::from_millis(1));
            self.0.fetch_add(batch.len() as u64, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persists_every_outcome_received_one_at_a_time() {
        let total = 5_000;
        let (sink, receiver) = result_sink(total);
        let written = Arc::new(AtomicU64::new(0));
        let collector = CollectorHandle::spawn(
            receiver,
            PersistenceHandle::spawn(Box::new(SlowPersistence(written.clone()))),
            Arc::new(Windows::default()),
            RunClock::start(),
            Duration::from_secs(1),
        );

        for i in 0..total as u64 {
            sink.offer(outcome(i + 1, 1, 1));
            // hand the collector a batch of exactly one outcome
            tokio::task::yield_now().await;
        }

        let report = collector.shutdown().await;
        assert_eq!(report.totals.requests, total as u64);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.persistence.dropped, 0);
        assert_eq!(report.persistence.written, total as u64);
        assert_eq!(written.load(Ordering::Relaxed), total as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn truncated_close() {
        let (sink, receiver) = result_sink(1000);
        let mut collector = CollectorHandle::spawn(
            receiver,
            PersistenceHandle::spawn(Box::new(DiscardPersistence)),
            Arc::new(Windows::default()),
            RunClock::start(),
            Duration::from_secs(1),
        );

        let bounds = WindowBounds::new(Duration::ZERO, Duration::from_secs(10));
        let id = collector.open(PhaseLabel::Ramp(1), 4, bounds).await;
        sink.offer(outcome(1000, 100, 10));
        sink.offer(outcome(4000, 100, 10));

        let stats = collector
            .close(id, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.bounds.end, Duration::from_secs(2));
        assert_eq!(stats.concurrency, 4);

        collector.shutdown().await;
    }
}
