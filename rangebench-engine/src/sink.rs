use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::outcome::RequestOutcome;

/// Maximum number of outcomes handed out per batch.
pub(crate) const BATCH_SIZE: usize = 512;

#[derive(Debug, Default)]
struct SinkCounters {
    accepted: AtomicU64,
    dropped: AtomicU64,
}

/// Creates a bounded result sink holding at most `capacity` outcomes.
///
/// # Panics
///
/// Panics if `capacity` is zero. Configuration validation rejects a zero capacity.
pub fn result_sink(capacity: usize) -> (ResultSink, SinkReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let counters = Arc::new(SinkCounters::default());

    let sink = ResultSink {
        tx,
        counters: Arc::clone(&counters),
    };
    (sink, SinkReceiver { rx, counters })
}

/// The producing side of the result pipeline, cloned into every worker.
///
/// Offering never waits. When the queue is full the offered outcome is discarded and counted,
/// so a slow consumer can only cost statistics, never throughput.
#[derive(Clone, Debug)]
pub struct ResultSink {
    tx: mpsc::Sender<RequestOutcome>,
    counters: Arc<SinkCounters>,
}

impl ResultSink {
    /// Offers an outcome to the pipeline.
    ///
    /// Returns `false` if the outcome was dropped because the queue is full or the consumer is
    /// gone.
    pub fn offer(&self, outcome: RequestOutcome) -> bool {
        match self.tx.try_send(outcome) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Number of outcomes dropped so far.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Number of outcomes accepted so far.
    pub fn accepted(&self) -> u64 {
        self.counters.accepted.load(Ordering::Relaxed)
    }
}

/// The consuming side of the result pipeline.
#[derive(Debug)]
pub struct SinkReceiver {
    rx: mpsc::Receiver<RequestOutcome>,
    counters: Arc<SinkCounters>,
}

impl SinkReceiver {
    /// Waits for the next batch of outcomes and appends it to `buffer`.
    ///
    /// Returns the number of outcomes received. Zero means all sinks are gone and the queue is
    /// empty. This method is cancel safe.
    pub async fn next_batch(&mut self, buffer: &mut Vec<RequestOutcome>) -> usize {
        self.rx.recv_many(buffer, BATCH_SIZE).await
    }

    /// Appends all currently queued outcomes to `buffer` without waiting.
    pub fn drain_ready(&mut self, buffer: &mut Vec<RequestOutcome>) -> usize {
        let mut count = 0;
        while let Ok(outcome) = self.rx.try_recv() {
            buffer.push(outcome);
            count += 1;
        }
        count
    }

    /// Number of outcomes dropped by the producing side so far.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}
