use std::{io, thread};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::outcome::RequestOutcome;
use crate::sink::BATCH_SIZE;

/// Number of batches buffered between the collector and the persistence thread.
const QUEUE_BATCHES: usize = 256;

/// Outcomes held back while the queue is full. Beyond this, held outcomes are dropped.
const MAX_PENDING: usize = 64 * 1024;

/// Durable storage for request outcomes.
///
/// Implementations run on a dedicated blocking thread and may perform synchronous IO. The engine
/// never waits for them while workers are running.
pub trait ResultPersistence: Send + 'static {
    /// Stores a batch of outcomes.
    fn write_batch(&mut self, batch: &[RequestOutcome]) -> io::Result<()>;

    /// Flushes everything written so far. Called once after the last batch.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A [`ResultPersistence`] that discards all outcomes.
#[derive(Debug, Default)]
pub struct DiscardPersistence;

impl ResultPersistence for DiscardPersistence {
    fn write_batch(&mut self, _batch: &[RequestOutcome]) -> io::Result<()> {
        Ok(())
    }
}

/// What happened to the outcomes handed to persistence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceReport {
    /// Outcomes passed to [`ResultPersistence::write_batch`] successfully.
    pub written: u64,
    /// Outcomes dropped because the persistence queue was full.
    pub dropped: u64,
    /// Number of failed writes, including the final flush.
    pub failures: u64,
    /// The last write error, if any.
    pub last_error: Option<String>,
}

/// Feeds a [`ResultPersistence`] on a dedicated thread.
///
/// Outcomes are collected into batches of up to [`BATCH_SIZE`] before they are queued, so the
/// queue bound counts batches of useful size rather than single outcomes. The thread lives
/// outside the runtime's blocking pool so that it never holds back a paused test clock.
pub(crate) struct PersistenceHandle {
    tx: mpsc::Sender<Vec<RequestOutcome>>,
    pending: Vec<RequestOutcome>,
    dropped: u64,
    report: oneshot::Receiver<PersistenceReport>,
}

impl PersistenceHandle {
    pub fn spawn(mut persistence: Box<dyn ResultPersistence>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<RequestOutcome>>(QUEUE_BATCHES);
        let (report_tx, report) = oneshot::channel();

        let spawned = thread::Builder::new()
            .name("rangebench-persistence".to_owned())
            .spawn(move || {
                let mut report = PersistenceReport::default();
                let mut record = |result: io::Result<()>, count: usize| match result {
                    Ok(()) => report.written += count as u64,
                    Err(err) => {
                        tracing::error!(
                            error = &err as &dyn std::error::Error,
                            "Failed to persist outcomes"
                        );
                        report.failures += 1;
                        report.last_error = Some(err.to_string());
                    }
                };

                while let Some(batch) = rx.blocking_recv() {
                    record(persistence.write_batch(&batch), batch.len());
                }
                record(persistence.finish(), 0);

                report_tx.send(report).ok();
            });

        if let Err(err) = spawned {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "Failed to start persistence thread"
            );
        }

        Self {
            tx,
            pending: Vec::with_capacity(BATCH_SIZE),
            dropped: 0,
            report,
        }
    }

    /// Adds outcomes to the pending batch and queues it once it is full. Never waits.
    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = RequestOutcome>) {
        self.pending.extend(outcomes);
        if self.pending.len() >= BATCH_SIZE {
            self.flush();
        }
    }

    /// Queues the pending batch, however small, without waiting.
    ///
    /// While the queue is full, outcomes stay pending up to a limit and are only dropped past it.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.pending);
        match self.tx.try_send(batch) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(batch)) if batch.len() < MAX_PENDING => {
                self.pending = batch;
            }
            Err(mpsc::error::TrySendError::Full(batch))
            | Err(mpsc::error::TrySendError::Closed(batch)) => self.discard(batch.len()),
        }
    }

    fn discard(&mut self, count: usize) {
        if self.dropped == 0 {
            tracing::warn!("Persistence is falling behind, dropping outcomes");
        }
        self.dropped += count as u64;
    }

    /// Queues what is still pending, closes the queue and waits for all batches to be written.
    pub async fn finish(mut self) -> PersistenceReport {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty()
            && let Err(mpsc::error::SendError(batch)) = self.tx.send(pending).await
        {
            self.discard(batch.len());
        }

        let Self {
            tx,
            dropped,
            report,
            ..
        } = self;
        drop(tx);

        let mut report = match report.await {
            Ok(report) => report,
            Err(_) => {
                tracing::error!("Persistence thread exited without a report");
                PersistenceReport {
                    failures: 1,
                    last_error: Some("persistence thread exited".to_owned()),
                    ..Default::default()
                }
            }
        };
        report.dropped += dropped;
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::outcome::testing::outcome;

    use super::*;

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<u64>>>);

    impl ResultPersistence for Recording {
        fn write_batch(&mut self, batch: &[RequestOutcome]) -> io::Result<()> {
            self.0.lock().unwrap().extend(batch.iter().map(|o| o.bytes));
            Ok(())
        }
    }

    struct Failing;

    impl ResultPersistence for Failing {
        fn write_batch(&mut self, _batch: &[RequestOutcome]) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }
    }

    /// Takes a millisecond per batch, regardless of its size.
    #[derive(Clone, Default)]
    struct Slow(Arc<Mutex<Vec<usize>>>);

    impl ResultPersistence for Slow {
        fn write_batch(&mut self, batch: &[RequestOutcome]) -> io::Result<()> {
            std::thread::sleep(std::time::Duration::from_millis(1));
            self.0.lock().unwrap().push(batch.len());
            Ok(())
        }
    }

    #[tokio::test]
    async fn writes_all_batches_in_order() {
        let recording = Recording::default();
        let mut handle = PersistenceHandle::spawn(Box::new(recording.clone()));

        handle.extend([outcome(1, 1, 1), outcome(2, 1, 2)]);
        handle.flush();
        handle.flush();
        handle.extend([outcome(3, 1, 3)]);

        let report = handle.finish().await;
        assert_eq!(report.written, 3);
        assert_eq!(report.dropped, 0);
        assert_eq!(*recording.0.lock().unwrap(), [1, 2, 3]);
    }

    #[tokio::test]
    async fn single_outcomes_are_batched() {
        let slow = Slow::default();
        let mut handle = PersistenceHandle::spawn(Box::new(slow.clone()));

        let total = 4 * QUEUE_BATCHES * BATCH_SIZE / 8;
        for i in 0..total {
            handle.extend([outcome(i as u64 + 1, 1, 1)]);
        }

        let report = handle.finish().await;
        assert_eq!(report.written, total as u64);
        assert_eq!(report.dropped, 0);

        let batches = slow.0.lock().unwrap();
        assert_eq!(batches.iter().sum::<usize>(), total);
        assert!(batches.len() <= total / BATCH_SIZE);
    }

    #[tokio::test]
    async fn failures_are_reported() {
        let mut handle = PersistenceHandle::spawn(Box::new(Failing));
        handle.extend([outcome(1, 1, 1)]);

        let report = handle.finish().await;
        assert_eq!(report.written, 0);
        assert_eq!(report.failures, 1);
        assert_eq!(report.last_error.as_deref(), Some("disk full"));
    }
}
