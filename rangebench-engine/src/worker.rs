use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rangebench_backend::{BackendError, RangeRead, SharedClient};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::RunClock;
use crate::outcome::{OutcomeStatus, RequestOutcome};
use crate::phase::PhaseLabel;
use crate::sampler::{RangeRequest, RequestSampler};
use crate::sink::ResultSink;

/// The window and target concurrency in effect, stamped onto every outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepTag {
    /// The active window.
    pub label: PhaseLabel,
    /// The target concurrency.
    pub concurrency: usize,
}

/// State shared by all workers of a run.
#[derive(Debug)]
pub struct WorkerContext {
    client: SharedClient,
    sampler: RequestSampler,
    sink: ResultSink,
    clock: RunClock,
    step: watch::Receiver<StepTag>,
    request_timeout: Option<Duration>,
    max_retries: u32,
    admitted: AtomicU64,
}

impl WorkerContext {
    /// Creates the shared worker state.
    pub fn new(
        client: SharedClient,
        sampler: RequestSampler,
        sink: ResultSink,
        clock: RunClock,
        step: watch::Receiver<StepTag>,
    ) -> Self {
        Self {
            client,
            sampler,
            sink,
            clock,
            step,
            request_timeout: None,
            max_retries: 0,
            admitted: AtomicU64::new(0),
        }
    }

    /// Bounds every attempt of a range read by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Retries failed range reads immediately up to `max_retries` times.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Number of loop iterations admitted by all workers so far.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    async fn attempt(&self, request: &RangeRequest) -> Result<RangeRead, BackendError> {
        let read = self
            .client
            .get_range(&request.key, request.start, request.length);

        match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .unwrap_or(Err(BackendError::Timeout)),
            None => read.await,
        }
    }

    /// Issues a request, retrying per policy. Returns the final result and the retries spent.
    async fn issue(&self, request: &RangeRequest) -> (Result<RangeRead, BackendError>, u32) {
        let mut retries = 0;
        loop {
            let result = self.attempt(request).await;
            if result.is_ok() || retries >= self.max_retries {
                return (result, retries);
            }
            retries += 1;
        }
    }
}

/// The loop of a single worker, which models one logical connection.
///
/// Cancellation is only observed between iterations, so a request that has been issued always
/// completes and produces an outcome.
pub(crate) async fn run_worker(
    worker_id: usize,
    seed: u64,
    context: Arc<WorkerContext>,
    token: CancellationToken,
) {
    let mut rng = SmallRng::seed_from_u64(seed);
    tracing::trace!(worker_id, "Worker started");

    while !token.is_cancelled() {
        context.admitted.fetch_add(1, Ordering::Relaxed);

        let request = context.sampler.next(&mut rng);
        let tag = *context.step.borrow();

        let offset = context.clock.offset();
        let started = Instant::now();
        let (result, retry_count) = context.issue(&request).await;
        let latency = started.elapsed();

        let (status, http_status, bytes, error) = match result {
            Ok(read) if (200..300).contains(&read.status) => {
                (OutcomeStatus::Success, Some(read.status), read.bytes, None)
            }
            Ok(read) => (
                OutcomeStatus::HttpError,
                Some(read.status),
                read.bytes,
                Some(format!("unexpected status {}", read.status)),
            ),
            Err(err) => (
                OutcomeStatus::classify(&err),
                err.status(),
                0,
                Some(err.to_string()),
            ),
        };

        let outcome = RequestOutcome {
            timestamp: context.clock.wall_time(offset),
            offset,
            worker_id,
            phase: tag.label,
            concurrency: tag.concurrency,
            object_key: request.key,
            range_start: request.start,
            range_len: request.length,
            bytes,
            latency,
            status,
            http_status,
            error,
            retry_count,
        };
        context.sink.offer(outcome);

        // Failing requests can complete without ever yielding, which would starve the runtime.
        if !status.is_success() {
            tokio::task::yield_now().await;
        }
    }

    tracing::trace!(worker_id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use rangebench_backend::SimulatedBackend;

    use crate::sink::result_sink;

    use super::*;

    fn context(
        backend: SimulatedBackend,
        sink: ResultSink,
    ) -> (WorkerContext, watch::Sender<StepTag>) {
        let sampler = RequestSampler::new(vec!["a".into()], 1000, 100).unwrap();
        let (tx, rx) = watch::channel(StepTag {
            label: PhaseLabel::Warmup,
            concurrency: 1,
        });
        let context = WorkerContext::new(
            Arc::new(backend),
            sampler,
            sink,
            RunClock::start(),
            rx,
        );
        (context, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn produces_outcomes_until_cancelled() {
        let backend = SimulatedBackend::builder()
            .latency(Duration::from_millis(100))
            .object("a", 1000)
            .build();
        let (sink, mut receiver) = result_sink(100);
        let (context, _tx) = context(backend, sink);
        let context = Arc::new(context);

        let token = CancellationToken::new();
        let task = tokio::spawn(run_worker(0, 1, Arc::clone(&context), token.clone()));

        tokio::time::sleep(Duration::from_millis(450)).await;
        token.cancel();
        task.await.unwrap();

        let mut batch = Vec::new();
        receiver.drain_ready(&mut batch);
        // four completed requests plus the one in flight at cancellation
        assert_eq!(batch.len(), 5);
        assert_eq!(context.admitted(), 5);
        assert!(batch.iter().all(|o| o.is_success() && o.bytes == 100));
        assert_eq!(batch[2].offset, Duration::from_millis(200));
        assert_eq!(batch[2].latency, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_classified() {
        let backend = SimulatedBackend::builder()
            .latency(Duration::from_secs(5))
            .object("a", 1000)
            .build();
        let (sink, mut receiver) = result_sink(100);
        let (context, _tx) = context(backend, sink);
        let context = context.with_request_timeout(Some(Duration::from_secs(1)));

        let request = context.sampler.next(&mut SmallRng::seed_from_u64(0));
        let (result, retries) = context.issue(&request).await;
        assert!(matches!(result, Err(BackendError::Timeout)));
        assert_eq!(retries, 0);
        assert_eq!(receiver.drain_ready(&mut Vec::new()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_counted() {
        let backend = SimulatedBackend::builder()
            .fail_every(1)
            .object("a", 1000)
            .build();
        let (sink, _receiver) = result_sink(100);
        let (context, _tx) = context(backend, sink);
        let context = context.with_max_retries(2);

        let request = context.sampler.next(&mut SmallRng::seed_from_u64(0));
        let (result, retries) = context.issue(&request).await;
        assert_eq!(result.unwrap_err().status(), Some(503));
        assert_eq!(retries, 2);
    }
}
