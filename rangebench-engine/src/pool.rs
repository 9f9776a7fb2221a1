use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::worker::{WorkerContext, run_worker};

#[derive(Debug)]
struct WorkerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the live workers of a run.
///
/// Every worker gets its own child token of the pool's root token, so workers can be retired
/// individually when scaling down and all at once when stopping. Stopped workers are not
/// detached: [`join`](Self::join) waits for every worker ever spawned by the pool.
#[derive(Debug)]
pub struct WorkerPool {
    context: Arc<WorkerContext>,
    root: CancellationToken,
    seed: u64,
    next_id: usize,
    live: Vec<WorkerHandle>,
    retired: Vec<JoinHandle<()>>,
    admitted_at_stop: Option<u64>,
}

impl WorkerPool {
    /// Creates an empty pool.
    ///
    /// Cancelling `root` stops all workers, which lets an external cancellation reach the workers
    /// without a detour through the controller.
    pub fn new(context: Arc<WorkerContext>, root: CancellationToken, seed: u64) -> Self {
        Self {
            context,
            root,
            seed,
            next_id: 0,
            live: Vec::new(),
            retired: Vec::new(),
            admitted_at_stop: None,
        }
    }

    /// Number of live workers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns `true` if no worker is live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Returns `true` once the pool has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Starts or retires workers until exactly `target` are live.
    ///
    /// Has no effect after the pool was stopped.
    pub fn scale(&mut self, target: usize) {
        if self.is_stopped() {
            return;
        }

        while self.live.len() < target {
            let worker_id = self.next_id;
            self.next_id += 1;

            let token = self.root.child_token();
            let seed = self.seed.wrapping_add(worker_id as u64);
            let task = tokio::spawn(run_worker(
                worker_id,
                seed,
                Arc::clone(&self.context),
                token.clone(),
            ));
            self.live.push(WorkerHandle { token, task });
        }

        while self.live.len() > target {
            if let Some(worker) = self.live.pop() {
                worker.token.cancel();
                self.retired.push(worker.task);
            }
        }

        tracing::debug!(workers = self.live.len(), "Scaled worker pool");
    }

    /// Signals all workers to stop after their current request.
    ///
    /// Admissions are counted against the first call, which should happen as soon as the run
    /// is cancelled.
    pub fn stop_all(&mut self) {
        self.root.cancel();
        self.admitted_at_stop.get_or_insert(self.context.admitted());
    }

    /// Iterations admitted after [`stop_all`](Self::stop_all) was first called.
    pub fn admitted_after_stop(&self) -> u64 {
        self.admitted_at_stop
            .map(|at_stop| self.context.admitted() - at_stop)
            .unwrap_or_default()
    }

    /// Stops all workers and waits up to `grace` for them to finish.
    ///
    /// Workers still running after the grace period are aborted. Returns the number of aborted
    /// workers.
    pub async fn join(&mut self, grace: Duration) -> usize {
        self.stop_all();

        let tasks: Vec<JoinHandle<()>> = self
            .live
            .drain(..)
            .map(|worker| worker.task)
            .chain(self.retired.drain(..))
            .collect();
        let aborts: Vec<AbortHandle> = tasks.iter().map(|task| task.abort_handle()).collect();

        if tokio::time::timeout(grace, futures::future::join_all(tasks))
            .await
            .is_ok()
        {
            return 0;
        }

        let mut forced = 0;
        for abort in aborts {
            if !abort.is_finished() {
                abort.abort();
                forced += 1;
            }
        }
        tracing::warn!(forced, "Aborted workers after drain grace period");
        forced
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
