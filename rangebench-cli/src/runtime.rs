//! Gauges of the Tokio runtime driving the benchmark.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

/// Reports runtime gauges every `interval` until the task is aborted.
///
/// A growing global queue while workers are idle on the network points at a runtime that is too
/// small for the configured concurrency.
pub async fn report_runtime_gauges(interval: Duration) {
    let runtime = Handle::current().metrics();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let alive = runtime.num_alive_tasks();
        let queued = runtime.global_queue_depth();
        tracing::trace!(alive, queued, "Runtime gauges");

        merni::gauge!("runtime.workers": runtime.num_workers());
        merni::gauge!("runtime.alive_tasks": alive);
        merni::gauge!("runtime.queue_depth": queued);
    }
}
