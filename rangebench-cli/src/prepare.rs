//! Uploads and verifies the object pool.

use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use bytesize::ByteSize;
use futures::{StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use rangebench_backend::{Payload, SharedClient};
use rangebench_engine::BenchmarkConfig;
use yansi::Paint;

/// Uploads every object of the pool that is missing or smaller than configured.
///
/// Object contents are random, seeded by the object index, so repeated uploads produce identical
/// objects.
pub async fn prepare(
    client: SharedClient,
    config: &BenchmarkConfig,
    concurrency: usize,
) -> Result<()> {
    let object_size = config.object_size.as_u64();
    let keys = config.object_keys();

    let bar = ProgressBar::new(keys.len() as u64)
        .with_message("Preparing objects...")
        .with_style(ProgressStyle::with_template("{msg}\n{wide_bar} {pos}/{len} {elapsed}")?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let uploaded: Vec<bool> = futures::stream::iter(keys.into_iter().enumerate())
        .map(|(index, key)| {
            let client = client.clone();
            let bar = &bar;
            async move {
                let existing = client.object_size(&key).await?;
                if existing.is_some_and(|size| size >= object_size) {
                    tracing::debug!(%key, "Object already present");
                    bar.inc(1);
                    return anyhow::Ok(false);
                }

                let start = Instant::now();
                client
                    .put(&key, Payload::random(object_size, index as u64))
                    .await?;
                tracing::info!(%key, elapsed = ?start.elapsed(), "Uploaded object");
                bar.inc(1);
                Ok(true)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;

    bar.finish_and_clear();

    let count = uploaded.iter().filter(|uploaded| **uploaded).count();
    println!(
        "{} uploaded {} of {} objects of {}",
        "PREPARE:".bold().green(),
        count.bold(),
        uploaded.len(),
        ByteSize::b(object_size)
    );
    Ok(())
}

/// Verifies that the pool is complete and serves a sample range read.
pub async fn check(client: SharedClient, config: &BenchmarkConfig) -> Result<()> {
    let object_size = config.object_size.as_u64();
    let mut problems = 0;

    for key in config.object_keys() {
        match client.object_size(&key).await? {
            Some(size) if size >= object_size => {
                println!("  {} {key} ({})", "ok".green(), ByteSize::b(size));
            }
            Some(size) => {
                problems += 1;
                println!(
                    "  {} {key} ({}, expected {})",
                    "too small".bold().red(),
                    ByteSize::b(size),
                    ByteSize::b(object_size)
                );
            }
            None => {
                problems += 1;
                println!("  {} {key}", "missing".bold().red());
            }
        }
    }

    if problems > 0 {
        bail!("{problems} objects are missing or too small, run `rangebench prepare` first");
    }

    let key = format!("{}0", config.object_prefix);
    let length = config.range_size.as_u64();
    let start = Instant::now();
    let read = client.get_range(&key, 0, length).await?;
    let elapsed = start.elapsed();

    let throughput = (read.bytes as f64 / elapsed.as_secs_f64().max(f64::EPSILON)) as u64;
    println!(
        "{} read {} from {key} in {:.2?} ({}/s, status {})",
        "CHECK:".bold().green(),
        ByteSize::b(read.bytes),
        elapsed.bold(),
        ByteSize::b(throughput),
        read.status
    );

    if read.bytes != length {
        bail!("short read: expected {length} bytes, got {}", read.bytes);
    }
    Ok(())
}
