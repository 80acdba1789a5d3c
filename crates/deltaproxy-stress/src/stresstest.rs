use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use deltaproxy_service::caching::{CacheStatus, DeltaProxyCache};
use deltaproxy_service::config::Config;
use deltaproxy_service::series::JsonCodec;
use sentry::SentryFutureExt;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{WorkloadsConfig, prepare_workload, process_workload};

/// Outcomes of the requests of one workload.
#[derive(Debug, Default)]
struct Outcomes {
    hits: usize,
    partial_hits: usize,
    misses: usize,
    errors: usize,
}

impl Outcomes {
    fn record(&mut self, status: Option<CacheStatus>) {
        match status {
            Some(CacheStatus::Hit) => self.hits += 1,
            Some(CacheStatus::PartialHit) => self.partial_hits += 1,
            Some(CacheStatus::Miss) => self.misses += 1,
            None => self.errors += 1,
        }
    }
}

pub async fn perform_stresstest(
    config: Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    let cache = DeltaProxyCache::new("stresstest", config.cache, Arc::new(JsonCodec))
        .context("failed to create cache")?;

    // initialize workloads
    let workloads: Vec<_> = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            let concurrency = workload.concurrency.max(1);
            (concurrency, Arc::new(prepare_workload(&cache, i, workload)))
        })
        .collect();

    // warmup: run each workload once to make sure caches are warm
    {
        let start = Instant::now();

        let futures = workloads.iter().map(|(_, workload)| {
            let cache = cache.clone();
            let workload = Arc::clone(workload);
            tokio::spawn(async move {
                if let Err(error) = process_workload(&cache, &workload).await {
                    tracing::warn!(%error, "Warmup request failed");
                }
            })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for (concurrency, workload) in workloads.into_iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let cache = cache.clone();

        let task = tokio::spawn(async move {
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let outcomes = Arc::new(Mutex::new(Outcomes::default()));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let workload = Arc::clone(&workload);
                        let cache = cache.clone();
                        let task_durations = Arc::clone(&task_durations);
                        let outcomes = Arc::clone(&outcomes);
                        let task_start = Instant::now();

                        let hub = sentry::Hub::new_from_top(sentry::Hub::current());
                        let ctx = sentry::TransactionContext::new("stresstest", "stresstest");
                        let transaction = hub.start_transaction(ctx);

                        let future = async move {
                            let status = process_workload(&cache, &workload).await.ok();

                            transaction.finish();

                            task_durations.lock().unwrap().add(task_start.elapsed().as_secs_f64());
                            outcomes.lock().unwrap().record(status);

                            drop(permit);
                        };
                        let future = future.bind_hub(hub);

                        tokio::spawn(future);
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            let task_durations: DDSketch = std::mem::take(&mut *task_durations.lock().unwrap());
            let outcomes: Outcomes = std::mem::take(&mut *outcomes.lock().unwrap());

            (concurrency, task_durations, outcomes)
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (concurrency, task_durations, outcomes) = task.context("workload task failed")?;

        let ops = task_durations.count();
        let ops_ps = ops as f32 / duration.as_secs_f32();
        println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");

        if ops > 0 {
            let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or(0.) / ops as f64);
            let quantile = |q| {
                let secs = task_durations.quantile(q).ok().flatten().unwrap_or(0.);
                Duration::from_secs_f64(secs)
            };
            let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
            println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
        }

        let Outcomes {
            hits,
            partial_hits,
            misses,
            errors,
        } = outcomes;
        println!("  hits: {hits}; partial hits: {partial_hits}; misses: {misses}; errors: {errors}");
    }

    println!();
    let stats = serde_json::to_string_pretty(&cache.stats())?;
    println!("Cache stats: {stats}");

    Ok(())
}
