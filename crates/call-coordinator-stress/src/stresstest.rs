use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use call_coordinator::{CoordinatorConfig, FailurePolicy};
use sentry::SentryFutureExt;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{PreparedWorkload, WorkloadsConfig, prepare_workload, run_operation};

/// The outcome of running one workload for the configured duration.
struct WorkloadStats {
    concurrency: usize,
    task_durations: DDSketch,
    failed_checks: usize,
}

pub async fn perform_stresstest(
    config: &CoordinatorConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // initialize workloads
    let workloads = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| prepare_workload(i, workload, config).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;

    // warmup: run each workload once
    {
        let start = Instant::now();

        let futures = workloads.iter().map(|workload| {
            let workload = Arc::clone(workload);
            tokio::spawn(async move { run_operation(&workload).await })
        });

        for result in futures::future::join_all(futures).await {
            result.context("warmup operation panicked")??;
        }
        for workload in &workloads {
            workload.take_computations();
        }

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for workload in workloads.iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let workload = Arc::clone(workload);

        let task = tokio::spawn(async move {
            let concurrency = workload.concurrency;
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let failed_checks = Arc::new(AtomicUsize::new(0));
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
                        let task_durations = Arc::clone(&task_durations);
                        let failed_checks = Arc::clone(&failed_checks);
                        let task_start = Instant::now();

                        let hub = sentry::Hub::new_from_top(sentry::Hub::current());
                        let ctx = sentry::TransactionContext::new("stresstest", "stresstest");
                        let transaction = hub.start_transaction(ctx);

                        let future = async move {
                            if let Err(error) = run_operation(&workload).await {
                                tracing::error!("Operation check failed: {error:#}");
                                failed_checks.fetch_add(1, Ordering::Relaxed);
                            }

                            transaction.finish();

                            task_durations
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .add(task_start.elapsed().as_secs_f64());

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

            let task_durations: DDSketch = {
                let mut task_durations = task_durations
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *task_durations)
            };

            WorkloadStats {
                concurrency,
                task_durations,
                failed_checks: failed_checks.load(Ordering::Relaxed),
            }
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    let mut errors = 0;
    for (i, (task, workload)) in finished_tasks.into_iter().zip(&workloads).enumerate() {
        let stats = task.context("workload task panicked")?;
        print_stats(i, &stats, duration);

        if stats.failed_checks > 0 {
            println!("  {} operations returned inconsistent results", stats.failed_checks);
            errors += 1;
        }
        if let Err(error) = verify_computations(workload, stats.task_durations.count()) {
            println!("  {error}");
            errors += 1;
        }
    }

    if errors > 0 {
        anyhow::bail!("{errors} verification(s) failed");
    }
    Ok(())
}

fn print_stats(i: usize, stats: &WorkloadStats, duration: Duration) {
    let WorkloadStats {
        concurrency,
        task_durations,
        ..
    } = stats;

    let ops = task_durations.count();
    let ops_ps = ops as f64 / duration.as_secs_f64();
    println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");

    if ops == 0 {
        return;
    }
    let quantile = |q| {
        let secs = task_durations.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(secs)
    };
    let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or_default() / ops as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
}

/// Checks the number of producer runs against the number of completed operations.
///
/// Every operation uses a fresh host, so each of its keys is computed exactly once. Retried
/// failures can only add runs.
fn verify_computations(workload: &PreparedWorkload, ops: usize) -> Result<()> {
    let computations = workload.take_computations();
    let expected = ops * workload.keys();

    let ok = match workload.policy() {
        FailurePolicy::Broadcast => computations == expected,
        FailurePolicy::Retry => computations >= expected,
    };
    if !ok {
        anyhow::bail!(
            "expected {expected} producer runs for {ops} operations, got {computations}"
        );
    }

    println!("  {computations} producer runs for {ops} operations");
    Ok(())
}
