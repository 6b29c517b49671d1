use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use call_coordinator::{
    Coordinated, CoordinationError, CoordinatorConfig, FailurePolicy, Host, SlotEntry, coordinate,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).context("failed to open workloads file")?;
        serde_yaml::from_reader(file).context("failed to parse workloads YAML")
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    /// Number of operations in flight.
    pub concurrency: usize,
    /// Concurrent callers per key within one operation.
    pub fanout: usize,
    /// Distinct keys per operation.
    pub keys: usize,
    /// How long each producer run sleeps.
    #[serde(default, with = "humantime_serde")]
    pub producer_delay: Duration,
    /// Probability that a producer run fails.
    #[serde(default)]
    pub failure_rate: f64,
}

/// A workload with its coordinated producers set up.
pub struct PreparedWorkload {
    pub concurrency: usize,
    fanout: usize,
    policy: FailurePolicy,
    producers: Vec<Coordinated<u64>>,
    computations: Arc<AtomicUsize>,
}

pub fn prepare_workload(
    index: usize,
    workload: Workload,
    config: &CoordinatorConfig,
) -> Result<PreparedWorkload> {
    let Workload {
        concurrency,
        fanout,
        keys,
        producer_delay,
        failure_rate,
    } = workload;

    if concurrency == 0 || fanout == 0 || keys == 0 {
        anyhow::bail!("workload {index}: `concurrency`, `fanout` and `keys` must be positive");
    }
    if !(0.0..=1.0).contains(&failure_rate) {
        anyhow::bail!("workload {index}: `failure_rate` must be within [0, 1]");
    }

    let computations = Arc::new(AtomicUsize::new(0));
    let producers = (0..keys)
        .map(|key| {
            let computations = Arc::clone(&computations);
            coordinate(format!("workload-{index}.key-{key}"))
                .with_config(config)
                .wrap(move |_host| {
                    computations.fetch_add(1, Ordering::Relaxed);
                    async move {
                        if !producer_delay.is_zero() {
                            tokio::time::sleep(producer_delay).await;
                        }
                        if rand::random_bool(failure_rate) {
                            return Err(CoordinationError::failed("injected failure"));
                        }
                        Ok(rand::random::<u64>())
                    }
                })
        })
        .collect();

    Ok(PreparedWorkload {
        concurrency,
        fanout,
        policy: config.failure_policy,
        producers,
        computations,
    })
}

impl PreparedWorkload {
    /// The number of distinct keys per operation.
    pub fn keys(&self) -> usize {
        self.producers.len()
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Returns the number of producer runs so far, and resets it.
    pub fn take_computations(&self) -> usize {
        self.computations.swap(0, Ordering::Relaxed)
    }
}

/// Runs one operation: every key is called `fanout` times concurrently on a fresh host.
pub async fn run_operation(workload: &PreparedWorkload) -> Result<()> {
    let host = Host::new();

    let keys = workload.producers.iter().map(|producer| {
        let host = &host;
        async move {
            let calls = (0..workload.fanout).map(|_| producer.call(host));
            let results = futures::future::join_all(calls).await;
            check_agreement(producer.key(), workload.policy, &results)
        }
    });

    futures::future::join_all(keys).await.into_iter().collect()
}

/// Checks that all callers of one key saw the same outcome.
///
/// Successful results always agree. When failures are retried, callers that arrive after a failed
/// run trigger a new one, so errors may be mixed with successes.
fn check_agreement(key: &str, policy: FailurePolicy, results: &[SlotEntry<u64>]) -> Result<()> {
    let Some(first) = results.first() else {
        return Ok(());
    };

    let mut values = results.iter().filter_map(|result| result.as_ref().ok());
    if let Some(value) = values.next() {
        if let Some(other) = values.find(|other| *other != value) {
            anyhow::bail!("callers of `{key}` got different values: {value} and {other}");
        }
    }

    if policy == FailurePolicy::Broadcast {
        if let Some(other) = results.iter().find(|result| *result != first) {
            anyhow::bail!("callers of `{key}` got different outcomes: {first:?} and {other:?}");
        }
    }

    Ok(())
}
