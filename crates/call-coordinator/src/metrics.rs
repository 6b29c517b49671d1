//! Reporting of coordinator metrics to statsd.
//!
//! Coordinated producers report the following metrics, each tagged with the slot `key`:
//!
//! - `coordinator.access` (counter): All calls of a coordinated producer.
//! - `coordinator.memory.hit` (counter): Calls served from a completed slot without waiting.
//! - `coordinator.wait` (counter): Calls that found a pending slot and waited for it.
//! - `coordinator.computation` (counter): Actual producer runs.
//! - `coordinator.computation.duration` (timer): How long a producer run took.
//! - `coordinator.failure` (counter): Producer runs that failed, panicked or were cancelled.
//!
//! Nothing is reported unless [`configure_statsd`] was called.
use std::collections::BTreeMap;
use std::net::ToSocketAddrs;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use cadence::{Metric, MetricBuilder, StatsdClient, UdpMetricSink};

static METRICS_CLIENT: OnceLock<MetricsClient> = OnceLock::new();

/// A statsd client with a set of default tags.
pub(crate) struct MetricsClient {
    pub(crate) statsd_client: StatsdClient,
    tags: BTreeMap<String, String>,
}

impl MetricsClient {
    /// Sends the metric after attaching the default tags.
    #[inline(always)]
    pub(crate) fn send<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (tag, value) in self.tags.iter() {
            metric = metric.with_tag(tag, value);
        }
        metric.send()
    }
}

/// Tell the metrics system to report to statsd.
///
/// `tags` are attached to every metric. Fails if `host` does not resolve, or if metrics were
/// already configured.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    tags: BTreeMap<String, String>,
) -> Result<()> {
    let addrs: Vec<_> = host
        .to_socket_addrs()
        .context("failed to resolve statsd host")?
        .collect();
    if let Some(addr) = addrs.first() {
        tracing::info!("Reporting metrics to statsd at {}", addr);
    }
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").context("failed to bind statsd socket")?;
    socket.set_nonblocking(true)?;
    let sink = UdpMetricSink::from(&addrs[..], socket).context("failed to create statsd sink")?;
    let statsd_client = StatsdClient::from_sink(prefix, sink);

    METRICS_CLIENT
        .set(MetricsClient {
            statsd_client,
            tags,
        })
        .map_err(|_| anyhow::anyhow!("metrics are already configured"))
}

/// Invokes `f` with the statsd client, if one is configured.
#[inline(always)]
pub(crate) fn with_client<F>(f: F)
where
    F: FnOnce(&MetricsClient),
{
    if let Some(client) = METRICS_CLIENT.get() {
        f(client)
    }
}

/// Emits a counter or timer metric, tagged with `key => value` pairs.
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        use cadence::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send(
                client.statsd_client.count_with_tags($id, $value)
                    $(.with_tag($k, $v))*
            );
        })
    }};

    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {{
        use cadence::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send(
                client.statsd_client.time_with_tags($id, $value)
                    $(.with_tag($k, $v))*
            );
        })
    }};
}
