//! Helpers for testing coordinated producers.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Count producer runs with a [`HitCounter`]. Clones share their counts, so a clone can be
//!    moved into the producer while the test keeps the original to make assertions.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `call_coordinator` crate and mutes
///    all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("call_coordinator=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Counts hits per name, for example producer runs per host or per key.
#[derive(Clone, Debug, Default)]
pub struct HitCounter {
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl HitCounter {
    /// Creates a counter without any hits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a hit for `name`, and returns the number of hits for it so far.
    pub fn hit(&self, name: impl Into<String>) -> usize {
        let mut hits = self.hits.lock().unwrap();
        let hits = hits.entry(name.into()).or_default();
        *hits += 1;
        *hits
    }

    /// The number of hits recorded for `name`.
    pub fn hits(&self, name: &str) -> usize {
        self.hits.lock().unwrap().get(name).copied().unwrap_or_default()
    }

    /// The number of hits recorded across all names.
    pub fn total(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}
