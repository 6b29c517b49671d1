use serde::Deserialize;

/// What a failed producer run leaves behind in its slot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Store the failure and hand it out to every current and future caller.
    ///
    /// The producer runs at most once per host and key, even when it fails.
    #[default]
    Broadcast,
    /// Clear the slot and release the waiters, so that the next call runs the producer again.
    ///
    /// The producer runs at most once *concurrently* per host and key.
    Retry,
}

/// Configuration of coordinated producers.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// What happens when a producer fails, panics or is cancelled.
    pub failure_policy: FailurePolicy,
}
