use std::time::Duration;

use call_coordinator::{Coordinated, CoordinationError, coordinate};
use call_coordinator_test::HitCounter;

pub use call_coordinator_test::setup;

/// The value every counting producer returns.
pub const ANSWER: u32 = 42;

/// Creates a coordinated producer under `key` that records a hit for `key` on every run,
/// sleeps for `delay`, and then returns [`ANSWER`].
pub fn counting_producer(key: &str, hits: &HitCounter, delay: Duration) -> Coordinated<u32> {
    let hits = hits.clone();
    let name = key.to_owned();
    coordinate(key).wrap(move |_host| {
        hits.hit(name.as_str());
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, CoordinationError>(ANSWER)
        }
    })
}
