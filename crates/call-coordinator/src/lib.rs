//! Single-flight memoization of asynchronous per-host computations.
//!
//! A [`Host`] carries a string-keyed data mapping. [`coordinate`] decorates a producer, an async
//! function of the host, into a [`Coordinated`] producer that keeps a [`Slot`] in that mapping:
//!
//! - The first caller finds the slot empty, installs a pending [`Signal`] without suspending in
//!   between, and starts the producer on its own task.
//! - Callers arriving while the producer runs wait for the signal. The producer run writes its
//!   result into the slot *before* firing the signal, so every woken caller finds it there.
//! - Once the slot is ready, callers get a clone of the value without suspending.
//!
//! The producer thus runs at most once per host and key, and results are kept for as long as the
//! host lives. There is no eviction or expiry.
//!
//! ```
//! use call_coordinator::{coordinate, CoordinationError, Host};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = coordinate("device_registry").wrap(|_host| async {
//!     Ok::<_, CoordinationError>(vec!["kitchen", "hallway"])
//! });
//!
//! let host = Host::new();
//! let (first, second) = futures::join!(registry.call(&host), registry.call(&host));
//! assert_eq!(first, second);
//! # }
//! ```
//!
//! ## Failures
//!
//! What a failed producer run leaves behind is decided by the [`FailurePolicy`]. By default the
//! failure is stored and broadcast to every caller, so the producer never runs twice. With
//! [`FailurePolicy::Retry`] the slot is cleared instead, and the next call runs it again.
//!
//! ## Metrics
//!
//! Counters and timers are reported via statsd once [`metrics::configure_statsd`] was called, see the
//! [`metrics`] module for a list.

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

mod config;
mod coordinate;
mod error;
mod host;
mod producer;
mod signal;
mod slot;

pub use config::*;
pub use coordinate::*;
pub use error::*;
pub use host::*;
pub use producer::*;
pub use signal::*;
pub use slot::*;
