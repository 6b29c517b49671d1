use std::future::Future;

use futures::future::BoxFuture;

use crate::error::{CoordinationError, SlotEntry};
use crate::host::Host;

/// The computation behind a coordinated producer.
///
/// The producer takes the host as its sole input. It is invoked at most once per host and key,
/// on a task that is not owned by any particular caller, so it must not assume it runs in a
/// caller's context.
///
/// This is implemented for every `Fn(Host) -> impl Future<Output = Result<T, E>>` closure with
/// an error convertible into a [`CoordinationError`].
pub trait Producer: Send + Sync + 'static {
    /// The value produced, which is cloned out to every caller.
    type Output: Clone + Send + Sync + 'static;

    /// Computes the value for the given host.
    fn produce(&self, host: Host) -> BoxFuture<'static, SlotEntry<Self::Output>>;
}

impl<F, Fut, T, E> Producer for F
where
    F: Fn(Host) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Into<CoordinationError> + 'static,
{
    type Output = T;

    fn produce(&self, host: Host) -> BoxFuture<'static, SlotEntry<T>> {
        let computation = self(host);
        Box::pin(async move { computation.await.map_err(Into::into) })
    }
}
