use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use sentry::{Hub, SentryFutureExt};
use tokio::runtime::Handle;

use crate::config::{CoordinatorConfig, FailurePolicy};
use crate::error::{CoordinationError, SlotEntry};
use crate::host::Host;
use crate::producer::Producer;
use crate::signal::{Signal, SignalTrigger};
use crate::slot::{PendingSignal, Slot, SlotState};

/// Starts the coordination of a producer under the given host data `key`.
///
/// The returned [`Coordination`] decorates a producer into a [`Coordinated`] producer that runs
/// at most once per host, caches its result on the host, and lets concurrent callers share the
/// result of that single run.
///
/// Callers are responsible for choosing keys that do not collide with other users of the host
/// data mapping.
pub fn coordinate(key: impl Into<String>) -> Coordination {
    let key: String = key.into();
    Coordination {
        key: Arc::from(key),
        policy: FailurePolicy::default(),
    }
}

/// A decorator for producers, created by [`coordinate`].
#[derive(Debug, Clone)]
pub struct Coordination {
    key: Arc<str>,
    policy: FailurePolicy,
}

impl Coordination {
    /// Sets the policy for failed producer runs.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Applies the given configuration.
    pub fn with_config(self, config: &CoordinatorConfig) -> Self {
        self.with_policy(config.failure_policy)
    }

    /// Wraps a producer closure.
    pub fn wrap<F, Fut, T, E>(self, producer: F) -> Coordinated<T>
    where
        F: Fn(Host) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
        E: Into<CoordinationError> + 'static,
    {
        self.wrap_producer(producer)
    }

    /// Wraps any [`Producer`].
    pub fn wrap_producer<P: Producer>(self, producer: P) -> Coordinated<P::Output> {
        Coordinated {
            key: self.key,
            policy: self.policy,
            producer: Arc::new(producer),
        }
    }
}

/// A coordinated producer.
///
/// Calling it with a host runs the wrapped producer at most once for that host, and returns a
/// clone of its result to every caller. The result is kept in the host data mapping for as long
/// as the host lives. Clones share the producer and refer to the same slot.
pub struct Coordinated<T: Clone + Send + Sync + 'static> {
    key: Arc<str>,
    policy: FailurePolicy,
    producer: Arc<dyn Producer<Output = T>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for Coordinated<T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            policy: self.policy,
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for Coordinated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinated")
            .field("key", &self.key)
            .field("policy", &self.policy)
            .finish()
    }
}

/// What a caller found in the slot.
enum Observed<T> {
    /// The producer has completed.
    Done(SlotEntry<T>),
    /// The producer is running.
    Pending(PendingSignal),
    /// The slot was empty, and this caller installed the pending signal.
    Installed(Handle, PendingSignal, SignalTrigger<Option<CoordinationError>>),
    /// The slot is empty, but there is no runtime to run the producer on.
    NoRuntime,
}

impl<T> Coordinated<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The key of the host data slot.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The policy for failed producer runs.
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Returns the value for `host`, running the producer if nobody did so yet.
    ///
    /// If the producer is already running for this host, this waits for it to complete instead.
    /// A completed slot is returned without suspending.
    ///
    /// Dropping the returned future never affects the producer run, which continues on its own
    /// task and stores its result for later callers.
    ///
    /// # Panics
    ///
    /// Starting the producer requires a tokio runtime, and panics outside of one. The slot is
    /// left empty in that case.
    ///
    /// # Errors
    ///
    /// Returns the failure of the producer according to the [`FailurePolicy`], and
    /// [`CoordinationError::SlotConflict`] if the key holds a value not written by a
    /// coordinated producer of output type `T`.
    pub async fn call(&self, host: &Host) -> SlotEntry<T> {
        let key = self.key();
        metric!(counter("coordinator.access") += 1, "key" => key);

        let mut waited = false;
        loop {
            let signal = match self.observe(host) {
                Observed::Done(entry) => {
                    if !waited {
                        metric!(counter("coordinator.memory.hit") += 1, "key" => key);
                    }
                    return entry;
                }
                Observed::Pending(signal) => {
                    tracing::debug!(key, host = %host.id(), "Waiting for pending slot");
                    metric!(counter("coordinator.wait") += 1, "key" => key);
                    signal
                }
                Observed::Installed(runtime, signal, trigger) => {
                    self.spawn_computation(&runtime, host.clone(), signal.clone(), trigger);
                    signal
                }
                Observed::NoRuntime => {
                    panic!("coordinated producers must be called within a tokio runtime")
                }
            };

            waited = true;
            // A failure is only passed along the signal when the slot was cleared. Otherwise the
            // outcome is in the slot, which was written before the signal fired.
            if let Some(err) = signal.wait().await.flatten() {
                return Err(err);
            }
        }
    }

    /// The current state of the slot on `host`.
    pub fn state(&self, host: &Host) -> SlotState {
        host.with_data(|data| match data.get(self.key()) {
            None => SlotState::Empty,
            Some(value) => match value.downcast_ref::<Slot<T>>() {
                Some(slot) => slot.state(),
                // a foreign value is never replaced, so from our point of view it is final
                None => SlotState::Failed,
            },
        })
    }

    /// Returns the value on `host` if the producer has already completed successfully.
    ///
    /// This never runs the producer.
    pub fn peek(&self, host: &Host) -> Option<T> {
        host.with_data(|data| {
            data.get(self.key())
                .and_then(|value| value.downcast_ref::<Slot<T>>())
                .and_then(|slot| slot.ready().cloned())
        })
    }

    /// Reads the slot, and installs a pending signal if it is empty.
    ///
    /// Both happen under the host lock, so exactly one caller ever observes an empty slot. Nothing
    /// is installed unless the producer can be spawned right away.
    fn observe(&self, host: &Host) -> Observed<T> {
        let key = self.key();
        let observed = host.with_data(|data| {
            let Some(value) = data.get(key) else {
                let Ok(runtime) = Handle::try_current() else {
                    return Observed::NoRuntime;
                };
                let (signal, trigger) = Signal::new();
                data.insert(key.to_owned(), Box::new(Slot::<T>::Pending(signal.clone())));
                return Observed::Installed(runtime, signal, trigger);
            };

            match value.downcast_ref::<Slot<T>>() {
                Some(Slot::Pending(signal)) => Observed::Pending(signal.clone()),
                Some(Slot::Ready(value)) => Observed::Done(Ok(value.clone())),
                Some(Slot::Failed(err)) => Observed::Done(Err(err.clone())),
                None => Observed::Done(Err(CoordinationError::SlotConflict {
                    key: key.to_owned(),
                })),
            }
        });

        if let Observed::Done(Err(err @ CoordinationError::SlotConflict { .. })) = &observed {
            tracing::error!(
                error = err as &dyn std::error::Error,
                host = %host.id(),
                "Host data holds a foreign value under a coordinated key",
            );
        }
        observed
    }

    /// Runs the producer on its own task, and completes the slot when it is done.
    fn spawn_computation(
        &self,
        runtime: &Handle,
        host: Host,
        signal: PendingSignal,
        trigger: SignalTrigger<Option<CoordinationError>>,
    ) {
        let key = self.key();
        metric!(counter("coordinator.computation") += 1, "key" => key);
        tracing::trace!(key, host = %host.id(), "Spawning coordinated computation");

        let completion = Completion::<T> {
            key: Arc::clone(&self.key),
            host: host.clone(),
            policy: self.policy,
            signal,
            trigger: Some(trigger),
            _output: PhantomData,
        };
        let producer = Arc::clone(&self.producer);

        let task = async move {
            let start = Instant::now();
            let computation = async move { producer.produce(host).await };
            let entry = match AssertUnwindSafe(computation).catch_unwind().await {
                Ok(entry) => entry,
                Err(payload) => Err(CoordinationError::from_panic(payload.as_ref())),
            };
            metric!(
                timer("coordinator.computation.duration") = start.elapsed(),
                "key" => &*completion.key,
            );
            completion.complete(entry);
        };
        runtime.spawn(task.bind_hub(Hub::new_from_top(Hub::current())));
    }
}

/// Completes a pending slot exactly once.
///
/// If it is dropped before [`complete`](Self::complete) was called, the producer task was
/// cancelled, and the slot is completed with that failure.
///
/// The slot is only written while it still holds `signal`. A value that replaced it in the
/// meantime is left alone.
struct Completion<T: Send + Sync + 'static> {
    key: Arc<str>,
    host: Host,
    policy: FailurePolicy,
    signal: PendingSignal,
    trigger: Option<SignalTrigger<Option<CoordinationError>>>,
    _output: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Completion<T> {
    fn complete(mut self, entry: SlotEntry<T>) {
        self.finish(entry);
    }

    /// Writes the outcome into the slot, and only then fires the signal.
    fn finish(&mut self, entry: SlotEntry<T>) {
        let Some(trigger) = self.trigger.take() else {
            return;
        };
        let key = &*self.key;

        if let Err(err) = &entry {
            metric!(counter("coordinator.failure") += 1, "key" => key);
            tracing::error!(
                error = err as &dyn std::error::Error,
                key,
                host = %self.host.id(),
                "Coordinated computation failed",
            );
        }

        let signal = &self.signal;
        let policy = self.policy;
        let outcome = self.host.with_data(|data| {
            let owned = matches!(
                data.get(key).and_then(|value| value.downcast_ref::<Slot<T>>()),
                Some(Slot::Pending(pending)) if pending.ptr_eq(signal)
            );
            if !owned {
                return Err(entry.err());
            }

            match (entry, policy) {
                (Err(err), FailurePolicy::Retry) => {
                    data.remove(key);
                    Ok(Some(err))
                }
                (entry, _) => {
                    data.insert(key.to_owned(), Box::new(Slot::from(entry)));
                    Ok(None)
                }
            }
        });

        // Waiters get a failure directly whenever it is not in the slot. Otherwise they re-read
        // the slot, and find either the outcome or whatever replaced it.
        let cleared = match outcome {
            Ok(cleared) => {
                tracing::trace!(key, host = %self.host.id(), cleared = cleared.is_some(), "Completed slot");
                cleared
            }
            Err(failure) => {
                tracing::warn!(key, host = %self.host.id(), "Pending slot was replaced before completion");
                failure
            }
        };

        trigger.fire(cleared);
    }
}

impl<T: Send + Sync + 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.trigger.is_some() {
            self.finish(Err(CoordinationError::Cancelled));
        }
    }
}
