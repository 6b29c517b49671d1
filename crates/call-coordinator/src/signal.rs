use std::fmt;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

/// The waiting half of a one-shot broadcast completion signal.
///
/// A signal starts out unsignaled and transitions to signaled exactly once, either when its
/// [`SignalTrigger`] is fired or when the trigger is dropped. Any number of clones may
/// [`wait`](Self::wait) on it, and all of them are released together with a clone of the value
/// the signal was fired with.
#[derive(Clone)]
pub struct Signal<T: Clone = ()> {
    fired: Shared<oneshot::Receiver<T>>,
}

/// The firing half of a [`Signal`].
pub struct SignalTrigger<T = ()> {
    tx: oneshot::Sender<T>,
}

impl<T: Clone> Signal<T> {
    /// Creates a new unsignaled signal together with its trigger.
    pub fn new() -> (Signal<T>, SignalTrigger<T>) {
        let (tx, rx) = oneshot::channel();
        let signal = Signal { fired: rx.shared() };
        (signal, SignalTrigger { tx })
    }

    /// Waits until the signal has fired, and returns the value it was fired with.
    ///
    /// Resolves to `None` if the trigger was dropped without firing, which releases waiters
    /// all the same.
    pub async fn wait(&self) -> Option<T> {
        self.fired.clone().await.ok()
    }

    /// Returns `true` if the signal has already fired.
    pub fn is_fired(&self) -> bool {
        self.fired.clone().now_or_never().is_some()
    }

    /// Returns `true` if both are clones of the same signal.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.fired.ptr_eq(&other.fired)
    }
}

impl<T> SignalTrigger<T> {
    /// Fires the signal, releasing all current and future waiters.
    pub fn fire(self, value: T) {
        // Fails only if every `Signal` is gone, in which case there is nobody left to release.
        let _ = self.tx.send(value);
    }
}

impl<T: Clone> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("fired", &self.is_fired())
            .finish()
    }
}

impl<T> fmt::Debug for SignalTrigger<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalTrigger")
            .field("canceled", &self.tx.is_canceled())
            .finish()
    }
}
