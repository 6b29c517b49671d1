use crate::error::{CoordinationError, SlotEntry};
use crate::signal::Signal;

/// The completion signal of a pending slot.
///
/// It fires with the failure of the producer run if the slot was cleared instead of storing
/// that failure (see [`FailurePolicy::Retry`](crate::FailurePolicy::Retry)), and with `None`
/// otherwise, in which case waiters find the outcome in the slot itself.
pub type PendingSignal = Signal<Option<CoordinationError>>;

/// The value a coordinated producer keeps in the host data mapping under its key.
///
/// An absent key is the *empty* slot. The first caller installs [`Slot::Pending`], and the
/// producer run replaces it with [`Slot::Ready`] or [`Slot::Failed`] before firing the signal.
#[derive(Debug, Clone)]
pub enum Slot<T> {
    /// The producer is running; waiters are released once the signal fires.
    Pending(PendingSignal),
    /// The memoized result of the producer.
    Ready(T),
    /// The failure of the producer, handed out to every caller.
    Failed(CoordinationError),
}

impl<T> Slot<T> {
    /// The state of this slot, without its contents.
    pub fn state(&self) -> SlotState {
        match self {
            Slot::Pending(_) => SlotState::Pending,
            Slot::Ready(_) => SlotState::Ready,
            Slot::Failed(_) => SlotState::Failed,
        }
    }

    /// The ready value, if the producer has completed successfully.
    pub fn ready(&self) -> Option<&T> {
        match self {
            Slot::Ready(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<SlotEntry<T>> for Slot<T> {
    fn from(entry: SlotEntry<T>) -> Self {
        match entry {
            Ok(value) => Slot::Ready(value),
            Err(err) => Slot::Failed(err),
        }
    }
}

/// A snapshot of the state of a coordinated slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Nothing is stored under the key yet.
    Empty,
    /// The producer is running.
    Pending,
    /// The producer completed successfully.
    Ready,
    /// The producer failed.
    Failed,
}

impl SlotState {
    /// Returns `true` once the slot can no longer change.
    pub fn is_final(&self) -> bool {
        matches!(self, SlotState::Ready | SlotState::Failed)
    }
}
