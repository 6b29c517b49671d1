use std::any::Any;

use thiserror::Error;

/// An error returned by a coordinated producer.
///
/// The error is stored in the coordinated slot and handed out to every caller of the same
/// `(host, key)` pair, which is why it is [`Clone`] and keeps only a rendered message of the
/// underlying producer error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    /// The producer returned an error.
    #[error("producer failed: {0}")]
    Failed(String),
    /// The producer panicked.
    ///
    /// The attached string contains the panic message, if it had one.
    #[error("producer panicked: {0}")]
    Panicked(String),
    /// The producer was dropped before it completed, for example because its runtime shut down.
    #[error("producer was cancelled")]
    Cancelled,
    /// The host stores a value under this key that was not put there by a coordinated producer
    /// of the same output type.
    #[error("slot `{key}` holds a foreign value")]
    SlotConflict {
        /// The conflicting key.
        key: String,
    },
}

impl CoordinationError {
    /// Creates a [`Failed`](Self::Failed) error from any displayable producer error.
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self::Failed(error.to_string())
    }

    /// Creates a [`Panicked`](Self::Panicked) error from a panic payload.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "<non-string panic payload>".to_owned()
        };
        Self::Panicked(message)
    }
}

impl From<anyhow::Error> for CoordinationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }
}

impl From<std::io::Error> for CoordinationError {
    fn from(err: std::io::Error) -> Self {
        Self::failed(err)
    }
}

/// The outcome of a coordinated producer: either `Ok(T)` or the error shared by all callers.
pub type SlotEntry<T> = Result<T, CoordinationError>;
