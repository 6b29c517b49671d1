use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

type HostData = HashMap<String, Box<dyn Any + Send + Sync>>;

struct HostInner {
    id: Uuid,
    data: Mutex<HostData>,
}

/// The ambient context that coordinated producers are run against.
///
/// A [`Host`] is a cheaply cloneable handle to a string-keyed mapping of heterogeneous values.
/// Clones share the same mapping, so they refer to the same host. Every coordinated slot lives
/// in this mapping under its key, and is dropped together with the last handle to the host.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    /// Creates a fresh host with an empty data mapping.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HostInner {
                id: Uuid::new_v4(),
                data: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A unique identifier of this host, used for logging.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns `true` if both handles refer to the same host.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    /// Reads the value stored under `key`.
    ///
    /// Returns `None` if the key is absent, or if it holds a value of a type other than `V`.
    pub fn get<V>(&self, key: &str) -> Option<V>
    where
        V: Clone + 'static,
    {
        self.lock()
            .get(key)
            .and_then(|value| value.downcast_ref::<V>())
            .cloned()
    }

    /// Stores `value` under `key`, replacing whatever was there before.
    pub fn set<V>(&self, key: impl Into<String>, value: V)
    where
        V: Send + Sync + 'static,
    {
        self.lock().insert(key.into(), Box::new(value));
    }

    /// Returns `true` if anything is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// The number of keys in the data mapping.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if the data mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs `f` with exclusive access to the data mapping.
    ///
    /// The lock is held for the duration of `f`, which makes any read-modify-write inside it
    /// atomic with respect to all other accesses of this host. `f` must not block.
    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&mut HostData) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, HostData> {
        // A panic while holding the lock can only happen in a downcast or a `HashMap` operation,
        // neither of which leaves the mapping in a broken state.
        self.inner.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = self
            .inner
            .data
            .try_lock()
            .map(|data| data.len())
            .unwrap_or_default();
        f.debug_struct("Host")
            .field("id", &self.inner.id)
            .field("keys", &keys)
            .finish()
    }
}
