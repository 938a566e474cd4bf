//! Correlation tables shared between callers and the dispatch loop.
//!
//! The multiplexer keeps two tables: protocols to handler channels and call
//! identifiers to single-use answer channels. Both sit behind the
//! object-safe [`Registry`] trait so a differently bounded or instrumented
//! table can be swapped in through [`crate::MultiplexerBuilder`].
//!
//! Closing a registry drops every stored value. Because the values own the
//! sending half of their channel, closing wakes every blocked receiver.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

/// Errors returned by registry mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry was closed and accepts no new entries.
    #[error("registry is closed")]
    Closed,
    /// An entry already exists for the key.
    #[error("an entry already exists for this key")]
    Occupied,
    /// The registry holds its maximum number of entries.
    #[error("registry is full ({capacity} entries)")]
    Full {
        /// Configured maximum.
        capacity: usize,
    },
}

/// Concurrent key-value table with a terminal closed state.
///
/// Implementations provide per-key consistency only; callers must not assume
/// that a sequence of calls observes a single snapshot.
pub trait Registry<K, V>: Send + Sync {
    /// Inserts `value` under a key that must be vacant.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Occupied`] for a live key,
    /// [`RegistryError::Full`] at capacity, and [`RegistryError::Closed`]
    /// once the registry has been closed.
    fn insert(&self, key: K, value: V) -> Result<(), RegistryError>;

    /// Returns the existing value for `key`, storing `value` first when the
    /// key is vacant.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Full`] or [`RegistryError::Closed`] when a
    /// vacant key cannot be filled.
    fn load_or_insert(&self, key: K, value: V) -> Result<V, RegistryError>;

    /// Returns a copy of the value stored for `key`.
    fn get(&self, key: &K) -> Option<V>;

    /// Removes and returns the value stored for `key`.
    fn remove(&self, key: &K) -> Option<V>;

    /// Reports whether `key` is present.
    fn contains(&self, key: &K) -> bool;

    /// Number of live entries.
    fn len(&self) -> usize;

    /// Reports whether the registry holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejects further inserts and drops every entry.
    ///
    /// Returns the number of entries dropped. Closing twice is harmless.
    fn close(&self) -> usize;

    /// Reports whether [`Registry::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// [`Registry`] backed by a sharded [`DashMap`].
///
/// An optional capacity turns it into a size-bounded table. The bound is
/// checked before each insert, so concurrent inserts racing for the last
/// free slots may overshoot it by at most the number of racing threads.
///
/// # Example
///
/// ```
/// use p2pd_mux::{ConcurrentRegistry, Registry, RegistryError};
///
/// let registry = ConcurrentRegistry::bounded(1);
/// registry.insert("a", 1).expect("first insert fits");
/// assert_eq!(registry.insert("b", 2), Err(RegistryError::Full { capacity: 1 }));
///
/// registry.close();
/// assert!(registry.is_empty());
/// assert_eq!(registry.insert("c", 3), Err(RegistryError::Closed));
/// ```
#[derive(Debug)]
pub struct ConcurrentRegistry<K: Eq + Hash, V> {
    entries: DashMap<K, V>,
    capacity: Option<usize>,
    closed: AtomicBool,
}

impl<K: Eq + Hash, V> ConcurrentRegistry<K, V> {
    /// Creates an unbounded registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Creates a registry holding at most `capacity` entries.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    /// Creates a registry with an optional bound.
    #[must_use]
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Configured bound, if any.
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn ensure_room(&self) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::Closed);
        }
        match self.capacity {
            Some(capacity) if self.entries.len() >= capacity => {
                Err(RegistryError::Full { capacity })
            }
            _ => Ok(()),
        }
    }

    /// Undoes an insert that raced with [`Registry::close`].
    fn reject_if_closed(&self, key: &K) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            self.entries.remove(key);
            return Err(RegistryError::Closed);
        }
        Ok(())
    }
}

impl<K: Eq + Hash, V> Default for ConcurrentRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Registry<K, V> for ConcurrentRegistry<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> Result<(), RegistryError> {
        self.ensure_room()?;
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::Occupied),
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }
        self.reject_if_closed(&key)
    }

    fn load_or_insert(&self, key: K, value: V) -> Result<V, RegistryError> {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }
        self.ensure_room()?;
        let stored = self.entries.entry(key.clone()).or_insert(value).clone();
        self.reject_if_closed(&key)?;
        Ok(stored)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
