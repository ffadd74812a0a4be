//! Bounded in-memory caches used while rendering.
//!
//! All of them share [`TimedCache`]: entries are stamped when written,
//! expire after a fixed time to live, and when the cache is full the
//! entry written the longest time ago is evicted. Reading an entry
//! doesn't refresh it.
pub mod block;
pub mod context;
pub mod pool;

pub use block::BlockCache;
pub use context::ContextCache;
pub use pool::{ContextPool, PooledContext};

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Map with a maximum size and optional expiration.
#[derive(Debug)]
pub struct TimedCache<K, V> {
    entries: HashMap<K, (Instant, V)>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl<K: Hash + Eq + Clone, V> TimedCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            ttl,
        }
    }

    pub fn get<Q>(&self, key: &Q, now: Instant) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (written, value) = self.entries.get(key)?;

        match self.ttl {
            Some(ttl) if now.saturating_duration_since(*written) >= ttl => None,
            _ => Some(value),
        }
    }

    /// Write an entry, stamping it with `now`.
    ///
    /// Returns the key that had to be evicted to make room, if any.
    pub fn insert(&mut self, key: K, value: V, now: Instant) -> Option<K> {
        if self.capacity == 0 {
            return None;
        }

        let mut evicted = None;

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (written, _))| *written)
                .map(|(key, _)| key.clone());

            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }

        self.entries.insert(key, (now, value));
        evicted
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn retain(&mut self, mut f: impl FnMut(&K, &V) -> bool) {
        self.entries.retain(|key, (_, value)| f(key, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
