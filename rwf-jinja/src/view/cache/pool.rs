//! Pool of reusable context maps.
//!
//! Fragment rendering builds a short-lived variable map for every call.
//! Maps are returned to the pool when the render is done, so their
//! allocations can be reused.
use crate::view::template::Value;

use parking_lot::Mutex;

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

type Map = HashMap<String, Value>;

#[derive(Debug)]
pub struct ContextPool {
    maps: Mutex<Vec<Map>>,
    capacity: usize,
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            maps: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take a map out of the pool and fill it with `data`.
    ///
    /// The map goes back to the pool when the returned guard is dropped.
    pub fn checkout(&self, data: impl IntoIterator<Item = (String, Value)>) -> PooledContext<'_> {
        let mut map = self.maps.lock().pop().unwrap_or_default();
        map.clear();
        map.extend(data);

        PooledContext { map, pool: self }
    }

    /// Put a map back, unless the pool is full.
    pub fn release(&self, mut map: Map) {
        map.clear();

        let mut maps = self.maps.lock();
        if maps.len() < self.capacity {
            maps.push(map);
        }
    }

    /// Number of idle maps.
    pub fn len(&self) -> usize {
        self.maps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A map checked out of the [`ContextPool`].
pub struct PooledContext<'a> {
    map: Map,
    pool: &'a ContextPool,
}

impl Deref for PooledContext<'_> {
    type Target = Map;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.map
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.map));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_checkout_and_release() {
        let pool = ContextPool::new(2);

        {
            let context = pool.checkout([("a".to_string(), Value::Integer(1))]);
            assert_eq!(context["a"], Value::Integer(1));
            assert!(pool.is_empty());
        }

        assert_eq!(pool.len(), 1);

        let context = pool.checkout([("b".to_string(), Value::Null)]);
        assert!(pool.is_empty());
        assert_eq!(context.len(), 1);
        assert!(context.get("a").is_none());
    }

    #[test]
    fn test_release_is_bounded() {
        let pool = ContextPool::new(3);

        for _ in 0..10 {
            pool.release(HashMap::from([("x".to_string(), Value::Null)]));
        }

        assert_eq!(pool.len(), 3);

        let context = pool.checkout(vec![]);
        assert!(context.is_empty());
    }

    #[test]
    fn test_many_checkouts() {
        let pool = ContextPool::new(1);

        let a = pool.checkout(vec![]);
        let b = pool.checkout(vec![]);
        drop(a);
        drop(b);

        assert_eq!(pool.len(), 1);
    }
}
