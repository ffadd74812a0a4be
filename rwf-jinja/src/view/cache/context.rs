//! Cache of the variables produced by context processors.
//!
//! Processors usually compute the same values for the same URL, so their
//! combined output is kept per `"METHOD:path"`. Output that contains a
//! request-like value is specific to one request and is never cached.
use super::TimedCache;
use crate::view::response::RequestLike;
use crate::view::template::Value;
use crate::view::templates::ContextProcessor;

use parking_lot::Mutex;
use tracing::debug;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ContextCache {
    cache: Mutex<TimedCache<String, HashMap<String, Value>>>,
}

impl ContextCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(TimedCache::new(capacity, Some(ttl))),
        }
    }

    /// Key identifying the request.
    pub fn cache_key(request: &dyn RequestLike) -> String {
        match request.path() {
            Some(path) => format!("{}:{}", request.method(), path),
            None => format!("{}:{}", request.method(), request.describe()),
        }
    }

    /// The context can be shared with other requests.
    pub fn is_cacheable(context: &HashMap<String, Value>) -> bool {
        !context.values().any(|value| value.is_request_like())
    }

    /// Run all processors for the request, or reuse their earlier output.
    ///
    /// The returned map is always a copy.
    pub fn processed(
        &self,
        request: &dyn RequestLike,
        processors: &[Arc<dyn ContextProcessor>],
    ) -> HashMap<String, Value> {
        self.processed_at(request, processors, Instant::now())
    }

    pub fn processed_at(
        &self,
        request: &dyn RequestLike,
        processors: &[Arc<dyn ContextProcessor>],
        now: Instant,
    ) -> HashMap<String, Value> {
        if processors.is_empty() {
            return HashMap::new();
        }

        let key = Self::cache_key(request);

        if let Some(context) = self.cache.lock().get(&key, now) {
            debug!("context cache hit \"{}\"", key);
            return context.clone();
        }

        // Processors run without the lock.
        let mut context = HashMap::new();
        for processor in processors {
            context.extend(processor.process(request));
        }

        if Self::is_cacheable(&context) {
            let evicted = self.cache.lock().insert(key, context.clone(), now);
            if let Some(evicted) = evicted {
                debug!("context cache evicted \"{}\"", evicted);
            }
        }

        context
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
