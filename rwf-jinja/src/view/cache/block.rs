//! Cache of block render functions used by fragment rendering.
use super::TimedCache;
use crate::view::template::{BlockFn, Template};

use parking_lot::Mutex;
use tracing::debug;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Block names of one compiled template.
#[derive(Debug)]
struct KnownBlocks {
    template: u64,
    names: HashSet<String>,
}

#[derive(Debug)]
struct State {
    functions: TimedCache<String, BlockFn>,
    templates: HashMap<String, KnownBlocks>,
}

/// Maps `"template:block"` to the block's render function.
#[derive(Debug)]
pub struct BlockCache {
    state: Mutex<State>,
}

impl BlockCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                functions: TimedCache::new(capacity, Some(ttl)),
                templates: HashMap::new(),
            }),
        }
    }

    pub fn key(template: &str, block: &str) -> String {
        format!("{}:{}", template, block)
    }

    pub fn get(&self, template: &str, block: &str) -> Option<BlockFn> {
        self.get_at(template, block, Instant::now())
    }

    pub fn get_at(&self, template: &str, block: &str, now: Instant) -> Option<BlockFn> {
        let key = Self::key(template, block);
        let found = self.state.lock().functions.get(&key, now).cloned();

        match found {
            Some(_) => debug!("block cache hit \"{}\"", key),
            None => debug!("block cache miss \"{}\"", key),
        }

        found
    }

    pub fn insert(&self, template: &str, block: &str, function: BlockFn) {
        self.insert_at(template, block, function, Instant::now())
    }

    pub fn insert_at(&self, template: &str, block: &str, function: BlockFn, now: Instant) {
        let evicted = self
            .state
            .lock()
            .functions
            .insert(Self::key(template, block), function, now);

        if let Some(evicted) = evicted {
            debug!("block cache evicted \"{}\"", evicted);
        }
    }

    /// Remember the block names of the template.
    ///
    /// A template recompiled since it was last seen replaces the
    /// remembered names, and its cached block functions are dropped.
    pub fn observe(&self, template: &Template) {
        let mut state = self.state.lock();

        let current = state
            .templates
            .get(template.name())
            .map(|known| known.template == template.id())
            .unwrap_or(false);

        if current {
            return;
        }

        let stale = state.templates.contains_key(template.name());

        state.templates.insert(
            template.name().to_string(),
            KnownBlocks {
                template: template.id(),
                names: template.blocks().keys().cloned().collect(),
            },
        );

        if stale {
            // Block names never contain ':', template names might.
            state.functions.retain(|key, _| {
                key.rsplit_once(':')
                    .map(|(name, _)| name != template.name())
                    .unwrap_or(true)
            });
            debug!("template \"{}\" changed, dropped its blocks", template.name());
        }
    }

    /// Check a block against the names seen so far.
    ///
    /// `None` if the template hasn't been seen yet.
    pub fn validate(&self, template: &str, block: &str) -> Option<bool> {
        self.state
            .lock()
            .templates
            .get(template)
            .map(|known| known.names.contains(block))
    }

    pub fn len(&self) -> usize {
        self.state.lock().functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
