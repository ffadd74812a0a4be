use crate::view::template::Error;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use std::collections::HashMap;
use std::sync::Arc;

/// Key-value store holding serialized bytecode.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error>;
    async fn set(&self, key: &str, value: Bytes) -> Result<(), Error>;
}

/// Store inside the process. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), Error> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}
