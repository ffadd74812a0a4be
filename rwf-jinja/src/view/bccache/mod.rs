//! Bytecode cache.
//!
//! Compiled templates are serialized and kept in a key-value store,
//! so a restarted process (or another process sharing the store) can
//! skip compilation. Every entry carries a format marker and a checksum
//! of the source it was compiled from; an entry that doesn't match
//! either is ignored and recompiled.
pub mod redis_store;
pub mod store;

pub use redis_store::RedisStore;
pub use store::{MemoryStore, Store};

use super::environment::Environment;
use super::template::{compiler::Code, Error};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use std::sync::Arc;

/// One bytecode cache entry while a template is being loaded.
#[derive(Debug, Clone)]
pub struct Bucket {
    magic: String,
    pub key: String,
    pub checksum: String,
    pub code: Option<Arc<Code>>,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    magic: String,
    checksum: String,
    code: Arc<Code>,
}

impl Bucket {
    /// Create an empty bucket. `magic` identifies the serialization
    /// format of the environment that reads and writes it.
    pub fn new(magic: &str, key: &str, checksum: &str) -> Self {
        Self {
            magic: magic.to_string(),
            key: key.to_string(),
            checksum: checksum.to_string(),
            code: None,
        }
    }

    pub fn reset(&mut self) {
        self.code = None;
    }

    /// Fill the bucket from stored bytes.
    pub fn load_bytes(&mut self, bytes: &[u8]) {
        let payload = match serde_json::from_slice::<Payload>(bytes) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("bytecode for \"{}\" is corrupted: {}", self.key, err);
                return self.reset();
            }
        };

        if payload.magic != self.magic {
            debug!("bytecode for \"{}\" is from another version", self.key);
            return self.reset();
        }

        if payload.checksum != self.checksum {
            debug!("bytecode for \"{}\" is outdated", self.key);
            return self.reset();
        }

        self.code = Some(payload.code);
    }

    /// Serialize the compiled code, if any.
    pub fn to_bytes(&self) -> Result<Option<Bytes>, Error> {
        let code = match self.code {
            Some(ref code) => code.clone(),
            None => return Ok(None),
        };

        let payload = Payload {
            magic: self.magic.clone(),
            checksum: self.checksum.clone(),
            code,
        };

        Ok(Some(Bytes::from(serde_json::to_vec(&payload)?)))
    }
}

#[async_trait]
pub trait BytecodeCache: Send + Sync {
    /// Fill the bucket from the cache. A miss leaves it empty.
    async fn load_bytecode(&self, bucket: &mut Bucket);

    /// Store the bucket's code.
    async fn dump_bytecode(&self, bucket: &Bucket);

    /// Key of the template, derived from its name and file name.
    fn get_cache_key(&self, name: &str, filename: Option<&str>) -> String {
        let mut hasher = Sha1::new();
        hasher.update(name.as_bytes());
        if let Some(filename) = filename {
            hasher.update(b"|");
            hasher.update(filename.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    fn get_source_checksum(&self, source: &str) -> String {
        format!("{:x}", Sha1::digest(source.as_bytes()))
    }

    async fn get_bucket(
        &self,
        environment: &Environment,
        name: &str,
        filename: Option<&str>,
        source: &str,
    ) -> Bucket {
        let mut bucket = Bucket::new(
            &environment.bytecode_magic(),
            &self.get_cache_key(name, filename),
            &self.get_source_checksum(source),
        );
        self.load_bytecode(&mut bucket).await;
        bucket
    }

    async fn set_bucket(&self, bucket: &Bucket) {
        self.dump_bytecode(bucket).await
    }
}

/// Bytecode cache backed by a [`Store`], e.g. Redis.
///
/// Keys are `"{prefix}:{key}"`. There is no locking between processes:
/// two of them compiling the same template both write, and the last
/// write wins. Both wrote the same code.
#[derive(Debug, Clone)]
pub struct RemoteBytecodeCache<S> {
    store: S,
    prefix: String,
}

impl<S: Store> RemoteBytecodeCache<S> {
    pub fn new(store: S, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn key(&self, bucket: &Bucket) -> String {
        format!("{}:{}", self.prefix, bucket.key)
    }
}

#[async_trait]
impl<S: Store + 'static> BytecodeCache for RemoteBytecodeCache<S> {
    async fn load_bytecode(&self, bucket: &mut Bucket) {
        let key = self.key(bucket);

        match self.store.get(&key).await {
            Ok(Some(bytes)) => {
                debug!("bytecode cache hit \"{}\"", key);
                bucket.load_bytes(&bytes);
            }
            Ok(None) => debug!("bytecode cache miss \"{}\"", key),
            Err(err) => warn!("bytecode cache unavailable: {}", err),
        }
    }

    async fn dump_bytecode(&self, bucket: &Bucket) {
        let key = self.key(bucket);

        let bytes = match bucket.to_bytes() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(err) => {
                warn!("bytecode for \"{}\" can't be serialized: {}", key, err);
                return;
            }
        };

        match self.store.set(&key, bytes).await {
            Ok(()) => debug!("bytecode cache stored \"{}\"", key),
            Err(err) => warn!("bytecode cache unavailable: {}", err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::view::loader::DictLoader;

    fn bucket(checksum: &str) -> Bucket {
        Bucket::new("magic", "key", checksum)
    }

    #[tokio::test]
    async fn test_bucket_checksum_mismatch() -> Result<(), Error> {
        let env = Environment::default();
        let template = env.from_string("hello", None)?;

        let mut stored = bucket("a");
        stored.code = Some(template.code().clone());
        let bytes = stored.to_bytes()?.expect("code");

        let mut same = bucket("a");
        same.load_bytes(&bytes);
        assert_eq!(same.code.as_deref(), Some(template.code().as_ref()));

        let mut changed = bucket("b");
        changed.load_bytes(&bytes);
        assert!(changed.code.is_none());

        let mut other = Bucket::new("other magic", "key", "a");
        other.load_bytes(&bytes);
        assert!(other.code.is_none());

        let mut corrupted = bucket("a");
        corrupted.load_bytes(b"{not json");
        assert!(corrupted.code.is_none());

        Ok(())
    }

    #[test]
    fn test_keys() {
        let cache = RemoteBytecodeCache::new(MemoryStore::default(), "rwf");

        assert_eq!(
            cache.get_cache_key("index.html", None),
            cache.get_cache_key("index.html", None)
        );
        assert_ne!(
            cache.get_cache_key("index.html", None),
            cache.get_cache_key("index.html", Some("templates/index.html"))
        );
        assert_eq!(
            cache.get_source_checksum("hello"),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        assert_eq!(cache.key(&bucket("a")), "rwf:key");
    }

    #[tokio::test]
    async fn test_changed_source_recompiles() -> Result<(), Error> {
        let store = MemoryStore::default();
        let loader = DictLoader::new([("a.html", "one")]);
        let cache = RemoteBytecodeCache::new(store.clone(), "rwf");
        let env = Environment::builder()
            .loader(loader.clone())
            .bytecode_cache(cache.clone())
            .auto_reload(true)
            .build();

        env.get_template("a.html", None, None).await?;
        loader.insert("a.html", "two");
        let template = env.get_template("a.html", None, None).await?;

        assert_eq!(template.render_default().await?, "two");
        // Same name, so the entry was overwritten.
        assert_eq!(store.len(), 1);

        let bucket = cache.get_bucket(&env, "a.html", None, "two").await;
        assert!(bucket.code.is_some());

        Ok(())
    }

    struct Unavailable;

    #[async_trait]
    impl Store for Unavailable {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, Error> {
            Err(Error::Store("NOAUTH Authentication required.".into()))
        }

        async fn set(&self, _key: &str, _value: Bytes) -> Result<(), Error> {
            Err(Error::Store("NOAUTH Authentication required.".into()))
        }
    }

    #[tokio::test]
    async fn test_store_errors_are_misses() -> Result<(), Error> {
        let env = Environment::builder()
            .loader(DictLoader::new([("a.html", "hello")]))
            .bytecode_cache(RemoteBytecodeCache::new(Unavailable, "rwf"))
            .build();

        let template = env.get_template("a.html", None, None).await?;
        assert_eq!(template.render_default().await?, "hello");

        Ok(())
    }
}
