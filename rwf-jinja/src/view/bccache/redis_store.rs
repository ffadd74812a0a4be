//! Bytecode store on a Redis server.
//!
//! Uses a [`ConnectionManager`], which reconnects on its own after the
//! connection drops. The connection is opened on first use.
use super::Store;
use crate::view::template::Error;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::OnceCell;
use tracing::debug;

pub struct RedisStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("address", &self.client.get_connection_info().addr)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

impl RedisStore {
    /// Create a store for a `redis://` (or `rediss://`, `unix://`) URL.
    /// A plain `host:port` is treated as `redis://host:port`.
    ///
    /// Credentials and the database number are taken from the URL.
    pub fn open(address: &str) -> Result<Self, Error> {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("redis://{}", address)
        };

        Ok(Self {
            client: Client::open(url.as_str())?,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, Error> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                debug!(
                    "connecting to redis at {}",
                    self.client.get_connection_info().addr
                );
                self.client.get_connection_manager().await
            })
            .await?;

        Ok(connection.clone())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        let mut connection = self.connection().await?;
        let value: Option<Vec<u8>> = connection.get(key).await?;

        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), Error> {
        let mut connection = self.connection().await?;
        let () = connection.set(key, value.as_ref()).await?;

        Ok(())
    }
}
