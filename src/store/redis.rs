//! Redis store backend.
//!
//! One [`MultiplexedConnection`] is shared by every in-flight request; the
//! redis client multiplexes concurrent commands over it and clones of the
//! handle are cheap.

use std::sync::Arc;

use redis::{AsyncCommands, aio::MultiplexedConnection};
use tokio::sync::RwLock;
use tracing::{error, info};

use super::{Store, StoreError, StoreFuture};

/// A Redis-backed [`Store`].
///
/// [`connect`](Self::connect) never fails: the connection is established on a
/// background task, and until it succeeds every command reports
/// [`StoreError::Unavailable`]. Callers that treat store errors as cache
/// misses therefore degrade gracefully when Redis is down.
pub struct RedisStore {
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
}

impl RedisStore {
    /// Starts connecting to the Redis endpoint at `url`
    /// (e.g. `"redis://127.0.0.1:6379"`).
    ///
    /// The connection attempt runs on a spawned Tokio task; failures are
    /// logged rather than returned. Must be called from within a Tokio
    /// runtime.
    pub fn connect(url: impl Into<String>) -> Self {
        let url = url.into();
        let connection: Arc<RwLock<Option<MultiplexedConnection>>> =
            Arc::new(RwLock::new(None));

        let slot = Arc::clone(&connection);
        tokio::spawn(async move {
            let client = match redis::Client::open(url.as_str()) {
                Ok(client) => client,
                Err(err) => {
                    error!(error = %err, "invalid redis endpoint, caching disabled");
                    return;
                }
            };
            match client.get_multiplexed_tokio_connection().await {
                Ok(conn) => {
                    info!("redis connected");
                    *slot.write().await = Some(conn);
                }
                Err(err) => {
                    error!(error = %err, "redis connection failed, caching disabled");
                }
            }
        });

        Self { connection }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or(StoreError::Unavailable)
    }
}

impl Store for RedisStore {
    fn get(&self, key: &str) -> StoreFuture<'_, Option<String>> {
        let key = key.to_owned();
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
    }

    fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreFuture<'_, ()> {
        let key = key.to_owned();
        let value = value.to_owned();
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let _: () = conn.set_ex(key, value, ttl_seconds).await?;
            Ok(())
        })
    }

    fn del(&self, keys: Vec<String>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            // A zero-argument DEL is a protocol error.
            if keys.is_empty() {
                return Ok(0);
            }
            let mut conn = self.connection().await?;
            let count: u64 = conn.del(keys).await?;
            Ok(count)
        })
    }
}
