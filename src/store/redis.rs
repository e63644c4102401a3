//! Redis-backed counter store shared across processes.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use super::{CounterStore, StoreError, StoreResult};

/// Increments KEYS[1] and, on the increment that created it, sets its
/// expiry to ARGV[1] seconds. Running both inside one script means a
/// counter can never be left without an expiry.
const INCREMENT_WITH_TTL_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Counter store backed by a Redis server.
///
/// Atomicity comes from Redis itself: `INCR` and the increment script run
/// as single commands on the server, so any number of processes may share
/// the same keys.
pub struct RedisStore {
    /// `None` once the store has been closed.
    connection: RwLock<Option<ConnectionManager>>,
    increment_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("closed", &self.connection.read().is_none())
            .finish()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(connection))
    }

    /// Wrap an already established connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection: RwLock::new(Some(connection)),
            increment_script: Script::new(INCREMENT_WITH_TTL_SCRIPT),
        }
    }

    /// A handle on the multiplexed connection. Clones share the socket.
    fn connection(&self) -> StoreResult<ConnectionManager> {
        self.connection.read().clone().ok_or(StoreError::Closed)
    }
}

/// Whole seconds for Redis expiry commands. Zero means "expire now".
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs()
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection()?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection()?;
        match ttl.map(ttl_secs) {
            // Redis rejects `EX 0`; an entry that expires immediately is a delete.
            Some(0) => {
                let _: () = conn.del(key).await?;
            }
            Some(secs) => {
                let _: () = conn.set_ex(key, value, secs).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.connection()?;
        let count: i64 = conn.incr(key, 1).await?;
        Ok(count)
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let mut conn = self.connection()?;
        let secs = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        let count: i64 = self
            .increment_script
            .key(key)
            .arg(secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let secs = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        let _: () = conn.expire(key, secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        // Taking the manager out first means the handle is released even if
        // nothing else succeeds from here on.
        let released = self.connection.write().take();
        if released.is_some() {
            info!("Shared counter store closed");
        } else {
            debug!("Shared counter store already closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Requires a running server, e.g.
    /// `TURNSTILE_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.
    async fn test_store() -> RedisStore {
        let url = std::env::var("TURNSTILE_TEST_REDIS_URL")
            .expect("TURNSTILE_TEST_REDIS_URL must point at a running Redis server");
        RedisStore::connect(&url)
            .await
            .unwrap_or_else(|e| panic!("cannot connect to {}: {}", url, e))
    }

    #[test]
    fn test_ttl_secs_truncates() {
        assert_eq!(ttl_secs(Duration::from_millis(2_900)), 2);
        assert_eq!(ttl_secs(Duration::from_secs(3_600)), 3_600);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_round_trip() {
        let store = test_store().await;
        let key = "turnstile:test:round_trip";
        store.delete(key).await.unwrap();

        assert_eq!(store.get(key).await.unwrap(), None);
        assert_eq!(store.increment_with_ttl(key, Duration::from_secs(30)).await.unwrap(), 1);
        assert_eq!(store.increment_with_ttl(key, Duration::from_secs(30)).await.unwrap(), 2);
        assert_eq!(store.get(key).await.unwrap().as_deref(), Some("2"));

        store.set(key, "hello", Some(Duration::from_secs(30))).await.unwrap();
        assert_eq!(store.get(key).await.unwrap().as_deref(), Some("hello"));
        assert!(matches!(
            store.increment(key).await,
            Err(StoreError::Redis(_))
        ));

        store.delete(key).await.unwrap();
        store.close().await.unwrap();
        assert!(matches!(store.get(key).await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_concurrent_increments() {
        let store = test_store().await;
        let store = std::sync::Arc::new(store);
        let key = "turnstile:test:concurrent";
        store.delete(key).await.unwrap();

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move { store.increment(key).await.unwrap() })
            })
            .collect();
        futures::future::join_all(handles).await;

        assert_eq!(store.get(key).await.unwrap().as_deref(), Some("100"));
        store.delete(key).await.unwrap();
    }
}
