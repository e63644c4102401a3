//! Counter stores: key/value storage with expiry and atomic increment.
//!
//! Two backends implement [`CounterStore`]:
//! - [`MemoryStore`], a table local to this process
//! - [`RedisStore`], a Redis server shared by every process in a deployment
//!
//! Which one is used is a deployment decision made through [`connect`].

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::clock::Clock;
use crate::config::{StoreBackend, StoreConfig};

/// Errors raised by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store is closed")]
    Closed,
    #[error("value at '{key}' is not an integer")]
    NotAnInteger { key: String },
    #[error("increment of '{key}' would overflow")]
    Overflow { key: String },
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Backend-agnostic key/value store with time-based expiry.
///
/// Implementations must tolerate concurrent calls from any number of tasks
/// without outside synchronization, and no increment may ever be lost.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Value at `key`, or `None` if it is missing or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Overwrite `key`. With `ttl: None` the entry never expires on its own.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Add one to the integer at `key` (missing counts as zero) and return
    /// the new value. Any existing expiry is kept.
    async fn increment(&self, key: &str) -> StoreResult<i64>;

    /// Increment `key` and, if this increment created it (the result is 1),
    /// make it expire `ttl` from now.
    ///
    /// The default composes [`increment`](Self::increment) and
    /// [`expire`](Self::expire); backends override it to do both in one
    /// atomic step.
    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let count = self.increment(key).await?;
        if count == 1 {
            self.expire(key, ttl).await?;
        }
        Ok(count)
    }

    /// Make an existing `key` expire `ttl` from now. No-op for a missing key.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Release the underlying resources. Every later call fails with
    /// [`StoreError::Closed`].
    async fn close(&self) -> StoreResult<()>;
}

/// Build the counter store selected by `config`.
pub async fn connect(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> StoreResult<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!(backend = "memory", "Using in-process counter store");
            Ok(Arc::new(MemoryStore::with_clock(clock)))
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url).await?;
            info!(backend = "redis", url = %config.redis_url, "Connected to shared counter store");
            Ok(Arc::new(store))
        }
    }
}
