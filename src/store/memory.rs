//! In-process counter store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::{CounterStore, StoreError, StoreResult};
use crate::clock::{Clock, SystemClock};

/// Expired entries are swept roughly once per this many writes.
const PURGE_INTERVAL: u64 = 100;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// Absolute expiry, as time since the Unix epoch.
    expires_at: Option<Duration>,
}

impl Entry {
    fn is_live(&self, now: Duration) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Counter store held in this process's memory.
///
/// Entries live in a sharded [`DashMap`], so concurrent callers only contend
/// when their keys share a shard. Expiry is evaluated when an entry is read;
/// expired entries are also swept periodically to reclaim memory.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
    ops: AtomicU64,
}

impl MemoryStore {
    /// Create a store that reads the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store driven by a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            closed: AtomicBool::new(false),
            ops: AtomicU64::new(0),
        }
    }

    /// Number of entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Purged expired counter entries");
        }
        removed
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Count a write and sweep on every `PURGE_INTERVAL`th one. Must run
    /// before an entry guard is taken: `retain` locks every shard.
    fn maybe_purge(&self) {
        if self.ops.fetch_add(1, Ordering::Relaxed) % PURGE_INTERVAL == 0 {
            self.purge_expired();
        }
    }

    /// Increment under the key's shard lock. `ttl` is applied only when the
    /// increment creates the counter.
    fn bump(&self, key: &str, ttl: Option<Duration>) -> StoreResult<i64> {
        self.ensure_open()?;
        self.maybe_purge();

        let now = self.clock.now();
        let slot = self.entries.entry(key.to_owned());
        // Re-checked under the shard lock: `close` sets the flag before it
        // clears, so a write that still sees the store open is wiped by it.
        self.ensure_open()?;
        let count = match slot {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let current = if entry.is_live(now) {
                    entry
                        .value
                        .parse::<i64>()
                        .map_err(|_| StoreError::NotAnInteger {
                            key: key.to_owned(),
                        })?
                } else {
                    entry.expires_at = None;
                    0
                };
                let next = current.checked_add(1).ok_or_else(|| StoreError::Overflow {
                    key: key.to_owned(),
                })?;
                entry.value = next.to_string();
                if next == 1 {
                    if let Some(ttl) = ttl {
                        entry.expires_at = Some(now + ttl);
                    }
                }
                next
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: "1".to_string(),
                    expires_at: ttl.map(|ttl| now + ttl),
                });
                1
            }
        };

        trace!(key, count, "Incremented in-process counter");
        Ok(count)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.ensure_open()?;
        self.maybe_purge();

        let entry = Entry {
            value: value.to_owned(),
            expires_at: ttl.map(|ttl| self.clock.now() + ttl),
        };
        let slot = self.entries.entry(key.to_owned());
        self.ensure_open()?;
        match slot {
            MapEntry::Occupied(mut occupied) => {
                occupied.insert(entry);
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        Ok(())
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.bump(key, None)
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        self.bump(key, Some(ttl))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.ensure_open()?;
        let now = self.clock.now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.is_live(now) {
                entry.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.entries.clear();
            debug!("In-process counter store closed");
        }
        Ok(())
    }
}
