use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
#[error("counter store unavailable: {0}")]
pub struct CounterError(pub String);

/// Shared atomic counter with TTL semantics (`INCR` + `EXPIRE`).
///
/// Idempotency and rate limiting both ride on this contract: concurrent
/// requests, including ones landing on different gateway instances, must
/// agree on "first write wins" and on window-bucketed counts. The in-process
/// implementation below covers single-instance deployments; multi-instance
/// deployments plug in a shared backend through this trait.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the post-increment count.
    /// The first increment of a key sets its TTL.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CounterError>;

    /// Delete a key so the next increment starts a fresh window.
    async fn remove(&self, key: &str) -> Result<(), CounterError>;

    /// Remaining TTL of a live key, `None` when absent or expired.
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, CounterError>;
}

struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store: a mutex-guarded map with `Instant` expiries.
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drop expired entries so the map does not grow unboundedly.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        self.entries.lock().await.retain(|_, e| e.expires_at > now);
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CounterError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.count += 1;
                Ok(entry.count)
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    CounterEntry {
                        count: 1,
                        expires_at: now + ttl,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<(), CounterError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, CounterError> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.expires_at - now))
    }
}
