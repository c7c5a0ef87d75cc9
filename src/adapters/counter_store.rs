//! [`CounterStore`] implementations.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};

use crate::{
    core::clock::{Clock, SystemClock},
    ports::counter_store::{CounterStore, CounterStoreError, CounterStoreResult},
};

/// Runs server-side so the increment and the conditional expiry are atomic.
const INCREMENT_WITH_EXPIRY: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Expired in-memory windows are swept once every this many increments.
const SWEEP_EVERY: u64 = 256;

/// Counters shared by every gateway node through Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Arc<Script>,
}

impl RedisCounterStore {
    /// Connect to `redis_url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(redis_url: &str) -> CounterStoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CounterStoreError::Connection(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| CounterStoreError::Connection(e.to_string()))?;
        tracing::info!("Connected rate limit counter store to {}", redis_url);
        Ok(Self {
            connection,
            script: Arc::new(Script::new(INCREMENT_WITH_EXPIRY)),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> CounterStoreResult<u64> {
        let mut connection = self.connection.clone();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self.script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| {
                if e.is_io_error() || e.is_connection_dropped() {
                    CounterStoreError::Connection(e.to_string())
                } else {
                    CounterStoreError::Command(e.to_string())
                }
            })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: u64,
}

/// Process-local counters; correct only while a single gateway node runs.
pub struct InMemoryCounterStore {
    windows: scc::HashMap<String, Window>,
    clock: Arc<dyn Clock>,
    increments: AtomicU64,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: scc::HashMap::new(),
            clock,
            increments: AtomicU64::new(0),
        }
    }

    /// Current count at `key`, if its window is still open.
    pub async fn current(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_millis();
        self.windows
            .get_async(key)
            .await
            .map(|entry| *entry.get())
            .filter(|w| now < w.expires_at)
            .map(|w| w.count)
    }

    /// Number of keys currently held, expired or not.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drop every window that has already closed.
    pub async fn purge_expired(&self) {
        let now = self.clock.now_millis();
        self.windows.retain_async(|_, w| now < w.expires_at).await;
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> CounterStoreResult<u64> {
        // Caller keys come and go; without a sweep the map only ever grows.
        if (self.increments.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.purge_expired().await;
        }

        let now = self.clock.now_millis();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let fresh = Window {
            count: 1,
            expires_at: now.saturating_add(window_ms),
        };

        let count = match self.windows.entry_async(key.to_string()).await {
            scc::hash_map::Entry::Occupied(mut o) => {
                let current = o.get_mut();
                if now >= current.expires_at {
                    *current = fresh;
                } else {
                    current.count += 1;
                }
                current.count
            }
            scc::hash_map::Entry::Vacant(v) => {
                v.insert_entry(fresh);
                1
            }
        };
        Ok(count)
    }
}
