//! In-memory TTL cache.
//!
//! Keyed store with per-entry expiry, used by provider adapters to absorb
//! repeated candle fetches inside a strategy cadence. A background sweeper
//! owned by the cache removes expired entries; it stops on its own once the
//! last handle is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Shared-handle TTL cache. Cloning is cheap and all clones see one store.
///
/// Must be constructed inside a tokio runtime: construction spawns the
/// sweeper task.
#[derive(Debug, Clone)]
pub struct TtlCache<V> {
    store: Arc<RwLock<HashMap<String, Entry<V>>>>,
    default_ttl: Duration,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(default_ttl: Duration, cleanup_interval: Duration) -> Self {
        let store: Arc<RwLock<HashMap<String, Entry<V>>>> = Arc::new(RwLock::new(HashMap::new()));

        // The sweeper holds only a weak handle; dropping the last cache
        // handle ends the task on its next tick.
        let weak = Arc::downgrade(&store);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(cleanup_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(store) = weak.upgrade() else { break };
                let now = Instant::now();
                let mut map = store.write().await;
                let before = map.len();
                map.retain(|_, entry| entry.expires_at > now);
                let evicted = before - map.len();
                if evicted > 0 {
                    debug!(evicted, "TTL cache sweep removed expired entries");
                }
            }
        });

        Self { store, default_ttl }
    }

    /// Returns the value for `key` unless it is missing or expired.
    /// Expired entries are evicted on the spot.
    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let map = self.store.read().await;
            match map.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }
        self.store.write().await.remove(key);
        None
    }

    /// Stores a value under the default TTL.
    pub async fn set(&self, key: &str, value: V) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.store.write().await.insert(key.to_string(), entry);
    }

    pub async fn delete(&self, key: &str) {
        self.store.write().await.remove(key);
    }

    pub async fn clear(&self) {
        self.store.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }
}

impl<V: Clone + Send + Sync + 'static> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CLEANUP_INTERVAL)
    }
}
