use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, trace, warn};

use super::{CacheConfig, CacheEntry, CacheError, CacheKey, CachedResponse, EncodedResponse};

#[derive(Debug)]
struct Slot {
    payload: EncodedResponse,
    // `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Slots = HashMap<CacheKey, Slot>;

/// In-memory response store with per-entry expiry.
///
/// `CacheStore` is a handle: clones share the same map. Create one at startup
/// and hand a clone to every interception point; the map lives until the last
/// handle is dropped.
///
/// Entries are swapped in and out whole under a reader/writer lock, so readers
/// never observe a partially written entry. Expired entries are never returned
/// and are dropped when a read finds them; [`spawn_sweeper`](Self::spawn_sweeper)
/// additionally purges them on a timer.
#[derive(Debug, Clone)]
pub struct CacheStore {
    slots: Arc<RwLock<Slots>>,
    config: CacheConfig,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::with_config(CacheConfig::default())
    }
}

impl CacheStore {
    /// Creates an empty store after validating `config`.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: CacheConfig) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// TTL applied by [`set`](Self::set) when none is given.
    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Looks up a live entry.
    ///
    /// Returns `None` when the key is absent, when the entry has reached its
    /// expiry (it is removed), or when its payload cannot be decoded (it is
    /// removed and a warning is logged).
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();
        let (payload, expires_at) = {
            let slots = self.read();
            let slot = slots.get(key)?;
            (slot.payload.clone(), slot.expires_at)
        };

        if expires_at.is_some_and(|at| at <= now) {
            trace!(key = %key, "cache entry expired");
            self.remove_if(key, |slot| slot.is_expired(now));
            return None;
        }

        match CachedResponse::decode(&payload) {
            Ok(response) => Some(CacheEntry {
                response,
                expires_at,
            }),
            Err(e) => {
                warn!(key = %key, error = %e, "dropping undecodable cache entry");
                self.remove_if(key, |slot| slot.payload == payload);
                None
            }
        }
    }

    /// Inserts or overwrites the entry for `key`, expiring after `ttl` (or the
    /// store's default TTL when `None`). A TTL too large to put a deadline on
    /// keeps the entry until it is deleted or overwritten.
    pub fn set(&self, key: CacheKey, payload: EncodedResponse, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let slot = Slot {
            payload,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.write().insert(key, slot);
    }

    /// Removes the entry for `key`. Returns `false` if there was none.
    pub fn delete(&self, key: &CacheKey) -> bool {
        self.write().remove(key).is_some()
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        purge(&self.slots, Instant::now())
    }

    /// Number of stored entries, expired ones included until they are purged.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Spawns a task that purges expired entries every `sweep_interval`.
    ///
    /// The task holds only a weak reference and exits once every handle to
    /// the store has been dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let slots = Arc::downgrade(&self.slots);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(slots) = slots.upgrade() else {
                    debug!("cache store dropped — stopping sweeper");
                    break;
                };
                let removed = purge(&slots, Instant::now());
                if removed > 0 {
                    debug!(removed, "swept expired cache entries");
                }
            }
        })
    }

    fn remove_if(&self, key: &CacheKey, stale: impl FnOnce(&Slot) -> bool) {
        let mut slots = self.write();
        if slots.get(key).is_some_and(stale) {
            slots.remove(key);
        }
    }

    // Slots are replaced whole, so a poisoned lock still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn purge(slots: &RwLock<Slots>, now: Instant) -> usize {
    let mut slots = slots.write().unwrap_or_else(PoisonError::into_inner);
    let before = slots.len();
    slots.retain(|_, slot| !slot.is_expired(now));
    before - slots.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Headers, StatusCode};

    fn encoded(body: &str) -> EncodedResponse {
        CachedResponse::new(StatusCode::Ok, Headers::new(), body)
            .encode()
            .unwrap()
    }

    fn key(k: &str) -> CacheKey {
        CacheKey::from(k)
    }

    #[test]
    fn absent_key_is_a_miss() {
        let store = CacheStore::default();
        assert!(store.get(&key("GET:/nothing")).is_none());
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = CacheStore::default();
        store.set(key("GET:/a"), encoded("hello"), Some(Duration::from_secs(10)));
        let entry = store.get(&key("GET:/a")).unwrap();
        assert_eq!(entry.response.body, b"hello");
        assert_eq!(entry.response.status, StatusCode::Ok);
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = CacheStore::default();
        store.set(key("GET:/a"), encoded("first"), None);
        store.set(key("GET:/a"), encoded("second"), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key("GET:/a")).unwrap().response.body, b"second");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = CacheStore::default();
        store.set(key("GET:/a"), encoded("x"), None);
        assert!(store.delete(&key("GET:/a")));
        assert!(!store.delete(&key("GET:/a")));
        assert!(store.get(&key("GET:/a")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_boundary() {
        let store = CacheStore::default();
        let ttl = Duration::from_secs(60);
        store.set(key("GET:/a"), encoded("x"), Some(ttl));

        tokio::time::advance(ttl - Duration::from_millis(1)).await;
        assert!(store.get(&key("GET:/a")).is_some());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(store.get(&key("GET:/a")).is_none());
        // the expired read removed it
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn default_ttl_applies_when_none_given() {
        let store = CacheStore::new(CacheConfig {
            default_ttl: Duration::from_secs(30),
            ..CacheConfig::default()
        })
        .unwrap();
        store.set(key("GET:/a"), encoded("x"), None);
        let entry = store.get(&key("GET:/a")).unwrap();
        assert_eq!(entry.expires_at, Some(Instant::now() + Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(store.get(&key("GET:/a")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_ttl_never_expires() {
        let store = CacheStore::default();
        store.set(key("GET:/forever"), encoded("x"), Some(Duration::MAX));

        let entry = store.get(&key("GET:/forever")).unwrap();
        assert_eq!(entry.expires_at, None);

        tokio::time::advance(Duration::from_secs(10 * 365 * 24 * 60 * 60)).await;
        assert_eq!(store.purge_expired(), 0);
        assert!(store.get(&key("GET:/forever")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let store = CacheStore::default();
        store.set(key("short"), encoded("x"), Some(Duration::from_secs(1)));
        store.set(key("long"), encoded("y"), Some(Duration::from_secs(100)));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(&key("long")).is_some());
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_miss_and_removed() {
        let store = CacheStore::default();
        store.set(
            key("GET:/bad"),
            EncodedResponse::from(bytes::Bytes::from_static(b"not json")),
            None,
        );
        assert!(store.get(&key("GET:/bad")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn zero_sweep_interval_rejected() {
        let config = CacheConfig {
            sweep_interval: Duration::ZERO,
            ..CacheConfig::default()
        };
        assert!(CacheStore::new(config).is_err());
    }

    #[test]
    fn huge_default_ttl_rejected() {
        let config = CacheConfig {
            default_ttl: Duration::from_secs(u64::MAX),
            ..CacheConfig::default()
        };
        assert!(CacheStore::new(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_expired_entries() {
        let store = CacheStore::new(CacheConfig {
            default_ttl: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
        })
        .unwrap();
        let _sweeper = store.spawn_sweeper();
        store.set(key("GET:/a"), encoded("x"), None);
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_when_store_dropped() {
        let store = CacheStore::new(CacheConfig {
            default_ttl: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
        })
        .unwrap();
        let sweeper = store.spawn_sweeper();
        drop(store);

        tokio::time::timeout(Duration::from_secs(600), sweeper)
            .await
            .expect("sweeper should exit")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_and_writers() {
        let store = CacheStore::default();
        let mut tasks = Vec::new();
        for writer in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..200 {
                    store.set(key("shared"), encoded(&format!("{writer}-{i}")), None);
                    if let Some(entry) = store.get(&key("shared")) {
                        // always a whole, decodable snapshot
                        assert!(!entry.response.body.is_empty());
                    }
                    if i % 50 == 0 {
                        store.delete(&key("shared"));
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(store.len() <= 1);
    }
}
