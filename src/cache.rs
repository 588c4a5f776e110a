//! In-memory site cache
//!
//! The database stays the source of truth; the cache only shares read
//! access. Entries expire on a TTL and the map is bounded by an LRU
//! policy. Invalidation events funnel through the internal bus with a
//! short debounce so bursts collapse.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::domain::site::Site;
use crate::events::bus::EventBus;
use crate::events::types::{CacheScope, InternalEvent};
use crate::utils::error::Result;

struct CacheEntry {
    site: Site,
    inserted: Instant,
    last_access: Instant,
}

pub struct SiteCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Per-key locks so concurrent loads for one site coalesce
    loaders: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Last emission instant per debounce key
    last_invalidation: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    max_size: usize,
    debounce: Duration,
    bus: Arc<EventBus<InternalEvent>>,
}

impl SiteCache {
    #[must_use]
    pub fn new(
        ttl: Duration,
        max_size: usize,
        debounce: Duration,
        bus: Arc<EventBus<InternalEvent>>,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            loaders: Mutex::new(HashMap::new()),
            last_invalidation: Mutex::new(HashMap::new()),
            ttl,
            max_size: max_size.max(1),
            debounce,
            bus,
        }
    }

    /// Fetch a cached site, honoring the TTL and refreshing recency
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<Site> {
        let mut entries = self.entries.lock();
        let expired = entries
            .get(identifier)
            .is_some_and(|entry| entry.inserted.elapsed() > self.ttl);
        if expired {
            entries.remove(identifier);
            return None;
        }
        entries.get_mut(identifier).map(|entry| {
            entry.last_access = Instant::now();
            entry.site.clone()
        })
    }

    /// Insert or replace a site snapshot, evicting the least recently
    /// used entry when the map is full
    pub fn insert(&self, site: Site) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&site.identifier) && entries.len() >= self.max_size {
            let lru = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            if let Some(key) = lru {
                tracing::debug!("Evicting least recently used cache entry: {key}");
                entries.remove(&key);
            }
        }
        let now = Instant::now();
        entries.insert(
            site.identifier.clone(),
            CacheEntry {
                site,
                inserted: now,
                last_access: now,
            },
        );
    }

    /// Mutate a cached site in place; returns false on a miss
    pub fn with_site_mut(&self, identifier: &str, f: impl FnOnce(&mut Site)) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(identifier) {
            Some(entry) => {
                f(&mut entry.site);
                entry.last_access = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, identifier: &str) -> bool {
        self.entries.lock().remove(identifier).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of all live entries, ordered by identifier for determinism
    #[must_use]
    pub fn snapshot(&self) -> Vec<Site> {
        let entries = self.entries.lock();
        let mut sites: Vec<Site> = entries
            .values()
            .filter(|entry| entry.inserted.elapsed() <= self.ttl)
            .map(|entry| entry.site.clone())
            .collect();
        sites.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        sites
    }

    /// Fetch through the cache; concurrent calls for the same key share
    /// one loader execution
    pub async fn get_or_load<F, Fut>(&self, identifier: &str, loader: F) -> Result<Option<Site>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Site>>>,
    {
        if let Some(site) = self.get(identifier) {
            return Ok(Some(site));
        }

        let lock = {
            let mut loaders = self.loaders.lock();
            loaders
                .entry(identifier.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // A coalesced caller finds the entry the leader just loaded
        if let Some(site) = self.get(identifier) {
            return Ok(Some(site));
        }

        let loaded = loader().await?;
        if let Some(site) = &loaded {
            self.insert(site.clone());
        }
        Ok(loaded)
    }

    /// Drop one site and emit a debounced invalidation event
    pub fn invalidate_site(&self, identifier: &str) {
        self.remove(identifier);
        if self.should_emit(identifier) {
            self.bus.emit(InternalEvent::CacheInvalidated {
                scope: CacheScope::Site {
                    identifier: identifier.to_string(),
                },
            });
        }
    }

    /// Drop everything and emit a debounced invalidation event
    pub fn invalidate_all(&self) {
        self.clear();
        if self.should_emit("*") {
            self.bus.emit(InternalEvent::CacheInvalidated {
                scope: CacheScope::All,
            });
        }
    }

    fn should_emit(&self, key: &str) -> bool {
        let mut last = self.last_invalidation.lock();
        let now = Instant::now();
        match last.get(key) {
            Some(previous) if now.duration_since(*previous) < self.debounce => false,
            _ => {
                last.insert(key.to_string(), now);
                true
            }
        }
    }
}

impl std::fmt::Debug for SiteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteCache")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    fn test_bus() -> Arc<EventBus<InternalEvent>> {
        Arc::new(EventBus::new("test-internal"))
    }

    fn cache_with(bus: Arc<EventBus<InternalEvent>>) -> SiteCache {
        SiteCache::new(Duration::from_secs(300), 3, Duration::from_millis(100), bus)
    }

    fn site(identifier: &str) -> Site {
        Site {
            identifier: identifier.into(),
            name: String::new(),
            monitoring: true,
            monitors: vec![],
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let cache = cache_with(test_bus());
        assert!(cache.get("s1").is_none());

        cache.insert(site("s1"));
        assert_eq!(cache.get("s1").unwrap().identifier, "s1");

        assert!(cache.remove("s1"));
        assert!(!cache.remove("s1"));
    }

    #[test]
    fn test_ttl_expiry() {
        let bus = test_bus();
        let cache = SiteCache::new(Duration::from_millis(1), 3, Duration::from_millis(100), bus);
        cache.insert(site("s1"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("s1").is_none());
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = cache_with(test_bus());
        cache.insert(site("a"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(site("b"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(site("c"));

        // Touch "a" so "b" is the least recently used
        std::thread::sleep(Duration::from_millis(2));
        let _ = cache.get("a");

        cache.insert(site("d"));
        assert_eq!(cache.len(), 3);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let cache = cache_with(test_bus());
        cache.insert(site("zeta"));
        cache.insert(site("alpha"));
        let identifiers: Vec<String> = cache
            .snapshot()
            .into_iter()
            .map(|s| s.identifier)
            .collect();
        assert_eq!(identifiers, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_single_flight_loader_coalesces() {
        let cache = Arc::new(cache_with(test_bus()));
        let load_count = Arc::new(PlMutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let load_count = load_count.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("s1", || async {
                        *load_count.lock() += 1;
                        // Give the other callers time to pile up
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Some(site("s1")))
                    })
                    .await
            }));
        }

        for handle in handles {
            let loaded = handle.await.unwrap().unwrap();
            assert_eq!(loaded.unwrap().identifier, "s1");
        }
        assert_eq!(*load_count.lock(), 1, "loader should run exactly once");
    }

    #[test]
    fn test_invalidation_events_are_debounced() {
        let bus = test_bus();
        let received = Arc::new(PlMutex::new(Vec::new()));
        let received_clone = received.clone();
        bus.subscribe(move |envelope| {
            if let InternalEvent::CacheInvalidated { scope } = &envelope.event {
                received_clone.lock().push(scope.clone());
            }
        });

        let cache = cache_with(bus);
        cache.insert(site("s1"));
        cache.invalidate_site("s1");
        cache.invalidate_site("s1");
        cache.invalidate_site("s1");

        assert_eq!(received.lock().len(), 1, "burst should collapse to one event");

        cache.invalidate_all();
        assert_eq!(received.lock().len(), 2);
        assert_eq!(received.lock()[1], CacheScope::All);
    }

    #[test]
    fn test_with_site_mut() {
        let cache = cache_with(test_bus());
        cache.insert(site("s1"));

        let updated = cache.with_site_mut("s1", |site| site.name = "Renamed".into());
        assert!(updated);
        assert_eq!(cache.get("s1").unwrap().name, "Renamed");

        assert!(!cache.with_site_mut("missing", |_| {}));
    }
}
