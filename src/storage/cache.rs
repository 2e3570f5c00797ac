use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, trace};

use crate::core::config::CacheConfig;
use crate::core::error::StorageError;
use crate::observability::metrics as obs;

use super::ObjectStore;

// ---------------------------------------------------------------------------
// Listing cache
// ---------------------------------------------------------------------------

/// Cached listing for one prefix.
#[derive(Debug, Clone, Default)]
struct CacheEntry {
    items: Vec<String>,
    /// Unix seconds; the entry is fresh while `now < expires_at_unix`.
    expires_at_unix: i64,
    /// Bumped by every `bust`. A listing fetched under an older epoch is
    /// returned to its caller but never committed.
    epoch: u64,
}

enum Lookup {
    Hit(Vec<String>),
    Miss { epoch: u64 },
}

/// Per-prefix TTL cache in front of `ObjectStore::list`.
///
/// - Unseen prefixes count as expired, so the first read always hits the store.
/// - `bust` zeroes the expiry and bumps the entry's epoch, so a listing that
///   was in flight during the bust cannot be committed as fresh.
/// - Callers always get a copy of the cached keys.
/// - The lock is never held across a store call; only the commit of a fresh
///   listing re-takes it.
pub struct ListingCache<S: ObjectStore> {
    store: Arc<S>,
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl<S: ObjectStore> ListingCache<S> {
    pub fn new(store: Arc<S>, config: &CacheConfig) -> Self {
        Self {
            store,
            config: config.clone(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// List keys under `prefix`, serving from cache while fresh.
    pub async fn get(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        if !self.config.enabled {
            return self.store.list(prefix).await;
        }

        let seen_epoch = match self.lookup(prefix, Utc::now().timestamp()) {
            Lookup::Hit(items) => {
                debug!(prefix, count = items.len(), "listing cache hit");
                obs::inc_listing_cache_hit();
                return Ok(items);
            }
            Lookup::Miss { epoch } => epoch,
        };

        obs::inc_listing_cache_miss();
        trace!(prefix, "listing cache miss");
        let items = self.store.list(prefix).await?;

        let expires_at_unix = self.expiry_from(Utc::now().timestamp());
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(prefix.to_string()).or_default();
        if entry.epoch != seen_epoch {
            debug!(prefix, "listing cache busted during fetch, not committing");
            return Ok(items);
        }
        entry.items = items.clone();
        entry.expires_at_unix = expires_at_unix;
        debug!(prefix, count = items.len(), expires_at_unix, "listing cached");

        Ok(items)
    }

    /// Force the next `get(prefix)` to go to the store.
    pub fn bust(&self, prefix: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(prefix.to_string()).or_default();
        entry.expires_at_unix = 0;
        entry.epoch = entry.epoch.wrapping_add(1);
        obs::inc_listing_cache_bust();
        debug!(prefix, "listing cache busted");
    }

    fn lookup(&self, prefix: &str, now_unix: i64) -> Lookup {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(prefix) {
            Some(entry) if now_unix < entry.expires_at_unix => Lookup::Hit(entry.items.clone()),
            Some(entry) => Lookup::Miss { epoch: entry.epoch },
            None => Lookup::Miss { epoch: 0 },
        }
    }

    fn expiry_from(&self, now_unix: i64) -> i64 {
        let ttl = i64::try_from(self.config.ttl_secs).unwrap_or(i64::MAX);
        now_unix.saturating_add(ttl)
    }
}

#[cfg(test)]
impl<S: ObjectStore> ListingCache<S> {
    fn expires_at(&self, prefix: &str) -> Option<i64> {
        self.entries
            .lock()
            .unwrap()
            .get(prefix)
            .map(|e| e.expires_at_unix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Acl;
    use crate::storage::memory::InMemoryObjectStore;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Store whose `list` takes its snapshot, then waits for `release`
    /// while `hold` is set.
    #[derive(Default)]
    struct HeldListStore {
        inner: InMemoryObjectStore,
        hold: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl ObjectStore for HeldListStore {
        async fn put(
            &self,
            key: &str,
            data: Bytes,
            content_type: &str,
            acl: Acl,
        ) -> Result<String, StorageError> {
            self.inner.put(key, data, content_type, acl).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            let snapshot = self.inner.list(prefix).await?;
            if self.hold.load(Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(snapshot)
        }

        fn url_for(&self, key: &str) -> String {
            self.inner.url_for(key)
        }

        async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
            self.inner.presigned_url(key, ttl).await
        }
    }

    fn test_config() -> CacheConfig {
        CacheConfig {
            enabled: true,
            bust_on_upload: true,
            ttl_secs: 300,
        }
    }

    async fn seeded_store(keys: &[&str]) -> Arc<InMemoryObjectStore> {
        let store = Arc::new(InMemoryObjectStore::default());
        for key in keys {
            store
                .put(key, Bytes::from_static(b"x"), "t", Acl::Private)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_hit_within_ttl_skips_store() {
        let store = seeded_store(&["a/1", "a/2"]).await;
        let cache = ListingCache::new(store.clone(), &test_config());

        let first = cache.get("a/").await.unwrap();
        let second = cache.get("a/").await.unwrap();

        assert_eq!(first, vec!["a/1", "a/2"]);
        assert_eq!(first, second);
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_listing_hides_new_objects_until_bust() {
        let store = seeded_store(&["a/1"]).await;
        let cache = ListingCache::new(store.clone(), &test_config());
        assert_eq!(cache.get("a/").await.unwrap(), vec!["a/1"]);

        store
            .put("a/2", Bytes::from_static(b"x"), "t", Acl::Private)
            .await
            .unwrap();
        assert_eq!(cache.get("a/").await.unwrap(), vec!["a/1"]);

        cache.bust("a/");
        assert_eq!(cache.expires_at("a/"), Some(0));
        assert_eq!(cache.get("a/").await.unwrap(), vec!["a/1", "a/2"]);
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_prefixes_are_independent() {
        let store = seeded_store(&["a/1", "b/1"]).await;
        let cache = ListingCache::new(store.clone(), &test_config());

        cache.get("a/").await.unwrap();
        cache.get("b/").await.unwrap();
        cache.bust("a/");
        cache.get("b/").await.unwrap();
        assert_eq!(store.list_calls(), 2);

        cache.get("a/").await.unwrap();
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_bust_unseen_prefix_leaves_it_expired() {
        let store = seeded_store(&["a/1"]).await;
        let cache = ListingCache::new(store.clone(), &test_config());
        cache.bust("never-listed/");
        assert_eq!(cache.expires_at("never-listed/"), Some(0));

        assert!(cache.get("never-listed/").await.unwrap().is_empty());
        assert_eq!(store.list_calls(), 1);
        assert!(cache.expires_at("never-listed/").unwrap() > 0);
    }

    #[tokio::test]
    async fn test_bust_during_inflight_list_is_not_overwritten() {
        let store = Arc::new(HeldListStore::default());
        store
            .inner
            .put("p/1", Bytes::from_static(b"x"), "t", Acl::Private)
            .await
            .unwrap();
        let cache = Arc::new(ListingCache::new(store.clone(), &test_config()));

        store.hold.store(true, Ordering::SeqCst);
        let pending = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get("p/").await }
        });
        store.entered.notified().await;

        // An upload lands and busts while the older listing is still in flight.
        store
            .inner
            .put("p/2", Bytes::from_static(b"x"), "t", Acl::Private)
            .await
            .unwrap();
        cache.bust("p/");
        store.hold.store(false, Ordering::SeqCst);
        store.release.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), vec!["p/1"]);
        assert_eq!(cache.expires_at("p/"), Some(0));

        assert_eq!(cache.get("p/").await.unwrap(), vec!["p/1", "p/2"]);
        assert_eq!(store.inner.list_calls(), 2);

        // The post-bust listing is committed normally.
        assert_eq!(cache.get("p/").await.unwrap(), vec!["p/1", "p/2"]);
        assert_eq!(store.inner.list_calls(), 2);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let config = CacheConfig {
            ttl_secs: u64::MAX,
            ..test_config()
        };
        let cache = ListingCache::new(Arc::new(InMemoryObjectStore::default()), &config);
        assert_eq!(cache.expiry_from(1_700_000_000), i64::MAX);
        assert_eq!(cache.expiry_from(i64::MAX - 1), i64::MAX);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_calls_store() {
        let store = seeded_store(&["a/1"]).await;
        let config = CacheConfig {
            enabled: false,
            ..test_config()
        };
        let cache = ListingCache::new(store.clone(), &config);

        cache.get("").await.unwrap();
        cache.get("").await.unwrap();
        assert_eq!(store.list_calls(), 2);
        assert_eq!(cache.expires_at(""), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_serves_from_cache() {
        let store = seeded_store(&["a/1"]).await;
        let config = CacheConfig {
            ttl_secs: 0,
            ..test_config()
        };
        let cache = ListingCache::new(store.clone(), &config);

        cache.get("").await.unwrap();
        cache.get("").await.unwrap();
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_store_error_is_surfaced_and_not_cached() {
        let store = seeded_store(&["a/1"]).await;
        let cache = ListingCache::new(store.clone(), &test_config());

        store.set_fail_lists(true);
        assert!(matches!(
            cache.get("").await,
            Err(StorageError::ListFailed { .. })
        ));
        assert_eq!(cache.expires_at(""), None);

        store.set_fail_lists(false);
        assert_eq!(cache.get("").await.unwrap(), vec!["a/1"]);
    }

    #[tokio::test]
    async fn test_returned_listing_is_a_copy() {
        let store = seeded_store(&["a/1"]).await;
        let cache = ListingCache::new(store.clone(), &test_config());

        let mut mine = cache.get("").await.unwrap();
        mine.push("tampered".to_string());
        assert_eq!(cache.get("").await.unwrap(), vec!["a/1"]);
    }
}
