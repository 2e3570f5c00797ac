use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::core::config::public_url;
use crate::core::error::StorageError;
use crate::core::types::Acl;

use super::{effective_content_type, presign_ttl, ObjectStore, MAX_PRESIGN_TTL_SECS};

// ---------------------------------------------------------------------------
// InMemoryObjectStore
// ---------------------------------------------------------------------------

/// In-memory bucket for tests and local runs without AWS credentials.
///
/// Objects live in a `BTreeMap` behind a `RwLock`, so listings come back in
/// key order like S3's. Call counters let tests assert how often the backing
/// store was hit.
pub struct InMemoryObjectStore {
    bucket: String,
    region: String,
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    put_calls: AtomicUsize,
    list_calls: AtomicUsize,
    fail_puts: AtomicBool,
    fail_lists: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    pub acl: Acl,
    pub created_at: chrono::DateTime<Utc>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: &str, region: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            region: region.to_string(),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            put_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            fail_lists: AtomicBool::new(false),
        }
    }

    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Make subsequent puts fail, to exercise error paths.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent lists fail, to exercise error paths.
    pub fn set_fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new("memory", crate::core::config::DEFAULT_REGION)
    }
}

impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        acl: Acl,
    ) -> Result<String, StorageError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::PutFailed {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let mut objects = self.objects.write().await;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: effective_content_type(content_type).to_string(),
                acl,
                created_at: Utc::now(),
            },
        );
        Ok(self.url_for(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(StorageError::ListFailed {
                prefix: prefix.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn url_for(&self, key: &str) -> String {
        public_url(&self.bucket, &self.region, key)
    }

    /// Deterministic stand-in shaped like a SigV4 query string. Nothing
    /// verifies the signature.
    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        if presign_ttl(ttl.as_secs()).is_none() {
            return Err(StorageError::SignFailed {
                key: key.to_string(),
                reason: format!(
                    "ttl must be between 1 and {} seconds, got {}",
                    MAX_PRESIGN_TTL_SECS,
                    ttl.as_secs()
                ),
            });
        }
        Ok(format!(
            "{}?X-Amz-Expires={}&X-Amz-Signature=memory",
            self.url_for(key),
            ttl.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryObjectStore::new("pics", "us-east-1");
        let url = store
            .put("a/cat.png", Bytes::from_static(b"png"), "image/png", Acl::PublicRead)
            .await
            .unwrap();

        assert_eq!(url, "https://s3.amazonaws.com/pics/a/cat.png");
        let obj = store.get("a/cat.png").await.unwrap();
        assert_eq!(obj.data, Bytes::from_static(b"png"));
        assert_eq!(obj.content_type, "image/png");
        assert_eq!(obj.acl, Acl::PublicRead);
        assert_eq!(store.put_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_content_type_falls_back() {
        let store = InMemoryObjectStore::default();
        store
            .put("k", Bytes::from_static(b"x"), "", Acl::Private)
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().content_type, "binary/octet-stream");
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix_in_key_order() {
        let store = InMemoryObjectStore::default();
        for key in ["b/2", "a/1", "b/1", "c"] {
            store
                .put(key, Bytes::from_static(b"x"), "t", Acl::Private)
                .await
                .unwrap();
        }

        assert_eq!(store.list("b/").await.unwrap(), vec!["b/1", "b/2"]);
        assert_eq!(store.list("").await.unwrap().len(), 4);
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_presigned_url_is_deterministic() {
        let store = InMemoryObjectStore::new("pics", "eu-west-1");
        let url = store
            .presigned_url("a/cat.png", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://s3-eu-west-1.amazonaws.com/pics/a/cat.png?X-Amz-Expires=300&X-Amz-Signature=memory"
        );

        let err = store
            .presigned_url("a/cat.png", Duration::from_secs(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SignFailed { ref key, .. } if key == "a/cat.png"));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemoryObjectStore::default();
        store.set_fail_puts(true);
        store.set_fail_lists(true);

        assert!(matches!(
            store.put("k", Bytes::new(), "t", Acl::Private).await,
            Err(StorageError::PutFailed { .. })
        ));
        assert!(matches!(
            store.list("").await,
            Err(StorageError::ListFailed { .. })
        ));
        assert_eq!(store.object_count().await, 0);
    }
}
