pub mod cache;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use std::time::Duration;

use bytes::Bytes;

use crate::core::error::StorageError;
use crate::core::types::Acl;

/// Content type used when neither the caller nor sniffing supplied one.
pub const FALLBACK_CONTENT_TYPE: &str = "binary/octet-stream";

/// Longest lifetime S3 accepts for a presigned URL (SigV4, 7 days).
pub const MAX_PRESIGN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// ObjectStore trait
// ---------------------------------------------------------------------------

/// Abstraction over the bucket that uploads land in.
///
/// The production implementation (`S3ObjectStore`) wraps `aws-sdk-s3`.
/// Tests and `backend = "memory"` use `InMemoryObjectStore`.
pub trait ObjectStore: Send + Sync {
    /// Write an object and return its public URL.
    fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        acl: Acl,
    ) -> impl std::future::Future<Output = Result<String, StorageError>> + Send;

    /// List object keys under a prefix. An empty prefix lists the whole bucket.
    fn list(
        &self,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, StorageError>> + Send;

    /// Public URL for a key, without contacting the store.
    fn url_for(&self, key: &str) -> String;

    /// Time-limited signed GET URL for a key.
    fn presigned_url(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<String, StorageError>> + Send;
}

// ---------------------------------------------------------------------------
// Listing presentation
// ---------------------------------------------------------------------------

/// How listed keys are handed back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingView {
    Keys,
    PublicUrls,
    Presigned(Duration),
}

impl ListingView {
    /// `sign` only has an effect together with `urls`.
    pub fn from_flags(urls: bool, sign: bool, ttl: Duration) -> Self {
        match (urls, sign) {
            (false, _) => ListingView::Keys,
            (true, false) => ListingView::PublicUrls,
            (true, true) => ListingView::Presigned(ttl),
        }
    }
}

/// Turn a key listing into the requested view.
pub async fn present_listing<S: ObjectStore>(
    store: &S,
    keys: Vec<String>,
    view: ListingView,
) -> Result<Vec<String>, StorageError> {
    match view {
        ListingView::Keys => Ok(keys),
        ListingView::PublicUrls => Ok(keys.iter().map(|k| store.url_for(k)).collect()),
        ListingView::Presigned(ttl) => {
            let mut urls = Vec::with_capacity(keys.len());
            for key in &keys {
                urls.push(store.presigned_url(key, ttl).await?);
            }
            Ok(urls)
        }
    }
}

/// Presign lifetime for `ttl_secs`, or `None` when S3 would refuse it.
pub fn presign_ttl(ttl_secs: u64) -> Option<Duration> {
    (1..=MAX_PRESIGN_TTL_SECS)
        .contains(&ttl_secs)
        .then(|| Duration::from_secs(ttl_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryObjectStore;

    async fn store_with(keys: &[&str]) -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new("pics", "us-east-1");
        for key in keys {
            store
                .put(key, Bytes::from_static(b"x"), "t", Acl::Private)
                .await
                .unwrap();
        }
        store
    }

    #[test]
    fn test_view_from_flags() {
        let ttl = Duration::from_secs(60);
        assert_eq!(ListingView::from_flags(false, false, ttl), ListingView::Keys);
        assert_eq!(ListingView::from_flags(false, true, ttl), ListingView::Keys);
        assert_eq!(ListingView::from_flags(true, false, ttl), ListingView::PublicUrls);
        assert_eq!(
            ListingView::from_flags(true, true, ttl),
            ListingView::Presigned(ttl)
        );
    }

    #[tokio::test]
    async fn test_present_listing_views() {
        let store = store_with(&["a/1", "a/2"]).await;
        let keys = store.list("a/").await.unwrap();

        let plain = present_listing(&store, keys.clone(), ListingView::Keys).await.unwrap();
        assert_eq!(plain, vec!["a/1", "a/2"]);

        let public = present_listing(&store, keys.clone(), ListingView::PublicUrls)
            .await
            .unwrap();
        assert_eq!(public[0], "https://s3.amazonaws.com/pics/a/1");

        let signed = present_listing(
            &store,
            keys,
            ListingView::Presigned(Duration::from_secs(90)),
        )
        .await
        .unwrap();
        assert_eq!(signed.len(), 2);
        assert!(signed[1].starts_with("https://s3.amazonaws.com/pics/a/2?"));
        assert!(signed[1].contains("X-Amz-Expires=90"));
    }

    #[test]
    fn test_presign_ttl_bounds() {
        assert_eq!(presign_ttl(0), None);
        assert_eq!(presign_ttl(1), Some(Duration::from_secs(1)));
        assert!(presign_ttl(MAX_PRESIGN_TTL_SECS).is_some());
        assert_eq!(presign_ttl(MAX_PRESIGN_TTL_SECS + 1), None);
    }
}
