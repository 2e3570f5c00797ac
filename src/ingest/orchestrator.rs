use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::StreamExt;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::core::error::UploadError;
use crate::core::types::{Acl, UploadOutcome, UploadSource};
use crate::observability::metrics as obs;
use crate::storage::cache::ListingCache;
use crate::storage::ObjectStore;

use super::naming;
use super::sniff::sniff_content_type;

// ---------------------------------------------------------------------------
// Upload orchestrator
// ---------------------------------------------------------------------------

/// Turns any `UploadSource` into a single object-store write.
///
/// Flow:
/// 1. Resolve the source to bytes (local read, remote GET into a scoped
///    temp file, or the in-memory body)
/// 2. Enforce the size ceiling for request-driven sources
/// 3. Pick the content type (supplied header wins, otherwise sniffed)
/// 4. Render the key from the name format
/// 5. `ObjectStore::put`, then bust the listing cache for the prefix
///
/// Temp files are dropped (and deleted) when the upload returns, whatever
/// the outcome.
pub struct UploadOrchestrator<S: ObjectStore> {
    store: Arc<S>,
    cache: Option<Arc<ListingCache<S>>>,
    http: reqwest::Client,
    name_format: String,
    acl: Acl,
    upload_limit: Option<u64>,
    bust_on_upload: bool,
    temp_dir: PathBuf,
}

impl<S: ObjectStore> UploadOrchestrator<S> {
    pub fn new(store: Arc<S>, cache: Option<Arc<ListingCache<S>>>, config: &AppConfig) -> Self {
        Self {
            store,
            cache,
            http: reqwest::Client::new(),
            name_format: config.aws.upload_name_format.clone(),
            acl: config.aws.acl(),
            upload_limit: config.server.upload_limit(),
            bust_on_upload: config.cache.bust_on_upload,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Directory for remote-fetch temp files.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Upload `source` under `prefix`.
    pub async fn upload(
        &self,
        source: UploadSource,
        prefix: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let start = Instant::now();
        let kind = source.kind();
        let description = source.to_string();

        let result = self.upload_inner(source, prefix).await;

        match &result {
            Ok(outcome) => {
                obs::inc_upload(kind, "ok");
                obs::record_upload_size(outcome.size_bytes as f64);
                obs::record_upload_duration(start.elapsed().as_secs_f64());
                info!(
                    source = %description,
                    key = %outcome.key,
                    url = %outcome.url,
                    size = outcome.size_bytes,
                    content_type = %outcome.content_type,
                    "upload completed"
                );
            }
            Err(e) => {
                obs::inc_upload(kind, e.error_code());
                warn!(source = %description, prefix, error = %e, "upload failed");
            }
        }

        result
    }

    async fn upload_inner(
        &self,
        source: UploadSource,
        prefix: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let filename = source.base_name();

        // `_scratch` owns any temp file until the store write has finished.
        let (data, supplied_type, _scratch) = match source {
            UploadSource::LocalPath(path) => {
                let data = read_local(&path).await?;
                (data, None, None)
            }
            UploadSource::RemoteUrl(url) => {
                let (data, scratch) = self.fetch_remote(&url).await?;
                (data, None, Some(scratch))
            }
            UploadSource::InMemoryBody {
                data, content_type, ..
            } => {
                self.check_size(data.len() as u64)?;
                (data, content_type, None)
            }
        };

        let content_type = match supplied_type.filter(|ct| !ct.trim().is_empty()) {
            Some(ct) => ct,
            None => sniff_content_type(&data).to_string(),
        };

        let key = naming::render(&self.name_format, prefix, &filename);
        let size_bytes = data.len() as u64;
        debug!(key = %key, size = size_bytes, content_type = %content_type, "writing object");

        let url = self.store.put(&key, data, &content_type, self.acl).await?;

        if self.bust_on_upload {
            if let Some(cache) = &self.cache {
                cache.bust(prefix);
            }
        }

        Ok(UploadOutcome {
            key,
            url,
            content_type,
            size_bytes,
        })
    }

    fn check_size(&self, size_bytes: u64) -> Result<(), UploadError> {
        match self.upload_limit {
            Some(max_bytes) if size_bytes > max_bytes => {
                obs::inc_upload_rejected("payload_too_large");
                Err(UploadError::PayloadTooLarge {
                    size_bytes,
                    max_bytes,
                })
            }
            _ => Ok(()),
        }
    }

    /// GET `url` into a temp file, enforcing the size ceiling while streaming.
    async fn fetch_remote(&self, url: &str) -> Result<(Bytes, NamedTempFile), UploadError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(UploadError::SourceNotFound {
                source_name: url.to_string(),
            });
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| UploadError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(UploadError::RemoteFetch {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(declared) = response.content_length() {
            self.check_size(declared)?;
        }

        let scratch = tempfile::Builder::new()
            .prefix("downloaded_")
            .tempfile_in(&self.temp_dir)?;
        let mut file = tokio::fs::File::from_std(scratch.reopen()?);

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UploadError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            received += chunk.len() as u64;
            self.check_size(received)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        debug!(url, size = received, temp = %scratch.path().display(), "remote fetch complete");

        let data = tokio::fs::read(scratch.path()).await?;
        Ok((Bytes::from(data), scratch))
    }
}

async fn read_local(path: &Path) -> Result<Bytes, UploadError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(UploadError::SourceNotFound {
            source_name: path.display().to_string(),
        }),
        Err(e) => Err(UploadError::Io(e)),
    }
}
