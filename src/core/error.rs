use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating configuration.
///
/// All of these are fatal: the process refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid ACL '{acl}': expected one of {allowed}")]
    InvalidAcl { acl: String, allowed: String },

    #[error("no free TCP port at or above {start}")]
    PortExhausted { start: u32 },
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors originating from the object store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store PUT failed for key {key}: {reason}")]
    PutFailed { key: String, reason: String },

    #[error("store LIST failed for prefix '{prefix}': {reason}")]
    ListFailed { prefix: String, reason: String },

    #[error("presigning failed for key '{key}': {reason}")]
    SignFailed { key: String, reason: String },
}

// ---------------------------------------------------------------------------
// Upload errors
// ---------------------------------------------------------------------------

/// Errors produced by the upload orchestrator.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("remote fetch failed with status {status} for {url}")]
    RemoteFetch { status: u16, url: String },

    #[error("remote fetch failed for {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("upload too big. {size_bytes} > {max_bytes}")]
    PayloadTooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("source not found: {source_name}")]
    SourceNotFound { source_name: String },

    #[error("invalid upload request: {reason}")]
    InvalidRequest { reason: String },

    #[error(transparent)]
    StoreWrite(#[from] StorageError),

    #[error("upload I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Map an UploadError to its HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            UploadError::PayloadTooLarge { .. } => 413,
            UploadError::SourceNotFound { .. } => 404,
            UploadError::InvalidRequest { .. } => 400,
            UploadError::RemoteFetch { .. }
            | UploadError::Transport { .. }
            | UploadError::StoreWrite(_) => 502,
            UploadError::Io(_) => 500,
        }
    }

    /// Return the error code string for JSON responses and metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            UploadError::RemoteFetch { .. } => "remote_fetch_failed",
            UploadError::Transport { .. } => "remote_transport_failed",
            UploadError::PayloadTooLarge { .. } => "payload_too_large",
            UploadError::SourceNotFound { .. } => "source_not_found",
            UploadError::InvalidRequest { .. } => "invalid_request",
            UploadError::StoreWrite(_) => "store_write_failed",
            UploadError::Io(_) => "io_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Watch errors
// ---------------------------------------------------------------------------

/// Errors that prevent the folder watcher from starting or keep it from running.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("no folder watch path defined in config or command line")]
    MissingPath,

    #[error("watch path does not exist: {path}")]
    PathNotFound { path: String },

    #[error("watch path is not a directory: {path}")]
    NotADirectory { path: String },

    #[error("filesystem watcher failed: {reason}")]
    Notify { reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::Notify {
            reason: e.to_string(),
        }
    }
}

/// Clipboard write failure. Never fatal; the watcher logs it and moves on.
#[derive(Debug, Error)]
#[error("clipboard unavailable: {reason}")]
pub struct ClipboardError {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_status_codes() {
        let too_big = UploadError::PayloadTooLarge {
            size_bytes: 11,
            max_bytes: 10,
        };
        assert_eq!(too_big.status_code(), 413);
        assert_eq!(too_big.error_code(), "payload_too_large");

        let fetch = UploadError::RemoteFetch {
            status: 404,
            url: "http://example.com/x.png".to_string(),
        };
        assert_eq!(fetch.status_code(), 502);
        assert!(fetch.to_string().contains("404"));
        assert!(fetch.to_string().contains("http://example.com/x.png"));

        let store = UploadError::from(StorageError::PutFailed {
            key: "k".to_string(),
            reason: "denied".to_string(),
        });
        assert_eq!(store.status_code(), 502);
        assert_eq!(store.error_code(), "store_write_failed");
    }

    #[test]
    fn test_payload_too_large_message_carries_sizes() {
        let err = UploadError::PayloadTooLarge {
            size_bytes: 4_000_001,
            max_bytes: 4_000_000,
        };
        assert_eq!(err.to_string(), "upload too big. 4000001 > 4000000");
    }
}
