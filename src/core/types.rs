use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::error::ConfigError;

// ---------------------------------------------------------------------------
// Canned ACLs
// ---------------------------------------------------------------------------

/// Access-control level applied to a newly stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Acl {
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl Acl {
    pub const ALL: [Acl; 6] = [
        Acl::Private,
        Acl::PublicRead,
        Acl::PublicReadWrite,
        Acl::AuthenticatedRead,
        Acl::BucketOwnerRead,
        Acl::BucketOwnerFullControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
            Acl::PublicReadWrite => "public-read-write",
            Acl::AuthenticatedRead => "authenticated-read",
            Acl::BucketOwnerRead => "bucket-owner-read",
            Acl::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Acl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Acl::ALL
            .iter()
            .copied()
            .find(|acl| acl.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidAcl {
                acl: s.to_string(),
                allowed: Acl::ALL
                    .iter()
                    .map(Acl::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Validation helper for user-supplied ACL strings.
pub fn is_valid_acl(s: &str) -> bool {
    s.parse::<Acl>().is_ok()
}

// ---------------------------------------------------------------------------
// Upload sources
// ---------------------------------------------------------------------------

/// Where the bytes of an upload come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// A file on the local filesystem.
    LocalPath(PathBuf),
    /// A remote URL fetched with an HTTP GET.
    RemoteUrl(String),
    /// A body already held in memory (HTTP multipart part).
    InMemoryBody {
        data: Bytes,
        filename: String,
        /// Externally supplied content type; skips sniffing when present.
        content_type: Option<String>,
    },
}

impl UploadSource {
    /// Resolve a user-supplied string: an existing filesystem path wins,
    /// anything else is treated as a URL.
    pub fn from_path_or_url(input: &str) -> Self {
        let path = Path::new(input);
        if path.exists() {
            UploadSource::LocalPath(path.to_path_buf())
        } else {
            UploadSource::RemoteUrl(input.to_string())
        }
    }

    /// Label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadSource::LocalPath(_) => "local",
            UploadSource::RemoteUrl(_) => "remote",
            UploadSource::InMemoryBody { .. } => "body",
        }
    }

    /// Base name of the source, used as the `%F` input when naming the key.
    pub fn base_name(&self) -> String {
        match self {
            UploadSource::LocalPath(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| p.to_string_lossy().to_string()),
            UploadSource::RemoteUrl(url) => url_base_name(url),
            UploadSource::InMemoryBody { filename, .. } => {
                let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
                name.to_string()
            }
        }
    }
}

impl fmt::Display for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::LocalPath(p) => write!(f, "{}", p.display()),
            UploadSource::RemoteUrl(url) => write!(f, "{}", url),
            UploadSource::InMemoryBody { filename, data, .. } => {
                write!(f, "{} ({} bytes)", filename, data.len())
            }
        }
    }
}

/// Last non-empty path segment of a URL, ignoring query and fragment.
fn url_base_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let without_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    // The first segment is the host; only use it when there is no path.
    without_scheme
        .split('/')
        .skip(1)
        .filter(|s| !s.is_empty())
        .last()
        .or_else(|| without_scheme.split('/').next())
        .unwrap_or("download")
        .to_string()
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acl_parse_valid_set() {
        for acl in Acl::ALL {
            assert_eq!(acl.as_str().parse::<Acl>().unwrap(), acl);
        }
        assert!(is_valid_acl("bucket-owner-full-control"));
    }

    #[test]
    fn test_acl_parse_rejects_unknown() {
        let err = "world-writable".parse::<Acl>().unwrap_err();
        assert!(err.to_string().contains("world-writable"));
        assert!(err.to_string().contains("public-read"));
        assert!(!is_valid_acl("Public-Read"));
    }

    #[test]
    fn test_url_base_name() {
        assert_eq!(
            url_base_name("https://example.com/img/cat.jpg?size=large"),
            "cat.jpg"
        );
        assert_eq!(url_base_name("http://example.com/a/b/"), "b");
        assert_eq!(url_base_name("http://example.com"), "example.com");
    }

    #[test]
    fn test_from_path_or_url() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("local.txt");
        std::fs::write(&file, b"hi").unwrap();

        let local = UploadSource::from_path_or_url(file.to_str().unwrap());
        assert!(matches!(local, UploadSource::LocalPath(_)));
        assert_eq!(local.base_name(), "local.txt");

        let remote = UploadSource::from_path_or_url("http://example.com/remote.png");
        assert!(matches!(remote, UploadSource::RemoteUrl(_)));
        assert_eq!(remote.base_name(), "remote.png");
    }

    #[test]
    fn test_body_base_name_strips_client_path() {
        let src = UploadSource::InMemoryBody {
            data: Bytes::from_static(b"x"),
            filename: "C:\\Users\\me\\photo.png".to_string(),
            content_type: None,
        };
        assert_eq!(src.base_name(), "photo.png");
    }
}
