use tracing::info;

use crate::core::config::FolderWatchConfig;
use crate::core::error::ClipboardError;
use crate::core::types::UploadOutcome;

// ---------------------------------------------------------------------------
// Clipboard sinks
// ---------------------------------------------------------------------------

/// Destination for the "copy link after upload" post-action.
pub trait ClipboardSink: Send + Sync {
    fn write_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// Text copied after a folder-watch upload: `auto_clipboard_prefix + key`
/// when a prefix is configured, otherwise the object's public URL.
pub fn clipboard_text(config: &FolderWatchConfig, outcome: &UploadOutcome) -> String {
    if config.auto_clipboard_prefix.is_empty() {
        outcome.url.clone()
    } else {
        format!("{}{}", config.auto_clipboard_prefix, outcome.key)
    }
}

/// Logs the text instead of touching a system clipboard.
///
/// Used on headless hosts and whenever the `clipboard` feature is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogClipboard;

impl ClipboardSink for LogClipboard {
    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        info!(text, "clipboard text ready");
        Ok(())
    }
}

/// System clipboard through `arboard`.
#[cfg(feature = "clipboard")]
pub struct ArboardClipboard {
    inner: std::sync::Mutex<arboard::Clipboard>,
}

#[cfg(feature = "clipboard")]
impl ArboardClipboard {
    pub fn new() -> Result<Self, ClipboardError> {
        let clipboard = arboard::Clipboard::new().map_err(|e| ClipboardError {
            reason: e.to_string(),
        })?;
        Ok(Self {
            inner: std::sync::Mutex::new(clipboard),
        })
    }
}

#[cfg(feature = "clipboard")]
impl ClipboardSink for ArboardClipboard {
    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        let mut clipboard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        clipboard
            .set_text(text.to_string())
            .map_err(|e| ClipboardError {
                reason: e.to_string(),
            })
    }
}

/// Best clipboard available in this build: the system clipboard when the
/// `clipboard` feature is on and a display is reachable, otherwise `LogClipboard`.
pub fn default_sink() -> std::sync::Arc<dyn ClipboardSink> {
    #[cfg(feature = "clipboard")]
    {
        match ArboardClipboard::new() {
            Ok(sink) => return std::sync::Arc::new(sink),
            Err(e) => tracing::warn!(error = %e, "falling back to logging clipboard"),
        }
    }
    std::sync::Arc::new(LogClipboard)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> UploadOutcome {
        UploadOutcome {
            key: "drop/cat.png".to_string(),
            url: "https://s3-eu-west-1.amazonaws.com/pics/drop/cat.png".to_string(),
            content_type: "image/png".to_string(),
            size_bytes: 3,
        }
    }

    #[test]
    fn test_text_uses_public_url_without_prefix() {
        let config = FolderWatchConfig::default();
        assert_eq!(
            clipboard_text(&config, &outcome()),
            "https://s3-eu-west-1.amazonaws.com/pics/drop/cat.png"
        );
    }

    #[test]
    fn test_text_uses_prefix_override() {
        let config = FolderWatchConfig {
            auto_clipboard_prefix: "https://cdn.example.com/".to_string(),
            ..FolderWatchConfig::default()
        };
        assert_eq!(
            clipboard_text(&config, &outcome()),
            "https://cdn.example.com/drop/cat.png"
        );
    }

    #[test]
    fn test_log_clipboard_never_fails() {
        assert!(LogClipboard.write_text("anything").is_ok());
    }
}
