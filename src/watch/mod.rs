pub mod clipboard;
pub mod detector;

pub use clipboard::{ClipboardSink, LogClipboard};
pub use detector::StabilityDetector;
