// ---------------------------------------------------------------------------
// Content-type sniffing from magic bytes
// ---------------------------------------------------------------------------

/// Number of leading bytes inspected.
pub const SNIFF_LEN: usize = 512;

/// Returned when nothing matches and the data doesn't look like text.
pub const UNKNOWN_CONTENT_TYPE: &str = "application/octet-stream";

/// Exact-prefix signatures, checked in order.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"Rar!\x1a\x07", "application/x-rar-compressed"),
    (b"\x1a\x45\xdf\xa3", "video/webm"),
    (b"OggS\x00", "application/ogg"),
    (b"ID3", "audio/mpeg"),
    (b"fLaC", "audio/flac"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"wOFF", "font/woff"),
    (b"wOF2", "font/woff2"),
];

/// Detect a content type from the first bytes of `data`.
///
/// Order: binary signatures, RIFF/ISO-BMFF containers, markup, then a
/// text-vs-binary decision over the inspected prefix.
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    let head = &data[..data.len().min(SNIFF_LEN)];

    for &(magic, content_type) in SIGNATURES {
        if head.starts_with(magic) {
            return content_type;
        }
    }

    if head.len() >= 12 && &head[0..4] == b"RIFF" {
        match &head[8..12] {
            b"WEBP" => return "image/webp",
            b"WAVE" => return "audio/wave",
            b"AVI " => return "video/avi",
            _ => {}
        }
    }

    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return match &head[8..12] {
            b"qt  " => "video/quicktime",
            b"M4A " => "audio/mp4",
            b"avif" => "image/avif",
            b"heic" | b"heix" => "image/heic",
            _ => "video/mp4",
        };
    }

    // MPEG audio frame sync without an ID3 tag.
    if head.len() >= 2 && head[0] == 0xff && (head[1] & 0xe0) == 0xe0 {
        return "audio/mpeg";
    }

    let text = strip_bom_and_whitespace(head);
    if let Some(markup) = sniff_markup(text) {
        return markup;
    }

    if looks_like_text(head) {
        if text.first() == Some(&b'{') || text.first() == Some(&b'[') {
            return "application/json";
        }
        return "text/plain; charset=utf-8";
    }

    UNKNOWN_CONTENT_TYPE
}

fn strip_bom_and_whitespace(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(b"\xef\xbb\xbf").unwrap_or(data);
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    &data[start..]
}

fn sniff_markup(text: &[u8]) -> Option<&'static str> {
    const HTML_TAGS: &[&[u8]] = &[
        b"<!doctype html",
        b"<html",
        b"<head",
        b"<body",
        b"<script",
        b"<iframe",
        b"<div",
        b"<p",
        b"<!--",
    ];

    let lower: Vec<u8> = text.iter().take(16).map(u8::to_ascii_lowercase).collect();
    if lower.starts_with(b"<?xml") {
        let rest = String::from_utf8_lossy(text);
        if rest.contains("<svg") {
            return Some("image/svg+xml");
        }
        return Some("text/xml; charset=utf-8");
    }
    if lower.starts_with(b"<svg") {
        return Some("image/svg+xml");
    }
    for tag in HTML_TAGS {
        if lower.starts_with(tag) {
            // The tag must end at a space or '>' to count.
            match lower.get(tag.len()) {
                Some(b' ') | Some(b'>') | None => return Some("text/html; charset=utf-8"),
                _ if *tag == b"<!--" => return Some("text/html; charset=utf-8"),
                _ => {}
            }
        }
    }
    None
}

/// Valid UTF-8 with no control bytes other than common whitespace.
/// A multi-byte sequence cut off at the end of the window still counts.
fn looks_like_text(data: &[u8]) -> bool {
    let valid = match std::str::from_utf8(data) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && e.valid_up_to() + 4 > data.len(),
    };
    valid
        && data
            .iter()
            .all(|&b| b >= 0x20 || matches!(b, b'\n' | b'\r' | b'\t' | 0x0c | 0x1b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_images() {
        assert_eq!(sniff_content_type(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), "image/png");
        assert_eq!(sniff_content_type(b"\xff\xd8\xff\xe0\0\x10JFIF"), "image/jpeg");
        assert_eq!(sniff_content_type(b"GIF89a\x01\0\x01\0"), "image/gif");
        assert_eq!(sniff_content_type(b"RIFF\x24\0\0\0WEBPVP8 "), "image/webp");
    }

    #[test]
    fn test_containers() {
        assert_eq!(
            sniff_content_type(b"\0\0\0\x18ftypmp42\0\0\0\0"),
            "video/mp4"
        );
        assert_eq!(sniff_content_type(b"RIFF\x24\0\0\0WAVEfmt "), "audio/wave");
        assert_eq!(sniff_content_type(b"%PDF-1.7\n"), "application/pdf");
        assert_eq!(sniff_content_type(b"PK\x03\x04\x14\0"), "application/zip");
        assert_eq!(sniff_content_type(b"\x1f\x8b\x08\0"), "application/x-gzip");
    }

    #[test]
    fn test_text_and_markup() {
        assert_eq!(
            sniff_content_type(b"  <!DOCTYPE html><html></html>"),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            sniff_content_type(b"<?xml version=\"1.0\"?><svg></svg>"),
            "image/svg+xml"
        );
        assert_eq!(
            sniff_content_type(b"{\"a\": 1}"),
            "application/json"
        );
        assert_eq!(
            sniff_content_type("hello wörld\n".as_bytes()),
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            sniff_content_type(b"<pre>x</pre>"),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_binary_fallback() {
        assert_eq!(sniff_content_type(&[0u8, 1, 2, 3, 4, 5]), UNKNOWN_CONTENT_TYPE);
        assert_eq!(sniff_content_type(b""), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_only_prefix_is_inspected() {
        let mut data = b"plain text".to_vec();
        data.resize(SNIFF_LEN, b'a');
        data.extend_from_slice(&[0u8; 64]);
        assert_eq!(sniff_content_type(&data), "text/plain; charset=utf-8");
    }
}
