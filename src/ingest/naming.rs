use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

/// Format applied when the configured one is empty.
pub const DEFAULT_NAME_FORMAT: &str = "uploads/%Y/%M/%D/%N_%T%E";

// ---------------------------------------------------------------------------
// Key templating
// ---------------------------------------------------------------------------

/// Values substituted for each token of a name format.
struct TokenValues<'a> {
    filename: &'a str,
    name: &'a str,
    extension: &'a str,
    timestamp: String,
    year: String,
    month: String,
    day: String,
    unique_id: String,
}

impl<'a> TokenValues<'a> {
    fn new(filename: &'a str, extension: &'a str, name: &'a str, now: DateTime<Utc>) -> Self {
        Self {
            filename,
            name,
            extension,
            timestamp: now.timestamp().to_string(),
            year: now.year().to_string(),
            month: format!("{:02}", now.month()),
            day: format!("{:02}", now.day()),
            unique_id: Uuid::new_v4().to_string(),
        }
    }

    fn lookup(&self, token: char) -> Option<&str> {
        match token {
            'F' => Some(self.filename),
            'N' => Some(self.name),
            'E' => Some(self.extension),
            'T' => Some(&self.timestamp),
            'Y' => Some(&self.year),
            'M' => Some(&self.month),
            'D' => Some(&self.day),
            'U' => Some(&self.unique_id),
            _ => None,
        }
    }
}

/// Last dot-suffix of the final path element, dot included, or "".
pub fn extension_of(filename: &str) -> &str {
    let last_element_start = filename.rfind('/').map(|i| i + 1).unwrap_or(0);
    match filename[last_element_start..].rfind('.') {
        Some(i) => &filename[last_element_start + i..],
        None => "",
    }
}

/// Render a storage key from `format`, `prefix` and the source `filename`
/// using the current UTC time.
pub fn render(format: &str, prefix: &str, filename: &str) -> String {
    render_at(format, prefix, filename, Utc::now())
}

/// Render a storage key at a fixed instant.
///
/// Tokens are substituted in a single left-to-right pass, so a substituted
/// value is never scanned for further tokens. Unknown `%x` sequences are kept
/// literally. Every `%U` in one format gets the same id.
pub fn render_at(format: &str, prefix: &str, filename: &str, now: DateTime<Utc>) -> String {
    let format = if format.is_empty() {
        DEFAULT_NAME_FORMAT
    } else {
        format
    };

    let extension = extension_of(filename);
    let name = if extension.is_empty() {
        filename.to_string()
    } else {
        filename.replacen(extension, "", 1)
    };
    let values = TokenValues::new(filename, extension, &name, now);

    let mut rendered = String::with_capacity(format.len() + filename.len());
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            if let Some(value) = chars.peek().and_then(|t| values.lookup(*t)) {
                rendered.push_str(value);
                chars.next();
                continue;
            }
        }
        rendered.push(c);
    }

    join_prefix(prefix, &rendered)
}

/// Join `prefix` and `key` with a single separator, collapsing repeats.
/// An empty prefix leaves `key` untouched.
fn join_prefix(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        return key.to_string();
    }

    let joined = format!("{}/{}", prefix, key);
    let mut out = String::with_capacity(joined.len());
    let mut last_was_sep = false;
    for c in joined.chars() {
        if c == '/' {
            if last_was_sep {
                continue;
            }
            last_was_sep = true;
        } else {
            last_was_sep = false;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}
