use std::sync::LazyLock;

use regex::Regex;

const MAX_SEGMENT_CHARS: usize = 200;

static INVALID_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9/._-]").unwrap());
static REPEATED_UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());

/// Builds the destination key `category/<sanitized relative path>`.
pub fn normalize_s3_key(category: &str, relative_path: &str) -> String {
    format!("{category}/{}", sanitize_key(relative_path))
}

/// Restricts a path to characters accepted by every S3-compatible backend.
///
/// Applying it to its own output returns the same string.
pub fn sanitize_key(path: &str) -> String {
    let replaced = INVALID_KEY_CHARS.replace_all(path, "_");
    let collapsed = REPEATED_UNDERSCORES.replace_all(&replaced, "_");

    collapsed
        .split('/')
        .map(sanitize_segment)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn sanitize_segment(segment: &str) -> String {
    let truncated: String = trim_segment(segment)
        .chars()
        .take(MAX_SEGMENT_CHARS)
        .collect();
    trim_segment(&truncated).to_string()
}

fn trim_segment(segment: &str) -> &str {
    segment.trim_matches(|c| c == '_' || c == '.')
}
