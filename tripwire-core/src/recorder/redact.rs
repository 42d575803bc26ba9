//! Redaction of sensitive substrings before anything reaches disk.
//!
//! Replacement order is fixed: emails, then API-key shapes, then long hex
//! runs, then `.ssh` paths. Key redaction must run before hex redaction so a
//! key with a long hex tail collapses to a single `[REDACTED_KEY]` marker.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("invalid email pattern")
});

static API_KEY_LIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:sk-[a-z0-9]{10,}|api[_-]?key[:=]\s*[a-z0-9_-]{10,})")
        .expect("invalid api key pattern")
});

static LONG_HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[a-f0-9]{16,}\b").expect("invalid hex pattern"));

static SSH_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/?[A-Za-z0-9_\-/.]*\.ssh/[A-Za-z0-9_.\-]+").expect("invalid ssh path pattern")
});

/// Replace emails, API-key-shaped strings, long hex runs, and `.ssh` paths
/// with fixed markers.
pub fn redact_sensitive(input: &str) -> String {
    let out = EMAIL_RE.replace_all(input, "[REDACTED_EMAIL]");
    let out = API_KEY_LIKE_RE.replace_all(&out, "[REDACTED_KEY]");
    let out = LONG_HEX_RE.replace_all(&out, "[REDACTED_HEX]");
    let out = SSH_PATH_RE.replace_all(&out, "[REDACTED_SSH_PATH]");
    match out {
        Cow::Borrowed(_) => input.to_string(),
        Cow::Owned(s) => s,
    }
}

/// Recursively redact every string leaf of a JSON value in place. Object
/// keys, numbers, and booleans pass through untouched.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::String(s) => *s = redact_sensitive(s),
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        Value::Object(map) => map.values_mut().for_each(redact_value),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_email() {
        assert_eq!(
            redact_sensitive("contact Alice.B+x@Example.ORG today"),
            "contact [REDACTED_EMAIL] today"
        );
    }

    #[test]
    fn test_redacts_api_keys() {
        assert_eq!(
            redact_sensitive("use sk-abc123def456ghi please"),
            "use [REDACTED_KEY] please"
        );
        assert_eq!(
            redact_sensitive("api_key: super-secret-value-1"),
            "[REDACTED_KEY]"
        );
    }

    #[test]
    fn test_redacts_long_hex() {
        assert_eq!(
            redact_sensitive("token deadbeefdeadbeefdeadbeef end"),
            "token [REDACTED_HEX] end"
        );
        // 15 hex chars stay as-is.
        assert_eq!(
            redact_sensitive("deadbeefdeadbee"),
            "deadbeefdeadbee"
        );
    }

    #[test]
    fn test_redacts_ssh_paths() {
        assert_eq!(
            redact_sensitive("cat /home/user/.ssh/id_rsa"),
            "cat [REDACTED_SSH_PATH]"
        );
    }

    #[test]
    fn test_plain_text_unchanged() {
        let text = "nothing secret in here";
        assert_eq!(redact_sensitive(text), text);
    }

    #[test]
    fn test_redact_value_walks_nested_structures() {
        let mut value = json!({
            "text": "mail bob@example.com",
            "nested": { "items": ["sk-aaaaaaaaaaaa", 42, true] },
        });
        redact_value(&mut value);
        assert_eq!(value["text"], "mail [REDACTED_EMAIL]");
        assert_eq!(value["nested"]["items"][0], "[REDACTED_KEY]");
        assert_eq!(value["nested"]["items"][1], 42);
    }
}
