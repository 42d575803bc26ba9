//! Session identity derivation.
//!
//! An explicit `x-session-id` request header always wins so agent frameworks
//! can pin their own session keys. Otherwise the id is derived by hashing
//! coarse connection attributes; the wall-clock component means separate
//! requests without the header land in separate sessions, which is the safe
//! default for scoring isolation.

use http::HeaderMap;
use sha2::{Digest, Sha256};

/// Header a client sets to pin its session identity.
pub const SESSION_HEADER: &str = "x-session-id";

/// Derive the session id for a request.
///
/// Returns the `x-session-id` header value when present and valid UTF-8;
/// otherwise hashes `last4|model|client_addr|now_ms` and returns
/// `sess_<12 hex chars>`.
pub fn derive_session_id(
    headers: &HeaderMap,
    model: &str,
    api_key_last4: Option<&str>,
    client_addr: &str,
    now_ms: i64,
) -> String {
    if let Some(explicit) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return explicit.to_string();
    }

    let input = format!(
        "{}|{}|{}|{}",
        api_key_last4.unwrap_or("anon"),
        model,
        client_addr,
        now_ms
    );
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let short: String = digest[..6].iter().map(|b| format!("{b:02x}")).collect();
    format!("sess_{short}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_explicit_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("my-session"));
        let id = derive_session_id(&headers, "gpt-4o", Some("ab12"), "127.0.0.1:9999", 0);
        assert_eq!(id, "my-session");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Session-Id", HeaderValue::from_static("pinned"));
        assert_eq!(
            derive_session_id(&headers, "m", None, "addr", 0),
            "pinned"
        );
    }

    #[test]
    fn test_derived_id_is_deterministic() {
        let headers = HeaderMap::new();
        let a = derive_session_id(&headers, "gpt-4o", Some("ab12"), "10.0.0.1:1", 1234);
        let b = derive_session_id(&headers, "gpt-4o", Some("ab12"), "10.0.0.1:1", 1234);
        assert_eq!(a, b);
        assert!(a.starts_with("sess_"));
        assert_eq!(a.len(), "sess_".len() + 12);
        assert!(a["sess_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_inputs_change_the_id() {
        let headers = HeaderMap::new();
        let base = derive_session_id(&headers, "gpt-4o", None, "10.0.0.1:1", 1234);
        assert_ne!(
            base,
            derive_session_id(&headers, "gpt-4o-mini", None, "10.0.0.1:1", 1234)
        );
        assert_ne!(
            base,
            derive_session_id(&headers, "gpt-4o", None, "10.0.0.1:1", 1235)
        );
        assert_ne!(
            base,
            derive_session_id(&headers, "gpt-4o", Some("ab12"), "10.0.0.1:1", 1234)
        );
    }

    #[test]
    fn test_empty_header_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static(""));
        let id = derive_session_id(&headers, "m", None, "addr", 0);
        assert!(id.starts_with("sess_"));
    }
}
