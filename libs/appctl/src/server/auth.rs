//! Bearer-token helpers
//!
//! The host agent and worker authenticate to each other with a pre-shared
//! key read from a file; the control API extracts identity tokens from the
//! same header shape.

use std::path::Path;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use tracing::warn;

/// Read a pre-shared key from disk, trimmed. Missing files log a warning and
/// yield an empty key so callers fail closed on comparison.
pub fn read_psk(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.trim().to_string(),
        Err(_) => {
            warn!("couldn't read PSK from path={}", path.display());
            String::new()
        }
    }
}

/// Extract the bearer token from an Authorization header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer")?;
    Some(token.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer  abc123 "));
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_missing_or_malformed_header() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_psk_read_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("psk");
        std::fs::write(&path, "  sekrit\n").unwrap();
        assert_eq!(read_psk(&path), "sekrit");
        assert_eq!(read_psk(&dir.path().join("missing")), "");
    }
}
