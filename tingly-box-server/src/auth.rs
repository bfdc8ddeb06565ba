//! Caller authentication (§4.H step 1, §6): every inbound request must carry
//! a bearer key prefixed `sk-tingly-` or `tingly-box-`. This module only
//! validates the key shape — it does not look the key up against a user
//! store; Tingly Box has no concept of per-caller accounts, scopes, or
//! rate-limit tiers, unlike the virtual-API-key system this crate grew out
//! of.

use axum::http::HeaderMap;
use tingly_box_core::DispatchError;

const PREFIXES: &[&str] = &["sk-tingly-", "tingly-box-"];

/// Extract the caller's key from `Authorization: Bearer <key>` or, for the
/// Anthropic-shaped endpoint, `x-api-key: <key>`.
pub fn extract_caller_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(stripped) = s.strip_prefix("Bearer ") {
                return Some(stripped.to_string());
            }
        }
    }
    if let Some(value) = headers.get("x-api-key") {
        if let Ok(s) = value.to_str() {
            return Some(s.to_string());
        }
    }
    None
}

/// Validate the extracted key's shape. Tingly Box does not maintain a key
/// registry; any correctly-prefixed key authenticates.
pub fn validate_caller_key(headers: &HeaderMap) -> Result<String, DispatchError> {
    let key = extract_caller_key(headers)
        .ok_or_else(|| DispatchError::auth_failed("missing Authorization or x-api-key header"))?;
    if PREFIXES.iter().any(|p| key.starts_with(p)) {
        Ok(key)
    } else {
        Err(DispatchError::auth_failed(
            "caller key must be prefixed sk-tingly- or tingly-box-",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_bearer_with_sk_tingly_prefix() {
        let headers = headers_with("authorization", "Bearer sk-tingly-abc123");
        assert_eq!(validate_caller_key(&headers).unwrap(), "sk-tingly-abc123");
    }

    #[test]
    fn accepts_x_api_key_with_tingly_box_prefix() {
        let headers = headers_with("x-api-key", "tingly-box-abc123");
        assert_eq!(validate_caller_key(&headers).unwrap(), "tingly-box-abc123");
    }

    #[test]
    fn rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(validate_caller_key(&headers).is_err());
    }

    #[test]
    fn rejects_unprefixed_key() {
        let headers = headers_with("authorization", "Bearer sk-live-abc123");
        assert!(validate_caller_key(&headers).is_err());
    }
}
