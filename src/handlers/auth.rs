//! Authentication handlers for WebSocket connections

use crate::auth::token::{extract_bearer_token, AuthGrant, TokenVerifier};
use crate::error::{KeyclashError, Result};

/// Extract a race token from WebSocket subprotocol header
/// Format: "bearer.{jwt_token}" or "token.{jwt_token}"
pub fn extract_token_from_subprotocol(headers: &warp::hyper::HeaderMap) -> Option<String> {
    if let Some(protocol_header) = headers.get("sec-websocket-protocol") {
        if let Ok(protocol_str) = protocol_header.to_str() {
            for protocol in protocol_str.split(',') {
                let protocol = protocol.trim();
                if let Some(token) = protocol.strip_prefix("bearer.") {
                    return Some(token.to_string());
                }
                if let Some(token) = protocol.strip_prefix("token.") {
                    return Some(token.to_string());
                }
            }
        }
    }
    None
}

/// Token extraction from headers only. Tokens are never read from the
/// URL so they cannot leak through logs or referrer headers.
pub fn extract_token_comprehensive(headers: &warp::hyper::HeaderMap) -> Option<String> {
    // Priority 1: Authorization header
    if let Some(auth_header) = headers.get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = extract_bearer_token(auth_str) {
                log::debug!("Token extracted from Authorization header");
                return Some(token);
            }
        }
    }

    // Priority 2: WebSocket subprotocol
    if let Some(token) = extract_token_from_subprotocol(headers) {
        log::debug!("Token extracted from WebSocket subprotocol");
        return Some(token);
    }

    // Priority 3: Custom header
    if let Some(custom_header) = headers.get("x-auth-token") {
        if let Ok(token_str) = custom_header.to_str() {
            log::debug!("Token extracted from X-Auth-Token header");
            return Some(token_str.to_string());
        }
    }

    log::debug!("No token found in any secure headers");
    None
}

/// Resolve the identity for a new connection. A missing token yields a
/// guest grant; a present but bad token is rejected with a reason that
/// never reveals which check failed.
pub fn authenticate_connection(
    token: Option<String>,
    verifier: &TokenVerifier,
) -> Result<AuthGrant> {
    if let Some(token_str) = &token {
        if token_str.len() > 1000 {
            return Err(KeyclashError::AuthRejected("invalid token".to_string()));
        }
        if token_str.chars().any(|c| c.is_control()) {
            return Err(KeyclashError::AuthRejected("invalid token".to_string()));
        }
    }
    verifier.verify(token.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::hyper::header::{HeaderMap, HeaderValue};

    #[test]
    fn authorization_header_wins_over_subprotocol() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer aaa.bbb.ccc"));
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("bearer.xxx.yyy.zzz"),
        );
        assert_eq!(
            extract_token_comprehensive(&headers),
            Some("aaa.bbb.ccc".to_string())
        );
    }

    #[test]
    fn subprotocol_accepts_both_prefixes() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("chat, token.aaa.bbb.ccc"),
        );
        assert_eq!(
            extract_token_from_subprotocol(&headers),
            Some("aaa.bbb.ccc".to_string())
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("bearer.ddd.eee.fff"),
        );
        assert_eq!(
            extract_token_from_subprotocol(&headers),
            Some("ddd.eee.fff".to_string())
        );
    }

    #[test]
    fn custom_header_is_last_resort() {
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-token", HeaderValue::from_static("aaa.bbb.ccc"));
        assert_eq!(
            extract_token_comprehensive(&headers),
            Some("aaa.bbb.ccc".to_string())
        );
    }

    #[test]
    fn no_headers_means_no_token() {
        let headers = HeaderMap::new();
        assert_eq!(extract_token_comprehensive(&headers), None);
    }

    #[test]
    fn oversized_token_rejected_before_verification() {
        let verifier = TokenVerifier::without_secret();
        let result = authenticate_connection(Some("a".repeat(1001)), &verifier);
        assert!(result.is_err());
    }

    #[test]
    fn control_characters_rejected_before_verification() {
        let verifier = TokenVerifier::without_secret();
        let result = authenticate_connection(Some("abc\u{0000}def".to_string()), &verifier);
        assert!(result.is_err());
    }

    #[test]
    fn missing_token_grants_guest_access() {
        let verifier = TokenVerifier::without_secret();
        let grant = authenticate_connection(None, &verifier).unwrap();
        assert!(!grant.verified);
    }
}
