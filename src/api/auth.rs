//! API key check for everything under `/api/v1`.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::ApiState;
use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    match provided_key(request.headers()) {
        Some(key) if keys_match(key, &state.api_key) => next.run(request).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}

/// `X-API-Key` wins; `Authorization: Bearer <key>` is the fallback.
fn provided_key(headers: &HeaderMap) -> Option<&str> {
    let header_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty());
    if header_key.is_some() {
        return header_key;
    }

    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|k| !k.is_empty())
}

/// Compare keys in constant time by checking MACs of both under the
/// expected key, so neither content nor length leaks through timing.
pub fn keys_match(provided: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let tag = |input: &str| -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(expected.as_bytes()).ok()?;
        mac.update(input.as_bytes());
        Some(mac)
    };

    match (tag(provided), tag(expected)) {
        (Some(provided), Some(expected)) => provided
            .verify_slice(&expected.finalize().into_bytes())
            .is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn matching_keys() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secret2", "secret"));
        assert!(!keys_match("", "secret"));
        assert!(!keys_match("", ""));
    }

    #[test]
    fn header_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-bearer"));
        assert_eq!(provided_key(&headers), Some("from-bearer"));

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(provided_key(&headers), Some("from-header"));
    }

    #[test]
    fn malformed_authorization_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(provided_key(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(provided_key(&headers), None);
    }
}
