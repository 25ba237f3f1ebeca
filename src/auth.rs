//!
//! Client-side authentication for the gateway.
//!
//! Validates the configured gateway API key (accepted via `x-api-key` or
//! `Authorization: Bearer`), extracts the inbound Authorization header for
//! backend auth fallback, and derives the metrics user label from the email
//! claim of a JWT bearer token. The JWT is decoded without verification -
//! the claim only labels telemetry, it grants nothing.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::error::{ProxyError, Result};

/* --- constants ------------------------------------------------------------------------------ */

/** Bearer token prefix */
const BEARER_PREFIX: &str = "Bearer ";

/** Label used when no email claim can be extracted */
const UNKNOWN_USER: &str = "unknown";

/* --- start of code -------------------------------------------------------------------------- */

///
/// Validate the gateway API key on an incoming request.
///
/// The key is accepted through either `x-api-key: <key>` or
/// `Authorization: Bearer <key>`. When no gateway key is configured the gate
/// is open (development mode).
///
/// # Arguments
///  * `headers` - incoming request headers
///  * `expected` - the configured gateway key, if any
///
/// # Returns
///  * `Ok(())` when the request may proceed
///  * `ProxyError::Auth` on a missing or wrong key
pub fn validate_gateway_key(headers: &HeaderMap, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };

    if let Some(key) = header_str(headers, "x-api-key") {
        if key == expected {
            return Ok(());
        }
    }

    if let Some(auth) = header_str(headers, "authorization") {
        if auth.strip_prefix(BEARER_PREFIX).is_some_and(|token| token == expected) {
            return Ok(());
        }
    }

    Err(ProxyError::Auth("Missing or invalid API key".to_string()))
}

///
/// Extract the raw inbound Authorization header value.
///
/// Used as the backend auth fallback when an external backend has no
/// configured key of its own.
///
/// # Arguments
///  * `headers` - incoming request headers
///
/// # Returns
///  * The Authorization header value, if present and readable
pub fn inbound_authorization(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "authorization").map(str::to_string)
}

///
/// Derive the metrics user label from the request.
///
/// When the Authorization bearer token is a JWT with an `email` claim, the
/// label is the first 8 hex characters of the SHA-256 of that email;
/// otherwise `unknown`.
///
/// # Arguments
///  * `headers` - incoming request headers
///
/// # Returns
///  * An 8-hex-character label or `unknown`
pub fn user_label(headers: &HeaderMap) -> String {
    header_str(headers, "authorization")
        .and_then(|auth| auth.strip_prefix(BEARER_PREFIX))
        .and_then(jwt_email)
        .map(|email| hash_label(&email))
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

///
/// Pull the `email` claim out of an unverified JWT.
///
/// # Arguments
///  * `token` - candidate JWT string
///
/// # Returns
///  * The email claim when the token decodes as a JWT carrying one
fn jwt_email(token: &str) -> Option<String> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }

    let decoded = URL_SAFE_NO_PAD.decode(segments[1].as_bytes()).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("email").and_then(serde_json::Value::as_str).map(str::to_string)
}

///
/// First 8 hex characters of the SHA-256 of the input.
fn hash_label(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

///
/// Read a header as a str, ignoring non-UTF-8 values.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn make_jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn test_no_configured_key_accepts_everything() {
        let headers = HeaderMap::new();
        assert!(validate_gateway_key(&headers, None).is_ok());
    }

    #[test]
    fn test_x_api_key_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("secret"));
        assert!(validate_gateway_key(&headers, Some("secret")).is_ok());
    }

    #[test]
    fn test_bearer_token_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert!(validate_gateway_key(&headers, Some("secret")).is_ok());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("nope"));
        assert!(matches!(
            validate_gateway_key(&headers, Some("secret")),
            Err(ProxyError::Auth(_))
        ));
    }

    #[test]
    fn test_missing_key_rejected() {
        let headers = HeaderMap::new();
        assert!(matches!(
            validate_gateway_key(&headers, Some("secret")),
            Err(ProxyError::Auth(_))
        ));
    }

    #[test]
    fn test_user_label_from_jwt_email() {
        let jwt = make_jwt(serde_json::json!({"email": "dev@example.com"}));
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(&format!("Bearer {}", jwt)).unwrap());

        let label = user_label(&headers);
        assert_eq!(label.len(), 8);
        assert!(label.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(label, UNKNOWN_USER);

        // deterministic for the same email
        assert_eq!(label, user_label(&headers));
    }

    #[test]
    fn test_user_label_unknown_without_jwt() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer plain-api-key"));
        assert_eq!(user_label(&headers), UNKNOWN_USER);
        assert_eq!(user_label(&HeaderMap::new()), UNKNOWN_USER);
    }

    #[test]
    fn test_user_label_jwt_without_email() {
        let jwt = make_jwt(serde_json::json!({"sub": "abc"}));
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(&format!("Bearer {}", jwt)).unwrap());
        assert_eq!(user_label(&headers), UNKNOWN_USER);
    }

    #[test]
    fn test_inbound_authorization_passthrough() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(inbound_authorization(&headers).as_deref(), Some("Bearer abc"));
    }
}
