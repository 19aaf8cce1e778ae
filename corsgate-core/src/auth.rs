//! API key extraction and verification.
//!
//! The key can arrive as `X-API-Key`, as an `Authorization: Bearer` token or as
//! a `key`/`api_key` query parameter, checked in that order. It serves two
//! purposes: it authorizes management routes, and a request carrying the
//! configured key is admitted under its own identity instead of its IP.

use hyper::HeaderMap;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{GatewayError, Result};
use crate::headers;
use crate::types::GatewayConfig;

/// Query parameters accepted as API key carriers.
pub const KEY_QUERY_PARAMS: &[&str] = &["key", "api_key"];

/// Constant-time byte comparison to prevent timing attacks.
/// Does not leak length information through timing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len_eq = a.len() == b.len();
    let max_len = a.len().max(b.len());
    let mut result = 0u8;

    for i in 0..max_len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        result |= x ^ y;
    }

    len_eq && result == 0
}

/// Token of an `Authorization: Bearer <token>` value.
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Finds the API key a caller supplied, if any.
pub fn extract_api_key(request_headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(key) = request_headers
        .get(headers::X_API_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
    {
        return Some(key.to_string());
    }

    if let Some(token) = request_headers
        .get(headers::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
    {
        return Some(token.to_string());
    }

    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, value)| KEY_QUERY_PARAMS.contains(&name.as_ref()) && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

/// Returns `true` if `provided` equals the configured key.
///
/// Always `false` when no key is configured.
pub fn key_matches(config: &GatewayConfig, provided: Option<&str>) -> bool {
    match (config.api_key.as_deref(), provided) {
        (Some(expected), Some(provided)) => {
            constant_time_eq(provided.as_bytes(), expected.as_bytes())
        }
        _ => false,
    }
}

/// Gate for management routes. Open when no key is configured.
pub fn authorize(config: &GatewayConfig, provided: Option<&str>) -> Result<()> {
    if config.api_key.is_none() || key_matches(config, provided) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

/// Admission key for a request.
///
/// A caller presenting the configured key gets `key:<fingerprint>`; anyone
/// else, including callers with an unknown key, is keyed by IP so rotating
/// bogus keys never yields fresh quota.
pub fn client_key(config: &GatewayConfig, provided: Option<&str>, client_ip: &str) -> String {
    match (key_matches(config, provided), provided) {
        (true, Some(key)) => format!("key:{}", key_fingerprint(key)),
        _ => client_ip.to_string(),
    }
}

/// Short, non-reversible identifier for a key, safe to log.
pub fn key_fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..8])
}

/// Removes the gateway key from a target URL's query so it never reaches the target.
///
/// Only the matching `key`/`api_key` pair is dropped. Every other segment is
/// kept byte for byte, and a URL without the key is left untouched.
pub fn strip_key_from_url(url: &mut Url, config: &GatewayConfig) {
    let Some(expected) = config.api_key.as_deref() else {
        return;
    };
    let Some(query) = url.query() else {
        return;
    };

    let segments: Vec<&str> = query.split('&').collect();
    let kept: Vec<&str> = segments
        .iter()
        .copied()
        .filter(|segment| !is_gateway_key_pair(segment, expected))
        .collect();
    if kept.len() == segments.len() {
        return;
    }

    let query = kept.join("&");
    url.set_query((!query.is_empty()).then_some(query.as_str()));
}

fn is_gateway_key_pair(segment: &str, expected: &str) -> bool {
    url::form_urlencoded::parse(segment.as_bytes())
        .next()
        .is_some_and(|(name, value)| {
            KEY_QUERY_PARAMS.contains(&name.as_ref())
                && constant_time_eq(value.as_bytes(), expected.as_bytes())
        })
}
