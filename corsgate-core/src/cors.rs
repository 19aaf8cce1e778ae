//! CORS response headers derived from the origin policy.

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Response, StatusCode};

use crate::defaults;
use crate::headers;
use crate::types::{GatewayConfig, WILDCARD};

/// Methods advertised in `Access-Control-Allow-Methods`.
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS";

/// Returns `true` if `origin` may call the gateway.
///
/// Requests without an `Origin` header are not cross-origin and always pass.
pub fn origin_allowed(config: &GatewayConfig, origin: Option<&str>) -> bool {
    match origin {
        None => true,
        Some(origin) => {
            config.allows_any_origin() || config.allowed_origins.iter().any(|o| o == origin)
        }
    }
}

/// Builds the CORS headers for a response to a caller with `origin`.
///
/// The allow-origin header is omitted for disallowed origins; the browser
/// then blocks the response.
pub fn cors_headers(
    config: &GatewayConfig,
    origin: Option<&str>,
    request_headers: &HeaderMap,
) -> HeaderMap {
    let mut out = HeaderMap::new();

    if config.allows_any_origin() {
        out.insert(
            HeaderName::from_static(headers::ACCESS_CONTROL_ALLOW_ORIGIN),
            HeaderValue::from_static(WILDCARD),
        );
    } else if let Some(origin) = origin
        && origin_allowed(config, Some(origin))
        && let Ok(value) = HeaderValue::from_str(origin)
    {
        out.insert(
            HeaderName::from_static(headers::ACCESS_CONTROL_ALLOW_ORIGIN),
            value,
        );
        out.insert(
            HeaderName::from_static(headers::VARY),
            HeaderValue::from_static("Origin"),
        );
    }

    out.insert(
        HeaderName::from_static(headers::ACCESS_CONTROL_ALLOW_METHODS),
        HeaderValue::from_static(ALLOWED_METHODS),
    );

    let allow_headers = request_headers
        .get(headers::ACCESS_CONTROL_REQUEST_HEADERS)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(WILDCARD));
    out.insert(
        HeaderName::from_static(headers::ACCESS_CONTROL_ALLOW_HEADERS),
        allow_headers,
    );
    out.insert(
        HeaderName::from_static(headers::ACCESS_CONTROL_EXPOSE_HEADERS),
        HeaderValue::from_static(WILDCARD),
    );
    out.insert(
        HeaderName::from_static(headers::ACCESS_CONTROL_MAX_AGE),
        HeaderValue::from(defaults::CORS_MAX_AGE_SECS),
    );

    out
}

/// Returns `true` for a CORS preflight request.
pub fn is_preflight(method: &hyper::Method, request_headers: &HeaderMap) -> bool {
    method == hyper::Method::OPTIONS
        && request_headers.contains_key(headers::ACCESS_CONTROL_REQUEST_METHOD)
}

/// Answers a preflight purely from the origin policy: 204 or 403.
pub fn preflight_status(config: &GatewayConfig, origin: Option<&str>) -> StatusCode {
    if origin_allowed(config, origin) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::FORBIDDEN
    }
}

/// Copies `cors` into a response, replacing same-named headers.
pub fn apply<B>(response: &mut Response<B>, cors: HeaderMap) {
    let target = response.headers_mut();
    for (name, value) in cors {
        if let Some(name) = name {
            target.insert(name, value);
        }
    }
}
