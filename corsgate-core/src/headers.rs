//! HTTP header constants for corsgate.
//!
//! This module centralizes all HTTP header names used throughout the codebase,
//! avoiding magic strings and ensuring consistency. All names are lowercase.

/// X-Forwarded-For header - contains the originating client IP.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// X-Real-IP header.
pub const X_REAL_IP: &str = "x-real-ip";

/// Forwarded header (RFC 7239) - standardized proxy header.
pub const FORWARDED: &str = "forwarded";

/// API key header used for client identity and management access.
pub const X_API_KEY: &str = "x-api-key";

/// Authorization header (Bearer token for management routes).
pub const AUTHORIZATION: &str = "authorization";

/// Origin header.
pub const ORIGIN: &str = "origin";

/// User-Agent header.
pub const USER_AGENT: &str = "user-agent";

/// Accept header.
pub const ACCEPT: &str = "accept";

/// Accept-Language header.
pub const ACCEPT_LANGUAGE: &str = "accept-language";

/// Content-Type header.
pub const CONTENT_TYPE: &str = "content-type";

/// Host header.
pub const HOST: &str = "host";

/// Content-Length header.
pub const CONTENT_LENGTH: &str = "content-length";

/// Retry-After header (429 and 503 responses).
pub const RETRY_AFTER: &str = "retry-after";

/// Cache state marker on proxied responses.
pub const X_CACHE: &str = "x-cache";

/// Gateway identification on proxied responses.
pub const X_PROXIED_BY: &str = "x-proxied-by";

/// Connection header (hop-by-hop).
pub const CONNECTION: &str = "connection";

/// Keep-Alive header (hop-by-hop).
pub const KEEP_ALIVE: &str = "keep-alive";

/// Proxy-Authenticate header (hop-by-hop).
pub const PROXY_AUTHENTICATE: &str = "proxy-authenticate";

/// Proxy-Authorization header (hop-by-hop).
pub const PROXY_AUTHORIZATION: &str = "proxy-authorization";

/// TE header (hop-by-hop).
pub const TE: &str = "te";

/// Trailers header (hop-by-hop).
pub const TRAILERS: &str = "trailers";

/// Transfer-Encoding header (hop-by-hop).
pub const TRANSFER_ENCODING: &str = "transfer-encoding";

/// Upgrade header (hop-by-hop).
pub const UPGRADE: &str = "upgrade";

/// Access-Control-Allow-Origin header.
pub const ACCESS_CONTROL_ALLOW_ORIGIN: &str = "access-control-allow-origin";

/// Access-Control-Allow-Methods header.
pub const ACCESS_CONTROL_ALLOW_METHODS: &str = "access-control-allow-methods";

/// Access-Control-Allow-Headers header.
pub const ACCESS_CONTROL_ALLOW_HEADERS: &str = "access-control-allow-headers";

/// Access-Control-Expose-Headers header.
pub const ACCESS_CONTROL_EXPOSE_HEADERS: &str = "access-control-expose-headers";

/// Access-Control-Max-Age header.
pub const ACCESS_CONTROL_MAX_AGE: &str = "access-control-max-age";

/// Access-Control-Request-Method header (preflight marker).
pub const ACCESS_CONTROL_REQUEST_METHOD: &str = "access-control-request-method";

/// Access-Control-Request-Headers header.
pub const ACCESS_CONTROL_REQUEST_HEADERS: &str = "access-control-request-headers";

/// Vary header.
pub const VARY: &str = "vary";

/// List of all hop-by-hop headers that should not be forwarded.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    CONNECTION,
    KEEP_ALIVE,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILERS,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// Headers injected by CDNs, load balancers or the gateway's own callers
/// that would identify the caller to the upstream.
pub const IDENTIFYING_HEADERS: &[&str] = &[
    HOST,
    CONTENT_LENGTH,
    X_FORWARDED_FOR,
    X_REAL_IP,
    FORWARDED,
    X_API_KEY,
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-forwarded-port",
    "true-client-ip",
    "cdn-loop",
    "cf-connecting-ip",
    "cf-connecting-ipv6",
    "cf-ipcountry",
    "cf-ray",
    "cf-visitor",
    "cf-worker",
    "fastly-client-ip",
    "x-amzn-trace-id",
    "x-vercel-id",
    "x-vercel-forwarded-for",
];

/// Header name prefixes stripped from outbound requests.
const IDENTIFYING_PREFIXES: &[&str] = &["cf-", "x-vercel-", "x-amz-cf-", "fastly-"];

/// Check if a header is a hop-by-hop header that shouldn't be forwarded.
///
/// # Example
///
/// ```
/// use corsgate_core::headers::is_hop_by_hop;
///
/// assert!(is_hop_by_hop("connection"));
/// assert!(is_hop_by_hop("transfer-encoding"));
/// assert!(!is_hop_by_hop("content-type"));
/// ```
pub fn is_hop_by_hop(header_name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&header_name)
}

/// Check if a request header must be dropped before the outbound call.
///
/// Covers hop-by-hop headers, `host`/`content-length` (recomputed by the client)
/// and anything that identifies the caller or the gateway's own credentials.
pub fn is_stripped_outbound(header_name: &str) -> bool {
    is_hop_by_hop(header_name)
        || IDENTIFYING_HEADERS.contains(&header_name)
        || IDENTIFYING_PREFIXES
            .iter()
            .any(|prefix| header_name.starts_with(prefix))
}

/// Check if an upstream response header must be dropped before replying.
///
/// Upstream CORS headers are discarded because the gateway rebuilds them.
pub fn is_stripped_inbound(header_name: &str) -> bool {
    is_hop_by_hop(header_name)
        || header_name == CONTENT_LENGTH
        || header_name.starts_with("access-control-")
}
