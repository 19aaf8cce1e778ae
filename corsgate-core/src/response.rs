//! Response construction helpers.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::cors;
use crate::error::GatewayError;
use crate::headers;

/// Response type produced by every gateway path.
pub type GatewayResponse = Response<Full<Bytes>>;

/// Creates a standardized plain-text error response.
///
/// Falls back to a minimal response if building fails (should never happen
/// with a valid `StatusCode`).
///
/// # Example
///
/// ```
/// use corsgate_core::response::create_error_response;
/// use hyper::StatusCode;
///
/// let response = create_error_response(StatusCode::NOT_FOUND, "Resource not found");
/// assert_eq!(response.status(), StatusCode::NOT_FOUND);
/// ```
pub fn create_error_response(status: StatusCode, message: &str) -> GatewayResponse {
    Response::builder()
        .status(status)
        .header(headers::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(message.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error"))))
}

/// Maps a [`GatewayError`] to its client-facing response.
///
/// The body is the sanitized [`GatewayError::user_message`]. `Retry-After`
/// is set for rate and concurrency rejections; `cors` is applied so browsers
/// can read the error.
pub fn error_response(err: &GatewayError, cors_headers: HeaderMap) -> GatewayResponse {
    let mut response = create_error_response(err.status_code(), &err.user_message());
    if let Some(secs) = err.retry_after_secs() {
        response.headers_mut().insert(
            HeaderName::from_static(headers::RETRY_AFTER),
            HeaderValue::from(secs),
        );
    }
    cors::apply(&mut response, cors_headers);
    response
}

/// Serializes `value` as a JSON response.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> GatewayResponse {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(headers::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| create_error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")),
        Err(err) => {
            warn!(error = %err, "Failed to serialize JSON response");
            create_error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// Bodyless response with `status`.
pub fn empty_response(status: StatusCode) -> GatewayResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_text(response: GatewayResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_create_error_response() {
        let response = create_error_response(StatusCode::FORBIDDEN, "Domain is blocked");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[headers::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(body_text(response).await, "Domain is blocked");
    }

    #[tokio::test]
    async fn test_error_response_retry_after_and_cors() {
        let err = GatewayError::RateLimited {
            client: "1.2.3.4".into(),
            retry_after_secs: 60,
        };
        let mut cors = HeaderMap::new();
        cors.insert(headers::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

        let response = error_response(&err, cors);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[headers::RETRY_AFTER], "60");
        assert_eq!(response.headers()[headers::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body_text(response).await, "Rate limit exceeded");
    }

    #[tokio::test]
    async fn test_error_response_hides_upstream_detail() {
        let err = GatewayError::UpstreamConnectionFailed("dns error: no record for internal.corp".into());
        let response = error_response(&err, HeaderMap::new());
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(!body_text(response).await.contains("internal.corp"));
    }

    #[tokio::test]
    async fn test_json_response() {
        let response = json_response(StatusCode::OK, &serde_json::json!({ "status": "ok" }));
        assert_eq!(response.headers()[headers::CONTENT_TYPE], "application/json");
        assert_eq!(body_text(response).await, r#"{"status":"ok"}"#);
    }

    #[test]
    fn test_empty_response() {
        assert_eq!(empty_response(StatusCode::NO_CONTENT).status(), StatusCode::NO_CONTENT);
    }
}
