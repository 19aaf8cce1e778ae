//! Management API under `/_api/`.
//!
//! Every route requires the configured API key (when one is set). Read routes
//! answer `GET`/`HEAD`; routes that change state answer `POST` only.

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::auth;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::response::{GatewayResponse, json_response};
use crate::stats::StatsSnapshot;
use crate::types::GatewayConfig;

/// Path prefix of the management API.
pub const API_PREFIX: &str = "/_api";

/// Management routes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Health,
    Stats,
    Config,
    ResetStats,
    ClearCache,
    ReloadConfig,
    Performance,
    Version,
}

impl Route {
    /// Parses the path segment after `/_api/`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim_end_matches('/') {
            "health" => Some(Self::Health),
            "stats" => Some(Self::Stats),
            "config" => Some(Self::Config),
            "reset-stats" => Some(Self::ResetStats),
            "clear-cache" => Some(Self::ClearCache),
            "reload-config" => Some(Self::ReloadConfig),
            "performance" => Some(Self::Performance),
            "version" => Some(Self::Version),
            _ => None,
        }
    }

    /// Routes that change gateway state.
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::ResetStats | Self::ClearCache | Self::ReloadConfig)
    }

    fn allows(self, method: &Method) -> bool {
        if self.is_mutating() {
            method == Method::POST
        } else {
            method == Method::GET || method == Method::HEAD
        }
    }

    fn allow_header(self) -> &'static str {
        if self.is_mutating() { "POST" } else { "GET, HEAD" }
    }
}

/// Returns `true` for paths served by the management API.
pub fn is_management_path(path: &str) -> bool {
    path == API_PREFIX
        || path
            .strip_prefix(API_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[derive(Serialize)]
struct StatsView {
    enabled: bool,
    uptime_secs: u64,
    #[serde(flatten)]
    snapshot: StatsSnapshot,
}

/// Answers a management request.
pub async fn handle(
    gateway: &Gateway,
    config: &GatewayConfig,
    method: &Method,
    path: &str,
    request_headers: &HeaderMap,
    query: Option<&str>,
) -> GatewayResponse {
    let provided = auth::extract_api_key(request_headers, query);
    if let Err(err) = auth::authorize(config, provided.as_deref()) {
        debug!(path, "Management request rejected: missing or invalid API key");
        return error_json(&err);
    }

    let Some(route) = path
        .strip_prefix(API_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(Route::parse)
    else {
        return json_response(StatusCode::NOT_FOUND, &json!({ "error": "Not found" }));
    };

    if !route.allows(method) {
        let mut response = json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &json!({ "error": "Method not allowed" }),
        );
        response.headers_mut().insert(
            HeaderName::from_static("allow"),
            HeaderValue::from_static(route.allow_header()),
        );
        return response;
    }

    match route {
        Route::Health => json_response(StatusCode::OK, &gateway.health()),
        Route::Version => json_response(
            StatusCode::OK,
            &json!({ "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }),
        ),
        Route::Stats => json_response(
            StatusCode::OK,
            &StatsView {
                enabled: config.enable_stats,
                uptime_secs: gateway.uptime_secs(),
                snapshot: gateway.stats_snapshot(),
            },
        ),
        Route::Config => json_response(StatusCode::OK, &config.redacted()),
        Route::Performance => json_response(StatusCode::OK, &gateway.performance().await),
        Route::ResetStats => {
            gateway.reset_stats();
            info!("Statistics reset via management API");
            json_response(StatusCode::OK, &json!({ "success": true }))
        }
        Route::ClearCache => {
            let removed = gateway.clear_cache();
            json_response(
                StatusCode::OK,
                &json!({ "success": true, "removed_entries": removed }),
            )
        }
        Route::ReloadConfig => match gateway.reload_config() {
            Ok(active) => json_response(
                StatusCode::OK,
                &json!({ "success": true, "config": active.redacted() }),
            ),
            Err(err) => reload_failure(&err),
        },
    }
}

fn error_json(err: &GatewayError) -> GatewayResponse {
    json_response(err.status_code(), &json!({ "error": err.user_message() }))
}

/// The active configuration is unchanged when this is returned.
fn reload_failure(err: &GatewayError) -> GatewayResponse {
    let issues: Vec<String> = match err {
        GatewayError::Config(config_err) => {
            config_err.issues.iter().map(ToString::to_string).collect()
        }
        other => vec![other.to_string()],
    };
    json_response(
        err.status_code(),
        &json!({
            "success": false,
            "error": "Configuration reload failed, previous configuration kept",
            "issues": issues,
        }),
    )
}
