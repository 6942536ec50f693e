//! Health check endpoints
//!
//! - /health, /healthz - Liveness probe (is the service running?)
//! - /ready, /readyz - Readiness probe (can the entitlement store be reached?)
//! - /version - build metadata for deployment verification

use hyper::{Response, StatusCode};
use serde::Serialize;

use super::{json_response, ResponseBody};
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    /// 'online' or 'degraded'
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since startup
    pub uptime: u64,
    pub timestamp: String,
    pub mode: &'static str,
    pub node_id: String,
    pub store: StoreHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct StoreHealth {
    pub backend: &'static str,
    pub reachable: bool,
}

fn build_health_response(state: &AppState, reachable: bool, error: Option<String>) -> HealthResponse {
    let args = &state.args;

    HealthResponse {
        healthy: true,
        status: if reachable { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if args.dev_mode {
            "development"
        } else {
            "production"
        },
        node_id: args.node_id.to_string(),
        store: StoreHealth {
            backend: state.store_backend_name(),
            reachable,
        },
        error,
    }
}

/// Liveness probe: always 200 while the process serves requests
pub fn health_check(state: &AppState) -> Response<ResponseBody> {
    json_response(StatusCode::OK, &build_health_response(state, true, None))
}

/// Readiness probe: 200 only when the entitlement store answers a ping
pub async fn readiness_check(state: &AppState) -> Response<ResponseBody> {
    let (reachable, error) = match state.store.ping().await {
        Ok(()) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };

    let status = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    json_response(status, &build_health_response(state, reachable, error))
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

pub fn version_info() -> Response<ResponseBody> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "turnstile",
    };

    json_response(StatusCode::OK, &response)
}
