//! Admin grant management
//!
//! - POST /grants/{assetId}/temporary - create a promotional grant
//! - POST /grants/{grantId}/revoke - revoke or refund a grant
//! - GET /grants/{grantId} - current grant state
//!
//! All routes require an admin JWT or the admin API key.

use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{empty_response, json_response, read_json, ResponseBody};
use crate::auth::Caller;
use crate::entitlement::model::Identity;
use crate::server::AppState;
use crate::types::{Result, TurnstileError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryGrantRequest {
    pub identity: String,
    pub duration_days: u32,
    pub reason: String,
    #[serde(default)]
    pub download_limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryGrantResponse {
    pub grant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub reason: String,
    #[serde(default)]
    pub refund: bool,
}

/// Admin gate: anonymous callers are unauthenticated, others forbidden
fn require_admin(caller: &Caller) -> Result<()> {
    if caller.is_admin() {
        Ok(())
    } else if caller.identity.is_none() {
        Err(TurnstileError::Unauthenticated)
    } else {
        Err(TurnstileError::Forbidden("admin access required".to_string()))
    }
}

pub async fn handle_grant_temporary<B>(
    state: &AppState,
    caller: &Caller,
    asset_id: &str,
    req: Request<B>,
) -> Result<Response<ResponseBody>>
where
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    require_admin(caller)?;
    let body: TemporaryGrantRequest = read_json(req).await?;

    let grant_id = state
        .lifecycle
        .grant_temporary(
            &Identity::new(body.identity),
            asset_id,
            body.duration_days,
            &body.reason,
            body.download_limit,
        )
        .await?;

    info!(asset_id, grant_id = %grant_id, "Temporary grant created via admin API");
    Ok(json_response(
        StatusCode::CREATED,
        &TemporaryGrantResponse { grant_id },
    ))
}

pub async fn handle_revoke<B>(
    state: &AppState,
    caller: &Caller,
    grant_id: &str,
    req: Request<B>,
) -> Result<Response<ResponseBody>>
where
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    require_admin(caller)?;
    let body: RevokeRequest = read_json(req).await?;

    let status = state
        .lifecycle
        .revoke(grant_id, &body.reason, body.refund)
        .await?;

    info!(grant_id, status = status.as_str(), "Grant revoked via admin API");
    Ok(empty_response(StatusCode::NO_CONTENT))
}

pub async fn handle_get_grant(
    state: &AppState,
    caller: &Caller,
    grant_id: &str,
) -> Result<Response<ResponseBody>> {
    require_admin(caller)?;

    let grant = state
        .store
        .get_grant_by_id(grant_id)
        .await?
        .ok_or_else(|| TurnstileError::NotFound(format!("grant {}", grant_id)))?;

    Ok(json_response(StatusCode::OK, &grant))
}
