//! Access queries
//!
//! - GET /access/{assetId} - the caller's access decision for an asset
//! - GET /access/{assetId}/{action} - whether the caller may perform an action
//!
//! Both are read-only; no quota is consumed.

use hyper::{Response, StatusCode};

use super::{json_response, ResponseBody};
use crate::auth::Caller;
use crate::entitlement::Action;
use crate::server::AppState;
use crate::types::Result;

pub async fn handle_access(
    state: &AppState,
    caller: &Caller,
    asset_id: &str,
) -> Result<Response<ResponseBody>> {
    let decision = state
        .evaluator
        .evaluate_with_retry(caller.identity.as_ref(), asset_id)
        .await?;

    Ok(json_response(StatusCode::OK, &decision))
}

pub async fn handle_action(
    state: &AppState,
    caller: &Caller,
    asset_id: &str,
    action: &str,
) -> Result<Response<ResponseBody>> {
    let action: Action = action.parse()?;
    let authorization = state
        .authorizer
        .authorize(caller.identity.as_ref(), asset_id, action)
        .await?;

    Ok(json_response(StatusCode::OK, &authorization))
}
