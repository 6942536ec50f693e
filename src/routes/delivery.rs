//! Delivery endpoints
//!
//! - POST /deliver/{assetId}/{slot} - issue a retrieval reference for one file
//! - GET /bundle/{assetId} - stream the whole-asset zip archive
//! - GET /files/{token} - redeem a retrieval reference

use hyper::{Response, StatusCode};
use tracing::info;

use super::{json_response, stream_response, ResponseBody};
use crate::auth::Caller;
use crate::delivery::bundle::safe_file_stem;
use crate::entitlement::model::SlotName;
use crate::entitlement::Action;
use crate::server::AppState;
use crate::types::Result;

pub async fn handle_deliver(
    state: &AppState,
    caller: &Caller,
    asset_id: &str,
    slot: &str,
) -> Result<Response<ResponseBody>> {
    let slot: SlotName = slot.parse()?;
    let identity = caller.identity.as_ref();

    let authorization = state
        .authorizer
        .authorize(identity, asset_id, Action::Download)
        .await?;
    if !authorization.allowed {
        return Err(authorization.into_error());
    }
    let grant_id = authorization
        .decision
        .as_ref()
        .and_then(|d| d.grant_id.clone());

    let reference = state
        .issuer
        .issue(identity, grant_id.as_deref(), asset_id, slot)
        .await?;

    Ok(json_response(StatusCode::OK, &reference))
}

pub async fn handle_bundle(
    state: &AppState,
    caller: &Caller,
    asset_id: &str,
) -> Result<Response<ResponseBody>> {
    let bundle = state
        .issuer
        .issue_bundle(caller.identity.as_ref(), asset_id)
        .await?;

    info!(
        asset_id,
        files = bundle.entries.len(),
        "Streaming bundle {}",
        bundle.file_name
    );

    let disposition = format!("attachment; filename=\"{}\"", bundle.file_name);
    Ok(stream_response(
        "application/zip",
        &[("Content-Disposition", disposition)],
        bundle.body,
    ))
}

pub async fn handle_redeem(state: &AppState, token: &str) -> Result<Response<ResponseBody>> {
    let (claims, stream) = state.objects.redeem(token).await?;

    let name = claims
        .file_ref
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("download");
    let disposition = format!("attachment; filename=\"{}\"", safe_file_stem(name));

    Ok(stream_response(
        "application/octet-stream",
        &[("Content-Disposition", disposition)],
        stream,
    ))
}
