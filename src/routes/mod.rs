//! HTTP routes for Turnstile
//!
//! Handlers return `Result<Response<ResponseBody>>`; the router turns errors
//! into `{ code, message }` bodies with `error_response`.

pub mod access;
pub mod delivery;
pub mod grants;
pub mod health;

pub use access::{handle_access, handle_action};
pub use delivery::{handle_bundle, handle_deliver, handle_redeem};
pub use grants::{handle_get_grant, handle_grant_temporary, handle_revoke};
pub use health::{health_check, readiness_check, version_info};

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::{Body, Frame};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::storage::ByteStream;
use crate::types::TurnstileError;

pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

/// Response body shared by buffered and streamed responses.
///
/// Unsync because file streams are only `Send`.
pub type ResponseBody = UnsyncBoxBody<Bytes, BodyError>;

/// Largest JSON request body accepted
pub const MAX_JSON_BODY: usize = 64 * 1024;

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Convert a Full<Bytes> response to the shared body type
pub fn to_boxed(response: Response<Full<Bytes>>) -> Response<ResponseBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed_unsync())
}

/// JSON response with the given status
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    let body = serde_json::to_string(value)
        .unwrap_or_else(|_| r#"{"code":"INTERNAL","message":"serialization failed"}"#.to_string());

    to_boxed(
        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .header("Cache-Control", "no-store")
            .body(Full::new(Bytes::from(body)))
            .unwrap(),
    )
}

/// Empty response with the given status
pub fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    to_boxed(
        Response::builder()
            .status(status)
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::new()))
            .unwrap(),
    )
}

/// Error body for a failed request.
///
/// Expected outcomes are logged at debug; operational failures at warn or error.
pub fn error_response(err: &TurnstileError) -> Response<ResponseBody> {
    match err {
        e if e.is_expected() => debug!(code = e.code(), "Request refused: {}", e),
        TurnstileError::StoreUnavailable(_) => warn!("Request failed: {}", err),
        _ => error!(code = err.code(), "Request failed: {}", err),
    }

    json_response(
        err.status_code(),
        &ErrorBody {
            code: err.code(),
            message: err.message(),
        },
    )
}

/// Stream a body with the given content type and extra headers
pub fn stream_response(
    content_type: &str,
    headers: &[(&str, String)],
    stream: ByteStream,
) -> Response<ResponseBody> {
    let frames = stream
        .map_ok(Frame::data)
        .map_err(|e| Box::new(e) as BodyError);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .header("Access-Control-Allow-Origin", "*")
        .header("Cache-Control", "no-store");
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }

    builder.body(StreamBody::new(frames).boxed_unsync()).unwrap()
}

/// CORS preflight response
pub fn preflight_response() -> Response<ResponseBody> {
    to_boxed(
        Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Headers", "Authorization, Content-Type, X-API-Key")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .body(Full::new(Bytes::new()))
            .unwrap(),
    )
}

/// Not found response
pub fn not_found_response(path: &str) -> Response<ResponseBody> {
    error_response(&TurnstileError::NotFound(format!("no route for {}", path)))
}

/// Read and parse a bounded JSON request body
pub async fn read_json<T, B>(req: Request<B>) -> Result<T, TurnstileError>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let bytes = Limited::new(req.into_body(), MAX_JSON_BODY)
        .collect()
        .await
        .map_err(|e| TurnstileError::BadRequest(format!("failed to read body: {}", e)))?
        .to_bytes();

    Ok(serde_json::from_slice(&bytes)?)
}
