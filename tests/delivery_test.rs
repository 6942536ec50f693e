//! Delivery paths end to end: issuer, bundles, signed references and the HTTP router

use bytes::Bytes;
use chrono::{Duration, Utc};
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Response, StatusCode};
use std::io::{Cursor, Read};
use std::sync::Arc;

use turnstile::auth::PermissionLevel;
use turnstile::config::Args;
use turnstile::db::{EntitlementStore, MemoryEntitlementStore};
use turnstile::entitlement::model::{Asset, Grant, GrantKind, GrantStatus, Identity, SlotName};
use turnstile::logging::AuditLogger;
use turnstile::routes::ResponseBody;
use turnstile::server::{route, AppState};
use turnstile::storage::{MemoryObjectStore, ObjectStore, ReferenceSigner};
use turnstile::TurnstileError;

const ADMIN_KEY: &str = "ops-key-for-integration-tests";

struct Harness {
    state: Arc<AppState>,
    store: Arc<MemoryEntitlementStore>,
    objects: Arc<MemoryObjectStore>,
}

/// Asset with four of six slots bound; the examples file is missing from storage
fn harness() -> Harness {
    let args = Args::parse_from([
        "turnstile",
        "--dev-mode",
        "--store-backend",
        "memory",
        "--api-key-admin",
        ADMIN_KEY,
        "--public-url",
        "https://dl.example.test",
    ]);

    let store = Arc::new(MemoryEntitlementStore::new());
    let objects = Arc::new(MemoryObjectStore::new(ReferenceSigner::new_dev(
        args.public_url.clone(),
    )));

    store.put_asset(
        Asset::new("intake", "client-intake")
            .with_file(SlotName::Guide, "intake/guide.pdf")
            .with_file(SlotName::PromptSet, "intake/prompts.json")
            .with_file(SlotName::Checklist, "intake/checklist.md")
            .with_file(SlotName::Examples, "intake/examples.zip"),
    );
    objects.put("intake/guide.pdf", &b"%PDF-1.7 intake guide"[..]);
    objects.put("intake/prompts.json", &br#"{"prompts":["summarize"]}"#[..]);
    objects.put("intake/checklist.md", &b"- [ ] consent form"[..]);

    let state = AppState::new(
        args,
        store.clone(),
        objects.clone(),
        AuditLogger::new("delivery-test".into()),
    )
    .unwrap();

    Harness {
        state: Arc::new(state),
        store,
        objects,
    }
}

impl Harness {
    fn purchase(&self, identity: &str, limit: Option<u32>) -> String {
        let mut grant = Grant::new(
            Identity::new(identity),
            "intake",
            GrantKind::Standalone,
            Utc::now() - Duration::days(1),
        );
        if let Some(limit) = limit {
            grant = grant.with_download_limit(limit);
        }
        let id = grant.grant_id.clone();
        self.store.put_grant(grant);
        id
    }

    fn bearer(&self, identity: &str, level: PermissionLevel) -> String {
        let token = self.state.jwt.generate_token(identity, level).unwrap();
        format!("Bearer {}", token)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        auth: Option<(&str, String)>,
        body: Option<serde_json::Value>,
    ) -> Response<ResponseBody> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some((name, value)) = auth {
            builder = builder.header(name, value);
        }
        let body = body
            .map(|v| Bytes::from(v.to_string()))
            .unwrap_or_default();
        route(self.state.clone(), builder.body(Full::new(body)).unwrap()).await
    }
}

async fn read_body(response: Response<ResponseBody>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn read_json(response: Response<ResponseBody>) -> serde_json::Value {
    serde_json::from_slice(&read_body(response).await).unwrap()
}

fn token_of(reference_url: &str) -> &str {
    reference_url.rsplit('/').next().unwrap()
}

#[tokio::test]
async fn bundle_skips_missing_file() {
    let h = harness();
    let id = h.purchase("customer-1", Some(3));
    let user = Identity::new("customer-1");

    let bundle = h.state.issuer.issue_bundle(Some(&user), "intake").await.unwrap();
    assert_eq!(bundle.entries.len(), 3);
    assert!(bundle.entries.iter().all(|e| e.slot != SlotName::Examples));

    let bytes: Vec<u8> = {
        use futures::TryStreamExt;
        let parts: Vec<Bytes> = bundle.body.try_collect().await.unwrap();
        parts.concat()
    };
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 3);

    let mut guide = String::new();
    archive
        .by_name("client-intake/guide.pdf")
        .unwrap()
        .read_to_string(&mut guide)
        .unwrap();
    assert_eq!(guide, "%PDF-1.7 intake guide");
    assert!(archive.by_name("client-intake/prompt_set.json").is_ok());
    assert!(archive.by_name("client-intake/checklist.md").is_ok());

    let grant = h.store.get_grant_by_id(&id).await.unwrap().unwrap();
    assert_eq!(grant.downloads_used, 1);
    assert_eq!(h.store.download_events().len(), 3);
}

#[tokio::test]
async fn bundle_with_nothing_resolvable_fails() {
    let h = harness();
    for file_ref in ["intake/guide.pdf", "intake/prompts.json", "intake/checklist.md"] {
        h.objects.remove(file_ref);
    }
    let id = h.purchase("customer-1", Some(3));
    let user = Identity::new("customer-1");

    let err = h.state.issuer.issue_bundle(Some(&user), "intake").await.unwrap_err();
    assert!(matches!(err, TurnstileError::NotFound(_)));

    let grant = h.store.get_grant_by_id(&id).await.unwrap().unwrap();
    assert_eq!(grant.downloads_used, 0);
    assert!(h.store.download_events().is_empty());
}

#[tokio::test]
async fn expired_reference_is_rejected() {
    let h = harness();
    let signed = h
        .objects
        .signer()
        .mint_at(
            "intake/guide.pdf",
            std::time::Duration::from_secs(60),
            Utc::now() - Duration::hours(2),
        )
        .unwrap();

    let err = h.objects.redeem(token_of(&signed.url)).await.err().unwrap();
    assert!(matches!(err, TurnstileError::Expired(_)));
}

#[tokio::test]
async fn tampered_reference_is_rejected() {
    let h = harness();
    let signed = h
        .objects
        .mint_signed_url("intake/guide.pdf", std::time::Duration::from_secs(60))
        .unwrap();

    let other = h
        .objects
        .mint_signed_url("intake/checklist.md", std::time::Duration::from_secs(60))
        .unwrap();

    // Point the reference at another file while keeping its signature
    let (_, signature) = token_of(&signed.url).rsplit_once('.').unwrap();
    let (claims, _) = token_of(&other.url).rsplit_once('.').unwrap();
    let token = format!("{}.{}", claims, signature);

    let err = h.objects.redeem(&token).await.err().unwrap();
    assert!(matches!(err, TurnstileError::Forbidden(_)));
}

#[tokio::test]
async fn deliver_and_redeem_over_http() {
    let h = harness();
    let id = h.purchase("customer-1", Some(2));
    let auth = ("authorization", h.bearer("customer-1", PermissionLevel::Customer));

    let response = h
        .send(Method::POST, "/deliver/intake/guide", Some(auth), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let url = body["referenceUrl"].as_str().unwrap().to_string();
    assert!(url.starts_with("https://dl.example.test/files/"));
    assert!(body["expiresAt"].is_string());

    let path = format!("/files/{}", token_of(&url));
    let response = h.send(Method::GET, &path, None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/octet-stream");
    assert_eq!(&read_body(response).await[..], b"%PDF-1.7 intake guide");

    let grant = h.store.get_grant_by_id(&id).await.unwrap().unwrap();
    assert_eq!(grant.downloads_used, 1);
}

#[tokio::test]
async fn deliver_error_codes() {
    let h = harness();

    let response = h.send(Method::POST, "/deliver/intake/guide", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["code"], "UNAUTHENTICATED");

    h.purchase("customer-1", Some(1));
    let auth = || Some(("authorization", h.bearer("customer-1", PermissionLevel::Customer)));

    let response = h.send(Method::POST, "/deliver/intake/manual", auth(), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = h.send(Method::POST, "/deliver/intake/examples", auth(), None).await;
    assert_eq!(read_json(response).await["code"], "NOT_FOUND");

    let response = h.send(Method::POST, "/deliver/intake/guide", auth(), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = h.send(Method::POST, "/deliver/intake/guide", auth(), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(read_json(response).await["code"], "QUOTA_EXHAUSTED");
}

#[tokio::test]
async fn bundle_over_http() {
    let h = harness();
    h.purchase("customer-1", None);
    let auth = ("authorization", h.bearer("customer-1", PermissionLevel::Customer));

    let response = h.send(Method::GET, "/bundle/intake", Some(auth), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/zip");
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"client-intake.zip\""
    );

    let bytes = read_body(response).await;
    let archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(archive.len(), 3);
}

#[tokio::test]
async fn access_queries_over_http() {
    let h = harness();
    let auth = || Some(("authorization", h.bearer("customer-1", PermissionLevel::Customer)));

    let response = h.send(Method::GET, "/access/intake", auth(), None).await;
    let body = read_json(response).await;
    assert_eq!(body["hasAccess"], false);
    assert_eq!(body["restrictions"][0], "purchase required");

    let response = h.send(Method::GET, "/access/intake/share", auth(), None).await;
    assert_eq!(read_json(response).await["allowed"], true);

    let response = h.send(Method::GET, "/access/intake/delete", auth(), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    h.purchase("customer-1", Some(4));
    let response = h.send(Method::GET, "/access/intake", auth(), None).await;
    let body = read_json(response).await;
    assert_eq!(body["hasAccess"], true);
    assert_eq!(body["canDownload"], true);
    assert_eq!(body["downloadsRemaining"], 4);
    assert_eq!(body["tier"], "standalone");
}

#[tokio::test]
async fn admin_grant_lifecycle_over_http() {
    let h = harness();
    let admin = || Some(("x-api-key", ADMIN_KEY.to_string()));

    let response = h
        .send(
            Method::POST,
            "/grants/intake/temporary",
            admin(),
            Some(serde_json::json!({
                "identity": "customer-9",
                "durationDays": 7,
                "reason": "webinar attendee",
                "downloadLimit": 2
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let grant_id = read_json(response).await["grantId"]
        .as_str()
        .unwrap()
        .to_string();

    let revoke_path = format!("/grants/{}/revoke", grant_id);
    let body = serde_json::json!({ "reason": "refund requested", "refund": true });
    for _ in 0..2 {
        let response = h
            .send(Method::POST, &revoke_path, admin(), Some(body.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    let response = h
        .send(Method::GET, &format!("/grants/{}", grant_id), admin(), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "refunded");

    let grant = h.store.get_grant_by_id(&grant_id).await.unwrap().unwrap();
    assert_eq!(grant.status, GrantStatus::Refunded);
}

#[tokio::test]
async fn admin_routes_reject_customers() {
    let h = harness();
    let id = h.purchase("customer-1", None);

    let response = h
        .send(Method::GET, &format!("/grants/{}", id), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let customer = Some(("authorization", h.bearer("customer-1", PermissionLevel::Customer)));
    let response = h
        .send(
            Method::POST,
            &format!("/grants/{}/revoke", id),
            customer,
            Some(serde_json::json!({ "reason": "self-service" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(read_json(response).await["code"], "FORBIDDEN");

    let grant = h.store.get_grant_by_id(&id).await.unwrap().unwrap();
    assert_eq!(grant.status, GrantStatus::Active);
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let h = harness();

    let response = h.send(Method::GET, "/readyz", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["store"]["backend"], "memory");

    let response = h.send(Method::GET, "/version", None, None).await;
    assert_eq!(read_json(response).await["service"], "turnstile");

    let response = h.send(Method::GET, "/nowhere", None, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
