//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one spawned task per connection. Routing is
//! generic over the request body so the whole surface can be driven in tests
//! without a socket.

use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::{authenticate, ApiKeyValidator, Caller, JwtValidator};
use crate::config::{Args, StorageBackend, StoreBackend};
use crate::db::{EntitlementStore, MemoryEntitlementStore, MongoClient, MongoEntitlementStore};
use crate::delivery::{BundleComposer, DeliveryIssuer};
use crate::entitlement::{AccessEvaluator, ActionAuthorizer, GrantLifecycle, QuotaLedger};
use crate::logging::AuditLogger;
use crate::routes::{self, error_response, not_found_response, preflight_response, ResponseBody};
use crate::storage::{HttpObjectStore, LocalObjectStore, ObjectStore, ReferenceSigner};
use crate::types::{Result, TurnstileError};

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Entitlement record store (MongoDB or in-memory)
    pub store: Arc<dyn EntitlementStore>,
    /// Backing files and reference minting
    pub objects: Arc<dyn ObjectStore>,
    pub jwt: JwtValidator,
    pub api_keys: ApiKeyValidator,
    pub evaluator: Arc<AccessEvaluator>,
    pub authorizer: ActionAuthorizer,
    pub issuer: DeliveryIssuer,
    pub lifecycle: GrantLifecycle,
    pub audit: AuditLogger,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the engine around an already-built store and object store
    pub fn new(
        args: Args,
        store: Arc<dyn EntitlementStore>,
        objects: Arc<dyn ObjectStore>,
        audit: AuditLogger,
    ) -> Result<Self> {
        let jwt = match args.jwt_secret.clone() {
            Some(secret) => JwtValidator::new(secret, args.jwt_expiry_seconds)?,
            None if args.dev_mode => JwtValidator::new_dev(),
            None => return Err(TurnstileError::Config("JWT_SECRET is not set".into())),
        };
        let api_keys = ApiKeyValidator::new(args.api_key_admin.clone());

        let evaluator = Arc::new(
            AccessEvaluator::new(Arc::clone(&store)).with_retry_backoff(args.read_retry_backoff()),
        );
        let authorizer = ActionAuthorizer::new(Arc::clone(&evaluator));
        let ledger = Arc::new(QuotaLedger::new(Arc::clone(&store), audit.clone()));
        let composer = Arc::new(BundleComposer::new(
            Arc::clone(&store),
            Arc::clone(&objects),
            args.bundle_concurrency(),
        ));
        let issuer = DeliveryIssuer::new(
            Arc::clone(&evaluator),
            ledger,
            Arc::clone(&objects),
            composer,
            audit.clone(),
        )
        .with_ttl(args.reference_ttl());
        let lifecycle =
            GrantLifecycle::new(Arc::clone(&store), audit.clone(), args.promo_download_limit);

        Ok(Self {
            args,
            store,
            objects,
            jwt,
            api_keys,
            evaluator,
            authorizer,
            issuer,
            lifecycle,
            audit,
            started_at: Instant::now(),
        })
    }

    /// Build the configured store and object store, then wire the engine
    pub async fn from_args(args: Args, audit: AuditLogger) -> Result<Self> {
        let store: Arc<dyn EntitlementStore> = match args.store_backend {
            StoreBackend::Mongo => {
                let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
                Arc::new(MongoEntitlementStore::new(client).await?)
            }
            StoreBackend::Memory => {
                warn!("Using in-memory entitlement store - data is lost on restart");
                Arc::new(MemoryEntitlementStore::new())
            }
        };

        let signer = match args.signing_secret.clone() {
            Some(secret) => ReferenceSigner::new(secret, args.public_url.clone())?,
            None if args.dev_mode => ReferenceSigner::new_dev(args.public_url.clone()),
            None => return Err(TurnstileError::Config("SIGNING_SECRET is not set".into())),
        };

        let objects: Arc<dyn ObjectStore> = match args.storage_backend {
            StorageBackend::Local => {
                info!("Serving files from {}", args.storage_dir.display());
                Arc::new(LocalObjectStore::new(args.storage_dir.clone(), signer))
            }
            StorageBackend::Http => {
                let url = args.storage_url.clone().ok_or_else(|| {
                    TurnstileError::Config("STORAGE_URL is required for http storage".into())
                })?;
                info!("Fetching files from {}", url);
                Arc::new(HttpObjectStore::new(url, signer)?)
            }
        };

        Self::new(args, store, objects, audit)
    }

    pub fn store_backend_name(&self) -> &'static str {
        match self.args.store_backend {
            StoreBackend::Mongo => "mongo",
            StoreBackend::Memory => "memory",
        }
    }
}

/// Run the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Turnstile listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - built-in secrets in use");
    }
    if !state.api_keys.is_configured() {
        info!("No admin API key configured - admin routes need an admin JWT");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Entry point for one request on a live connection
pub async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<ResponseBody>, hyper::Error> {
    info!("[{}] {} {}", addr, req.method(), req.uri().path());
    Ok(route(state, req).await)
}

fn header<'a, B>(req: &'a Request<B>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn caller_of<B>(state: &AppState, req: &Request<B>) -> Caller {
    authenticate(
        &state.jwt,
        &state.api_keys,
        header(req, "authorization"),
        header(req, "x-api-key"),
    )
}

/// Route a request to its handler
pub async fn route<B>(state: Arc<AppState>, req: Request<B>) -> Response<ResponseBody>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let caller = caller_of(&state, &req);
    let state = state.as_ref();

    let result = match (method, segments.as_slice()) {
        (Method::OPTIONS, _) => Ok(preflight_response()),

        // Liveness probe
        (Method::GET, ["health"] | ["healthz"]) => Ok(routes::health_check(state)),

        // Readiness probe - store must answer a ping
        (Method::GET, ["ready"] | ["readyz"]) => Ok(routes::readiness_check(state).await),

        (Method::GET, ["version"]) => Ok(routes::version_info()),

        (Method::GET, ["access", asset_id]) => routes::handle_access(state, &caller, asset_id).await,

        (Method::GET, ["access", asset_id, action]) => {
            routes::handle_action(state, &caller, asset_id, action).await
        }

        (Method::POST, ["deliver", asset_id, slot]) => {
            routes::handle_deliver(state, &caller, asset_id, slot).await
        }

        (Method::GET, ["bundle", asset_id]) => routes::handle_bundle(state, &caller, asset_id).await,

        // Redemption of minted references; the token is the credential
        (Method::GET, ["files", token]) => routes::handle_redeem(state, token).await,

        (Method::POST, ["grants", asset_id, "temporary"]) => {
            routes::handle_grant_temporary(state, &caller, asset_id, req).await
        }

        (Method::POST, ["grants", grant_id, "revoke"]) => {
            routes::handle_revoke(state, &caller, grant_id, req).await
        }

        (Method::GET, ["grants", grant_id]) => {
            routes::handle_get_grant(state, &caller, grant_id).await
        }

        _ => Ok(not_found_response(&path)),
    };

    result.unwrap_or_else(|e| error_response(&e))
}
