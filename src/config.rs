//! Configuration for Turnstile
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::delivery::bundle::MAX_CONCURRENCY;

/// Where grants, memberships and assets live
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Mongo,
    /// Process-local maps; dev mode only
    Memory,
}

/// Where backing files live
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    Local,
    Http,
}

/// Turnstile - entitlement checks and secure delivery for purchasable workflows
#[derive(Parser, Debug, Clone)]
#[command(name = "turnstile")]
#[command(about = "Entitlement and secure delivery gateway for purchasable workflows")]
pub struct Args {
    /// Unique node identifier, stamped on audit events
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8090")]
    pub listen: SocketAddr,

    /// Enable development mode (built-in secrets, in-memory store allowed)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Entitlement store backend
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "mongo")]
    pub store_backend: StoreBackend,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "turnstile")]
    pub mongodb_db: String,

    /// Secret for verifying caller JWTs (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Lifetime of tokens issued by tooling
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Static admin key accepted in X-API-Key
    #[arg(long, env = "API_KEY_ADMIN")]
    pub api_key_admin: Option<String>,

    /// Object storage backend
    #[arg(long, env = "STORAGE_BACKEND", value_enum, default_value = "local")]
    pub storage_backend: StorageBackend,

    /// Root directory for the local backend
    #[arg(long, env = "STORAGE_DIR", default_value = "./storage")]
    pub storage_dir: PathBuf,

    /// Base URL of the storage sidecar for the http backend
    #[arg(long, env = "STORAGE_URL")]
    pub storage_url: Option<String>,

    /// Externally reachable base URL used in minted references
    #[arg(long, env = "PUBLIC_URL", default_value = "http://localhost:8090")]
    pub public_url: String,

    /// Secret for signing retrieval references (required in production)
    #[arg(long, env = "SIGNING_SECRET")]
    pub signing_secret: Option<String>,

    /// Validity window of minted references
    #[arg(long, env = "REFERENCE_TTL_SECONDS", default_value = "3600")]
    pub reference_ttl_seconds: u64,

    /// Default download limit for promotional grants (unset = unlimited)
    #[arg(long, env = "PROMO_DOWNLOAD_LIMIT")]
    pub promo_download_limit: Option<u32>,

    /// Parallel slot fetches while composing a bundle (clamped to 1..=4)
    #[arg(long, env = "BUNDLE_CONCURRENCY", default_value = "4")]
    pub bundle_concurrency: usize,

    /// Pause before the single retry of a failed entitlement read
    #[arg(long, env = "READ_RETRY_BACKOFF_MS", default_value = "100")]
    pub read_retry_backoff_ms: u64,

    /// Append audit events to this JSONL file
    #[arg(long, env = "AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,
}

impl Args {
    pub fn reference_ttl(&self) -> Duration {
        Duration::from_secs(self.reference_ttl_seconds)
    }

    pub fn read_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.read_retry_backoff_ms)
    }

    pub fn bundle_concurrency(&self) -> usize {
        self.bundle_concurrency.clamp(1, MAX_CONCURRENCY)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.jwt_secret.is_none() {
                return Err("JWT_SECRET is required in production mode".to_string());
            }
            if self.signing_secret.is_none() {
                return Err("SIGNING_SECRET is required in production mode".to_string());
            }
            if self.store_backend == StoreBackend::Memory {
                return Err("STORE_BACKEND=memory is only allowed in dev mode".to_string());
            }
        }

        if self.storage_backend == StorageBackend::Http && self.storage_url.is_none() {
            return Err("STORAGE_URL is required for STORAGE_BACKEND=http".to_string());
        }

        if self.reference_ttl_seconds == 0 {
            return Err("REFERENCE_TTL_SECONDS must be greater than zero".to_string());
        }

        Ok(())
    }
}
