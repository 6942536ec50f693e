//! Turnstile - entitlement and secure delivery gateway

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use turnstile::{config::Args, logging::AuditLogger, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("turnstile={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Turnstile - Entitlement & Delivery");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Store: {:?}", args.store_backend);
    info!("Storage: {:?}", args.storage_backend);
    info!("Public URL: {}", args.public_url);
    info!("Reference TTL: {}s", args.reference_ttl_seconds);
    info!("======================================");

    let audit = AuditLogger::new(args.node_id.to_string());
    if let Some(path) = args.audit_log.clone() {
        audit.init_file(path).await?;
    }

    let state = match AppState::from_args(args, audit).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    server::run(state).await?;

    Ok(())
}
