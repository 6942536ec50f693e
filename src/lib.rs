//! Turnstile - entitlement checks and secure delivery for purchasable workflows
//!
//! Turnstile decides whether an identity may view, download, share or review a
//! paid asset, and hands out short-lived retrieval references for its files.
//!
//! ## Components
//!
//! - **Entitlement**: access evaluation, action authorization, quota ledger, grant lifecycle
//! - **Delivery**: per-file reference issuance and streamed bundle archives
//! - **Storage**: object stores and signed retrieval references
//! - **Db**: entitlement record store (MongoDB, in-memory)

pub mod auth;
pub mod config;
pub mod db;
pub mod delivery;
pub mod entitlement;
pub mod logging;
pub mod routes;
pub mod server;
pub mod storage;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, TurnstileError};
