//! Entitlement record store contract
//!
//! All cross-request coordination goes through these operations. Anything that
//! changes a counter or a status is a single guarded write in the backend; the
//! engine never reads a row, decides, and writes it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entitlement::model::{Asset, DownloadEvent, Grant, GrantStatus, Identity, Membership};
use crate::types::Result;

/// Durable storage of grants, memberships, assets and delivery records
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Membership for an identity, if any
    async fn get_membership(&self, identity: &Identity) -> Result<Option<Membership>>;

    /// The grant that speaks for (identity, asset) as of `now`
    async fn get_grant(
        &self,
        identity: &Identity,
        asset_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>>;

    async fn get_grant_by_id(&self, grant_id: &str) -> Result<Option<Grant>>;

    async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>>;

    /// Increment `downloads_used` by one only if the grant is active and
    /// `download_limit is null OR downloads_used < download_limit`.
    ///
    /// Returns the updated grant when the guard held, `None` otherwise.
    async fn conditional_increment(&self, grant_id: &str) -> Result<Option<Grant>>;

    /// Decrement `downloads_used` by one only if the grant is limited and the
    /// counter is above zero. Returns whether the write applied.
    async fn conditional_decrement(&self, grant_id: &str) -> Result<bool>;

    /// Set `last_download_at`, and `first_download_at` when still unset
    async fn record_download_times(&self, grant_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Append-only
    async fn insert_download_event(&self, event: &DownloadEvent) -> Result<()>;

    async fn insert_grant(&self, grant: Grant) -> Result<String>;

    /// Move a grant to `status` unless it is already revoked or refunded.
    /// Returns whether the write applied.
    async fn update_grant_status(
        &self,
        grant_id: &str,
        status: GrantStatus,
        reason: &str,
    ) -> Result<bool>;

    /// Cheap reachability probe for readiness checks
    async fn ping(&self) -> Result<()>;
}
