//! MongoDB-backed entitlement store
//!
//! Every counter and status change is one filtered update. The filter carries
//! the guard, so two replicas racing on the same grant cannot both pass it.

use async_trait::async_trait;
use bson::{doc, DateTime as BsonDateTime};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::mongo::{MongoClient, MongoCollection};
use super::schemas::{
    AssetDoc, DownloadEventDoc, GrantDoc, MembershipDoc, ASSET_COLLECTION,
    DOWNLOAD_EVENT_COLLECTION, GRANT_COLLECTION, MEMBERSHIP_COLLECTION,
};
use super::store::EntitlementStore;
use crate::entitlement::model::{
    select_current_grant, Asset, DownloadEvent, Grant, GrantStatus, Identity, Membership,
};
use crate::types::{Result, TurnstileError};

/// Entitlement store over four MongoDB collections
pub struct MongoEntitlementStore {
    client: MongoClient,
    grants: MongoCollection<GrantDoc>,
    memberships: MongoCollection<MembershipDoc>,
    assets: MongoCollection<AssetDoc>,
    events: MongoCollection<DownloadEventDoc>,
}

impl MongoEntitlementStore {
    /// Open the collections once and apply their indexes
    pub async fn new(client: MongoClient) -> Result<Self> {
        Ok(Self {
            grants: client.collection(GRANT_COLLECTION).await?,
            memberships: client.collection(MEMBERSHIP_COLLECTION).await?,
            assets: client.collection(ASSET_COLLECTION).await?,
            events: client.collection(DOWNLOAD_EVENT_COLLECTION).await?,
            client,
        })
    }

    /// Seed a membership (normally written by the billing integration)
    pub async fn put_membership(&self, membership: Membership) -> Result<()> {
        self.memberships.insert_one(membership.into()).await
    }

    /// Seed an asset (normally authored elsewhere)
    pub async fn put_asset(&self, asset: Asset) -> Result<()> {
        self.assets.insert_one(asset.into()).await
    }
}

/// Filter matching grants a download may still be counted against
fn reservable(grant_id: &str) -> bson::Document {
    doc! {
        "grant_id": grant_id,
        "status": GrantStatus::Active.as_str(),
        "$or": [
            { "download_limit": null },
            { "$expr": { "$lt": ["$downloads_used", "$download_limit"] } },
        ],
    }
}

/// Filter matching grants whose counter may be given back
fn releasable(grant_id: &str) -> bson::Document {
    doc! {
        "grant_id": grant_id,
        "download_limit": { "$ne": null },
        "downloads_used": { "$gt": 0 },
    }
}

/// Filter matching grants that may still change status
fn mutable_status(grant_id: &str) -> bson::Document {
    doc! {
        "grant_id": grant_id,
        "status": {
            "$nin": [GrantStatus::Revoked.as_str(), GrantStatus::Refunded.as_str()],
        },
    }
}

#[async_trait]
impl EntitlementStore for MongoEntitlementStore {
    async fn get_membership(&self, identity: &Identity) -> Result<Option<Membership>> {
        self.memberships
            .find_one(doc! { "identity": identity.as_str() })
            .await?
            .map(Membership::try_from)
            .transpose()
    }

    async fn get_grant(
        &self,
        identity: &Identity,
        asset_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>> {
        let docs = self
            .grants
            .find_all(doc! { "identity": identity.as_str(), "asset_id": asset_id })
            .await?;
        let grants = docs
            .into_iter()
            .map(Grant::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(select_current_grant(grants, now))
    }

    async fn get_grant_by_id(&self, grant_id: &str) -> Result<Option<Grant>> {
        self.grants
            .find_one(doc! { "grant_id": grant_id })
            .await?
            .map(Grant::try_from)
            .transpose()
    }

    async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>> {
        Ok(self
            .assets
            .find_one(doc! { "asset_id": asset_id })
            .await?
            .map(Asset::from))
    }

    async fn conditional_increment(&self, grant_id: &str) -> Result<Option<Grant>> {
        let update = doc! {
            "$inc": { "downloads_used": 1 },
            "$set": { "metadata.updated_at": BsonDateTime::now() },
        };
        let updated = self
            .grants
            .find_one_and_update(reservable(grant_id), update)
            .await?;
        debug!(grant_id, applied = updated.is_some(), "conditional increment");
        updated.map(Grant::try_from).transpose()
    }

    async fn conditional_decrement(&self, grant_id: &str) -> Result<bool> {
        let update = doc! {
            "$inc": { "downloads_used": -1 },
            "$set": { "metadata.updated_at": BsonDateTime::now() },
        };
        let result = self.grants.update_one(releasable(grant_id), update).await?;
        Ok(result.modified_count == 1)
    }

    async fn record_download_times(&self, grant_id: &str, at: DateTime<Utc>) -> Result<()> {
        let at = BsonDateTime::from_chrono(at);
        let result = self
            .grants
            .update_one(
                doc! { "grant_id": grant_id },
                doc! { "$set": { "last_download_at": at, "metadata.updated_at": BsonDateTime::now() } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(TurnstileError::NotFound(format!("grant {}", grant_id)));
        }
        self.grants
            .update_one(
                doc! { "grant_id": grant_id, "first_download_at": null },
                doc! { "$set": { "first_download_at": at } },
            )
            .await?;
        Ok(())
    }

    async fn insert_download_event(&self, event: &DownloadEvent) -> Result<()> {
        self.events.insert_one(event.into()).await
    }

    async fn insert_grant(&self, grant: Grant) -> Result<String> {
        let grant_id = grant.grant_id.clone();
        self.grants.insert_one(grant.into()).await?;
        Ok(grant_id)
    }

    async fn update_grant_status(
        &self,
        grant_id: &str,
        status: GrantStatus,
        reason: &str,
    ) -> Result<bool> {
        let update = doc! {
            "$set": {
                "status": status.as_str(),
                "status_reason": reason,
                "metadata.updated_at": BsonDateTime::now(),
            }
        };
        let result = self
            .grants
            .update_one(mutable_status(grant_id), update)
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }
}
