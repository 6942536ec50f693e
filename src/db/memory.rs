//! In-memory entitlement store for development mode and tests
//!
//! Conditional updates run under the map's per-entry write guard, which plays
//! the role of a row lock. It is a single-process store: replicas must share
//! the MongoDB backend instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;

use super::store::EntitlementStore;
use crate::entitlement::model::{
    select_current_grant, Asset, DownloadEvent, Grant, GrantStatus, Identity, Membership,
};
use crate::types::{Result, TurnstileError};

/// DashMap-backed store
#[derive(Default)]
pub struct MemoryEntitlementStore {
    grants: DashMap<String, Grant>,
    memberships: DashMap<Identity, Membership>,
    assets: DashMap<String, Asset>,
    events: Mutex<Vec<DownloadEvent>>,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an asset (authoring happens elsewhere)
    pub fn put_asset(&self, asset: Asset) {
        self.assets.insert(asset.asset_id.clone(), asset);
    }

    pub fn put_membership(&self, membership: Membership) {
        self.memberships
            .insert(membership.identity.clone(), membership);
    }

    /// Insert or replace a grant as-is, bypassing lifecycle rules
    pub fn put_grant(&self, grant: Grant) {
        self.grants.insert(grant.grant_id.clone(), grant);
    }

    /// Snapshot of recorded download events
    pub fn download_events(&self) -> Vec<DownloadEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn get_membership(&self, identity: &Identity) -> Result<Option<Membership>> {
        Ok(self.memberships.get(identity).map(|m| m.clone()))
    }

    async fn get_grant(
        &self,
        identity: &Identity,
        asset_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>> {
        let grants: Vec<Grant> = self
            .grants
            .iter()
            .filter(|g| &g.identity == identity && g.asset_id == asset_id)
            .map(|g| g.clone())
            .collect();
        Ok(select_current_grant(grants, now))
    }

    async fn get_grant_by_id(&self, grant_id: &str) -> Result<Option<Grant>> {
        Ok(self.grants.get(grant_id).map(|g| g.clone()))
    }

    async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>> {
        Ok(self.assets.get(asset_id).map(|a| a.clone()))
    }

    async fn conditional_increment(&self, grant_id: &str) -> Result<Option<Grant>> {
        let Some(mut grant) = self.grants.get_mut(grant_id) else {
            return Ok(None);
        };
        let below_limit = grant
            .download_limit
            .map_or(true, |limit| grant.downloads_used < limit);
        if grant.status != GrantStatus::Active || !below_limit {
            return Ok(None);
        }
        grant.downloads_used += 1;
        Ok(Some(grant.clone()))
    }

    async fn conditional_decrement(&self, grant_id: &str) -> Result<bool> {
        let Some(mut grant) = self.grants.get_mut(grant_id) else {
            return Ok(false);
        };
        if grant.download_limit.is_none() || grant.downloads_used == 0 {
            return Ok(false);
        }
        grant.downloads_used -= 1;
        Ok(true)
    }

    async fn record_download_times(&self, grant_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut grant = self
            .grants
            .get_mut(grant_id)
            .ok_or_else(|| TurnstileError::NotFound(format!("grant {}", grant_id)))?;
        grant.first_download_at.get_or_insert(at);
        grant.last_download_at = Some(at);
        Ok(())
    }

    async fn insert_download_event(&self, event: &DownloadEvent) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| TurnstileError::Internal("download event log poisoned".into()))?;
        events.push(event.clone());
        Ok(())
    }

    async fn insert_grant(&self, grant: Grant) -> Result<String> {
        let grant_id = grant.grant_id.clone();
        if self.grants.contains_key(&grant_id) {
            return Err(TurnstileError::InvalidState(format!(
                "grant {} already exists",
                grant_id
            )));
        }
        self.grants.insert(grant_id.clone(), grant);
        Ok(grant_id)
    }

    async fn update_grant_status(
        &self,
        grant_id: &str,
        status: GrantStatus,
        reason: &str,
    ) -> Result<bool> {
        let Some(mut grant) = self.grants.get_mut(grant_id) else {
            return Ok(false);
        };
        if grant.status.is_terminal() {
            return Ok(false);
        }
        grant.status = status;
        grant.status_reason = Some(reason.to_string());
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
