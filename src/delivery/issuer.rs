//! Secure delivery issuer
//!
//! Sequence per request: revalidate the grant, reserve one download unit
//! (purchases only), resolve the slot's backing file, mint a signed
//! reference, then record the delivery. Any failure after a successful
//! reservation and before the delivery is recorded releases the unit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::bundle::{Bundle, BundleComposer};
use crate::entitlement::model::{DownloadEvent, Identity, SlotName};
use crate::entitlement::{AccessEvaluator, QuotaLedger};
use crate::logging::{AuditEventType, AuditLogger};
use crate::storage::ObjectStore;
use crate::types::{Result, TurnstileError};

/// Default validity window of a minted reference
pub const DEFAULT_REFERENCE_TTL: Duration = Duration::from_secs(3600);

/// What the caller receives for a successful single-file delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalReference {
    pub reference_url: String,
    pub expires_at: DateTime<Utc>,
}

pub struct DeliveryIssuer {
    evaluator: Arc<AccessEvaluator>,
    ledger: Arc<QuotaLedger>,
    objects: Arc<dyn ObjectStore>,
    composer: Arc<BundleComposer>,
    audit: AuditLogger,
    ttl: Duration,
}

impl DeliveryIssuer {
    pub fn new(
        evaluator: Arc<AccessEvaluator>,
        ledger: Arc<QuotaLedger>,
        objects: Arc<dyn ObjectStore>,
        composer: Arc<BundleComposer>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            evaluator,
            ledger,
            objects,
            composer,
            audit,
            ttl: DEFAULT_REFERENCE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a retrieval reference for one file slot.
    ///
    /// `grant_id` is the grant the caller was authorized against, if any. A
    /// different grant speaking for the pair by now is treated as invalid.
    pub async fn issue(
        &self,
        identity: Option<&Identity>,
        grant_id: Option<&str>,
        asset_id: &str,
        slot: SlotName,
    ) -> Result<RetrievalReference> {
        let identity = identity.ok_or(TurnstileError::Unauthenticated)?;
        let charge = self.revalidate(identity, grant_id, asset_id).await?;
        self.reserve(charge.as_deref()).await?;

        match self.deliver(identity, charge.as_deref(), asset_id, slot).await {
            Ok(reference) => Ok(reference),
            Err(e) => {
                self.compensate(charge.as_deref(), identity, asset_id, &e).await;
                Err(e)
            }
        }
    }

    /// Compose the whole-asset archive for an entitled caller.
    ///
    /// Charges one download unit for the bundle and records one delivery per
    /// included slot.
    pub async fn issue_bundle(&self, identity: Option<&Identity>, asset_id: &str) -> Result<Bundle> {
        let identity = identity.ok_or(TurnstileError::Unauthenticated)?;
        let charge = self.revalidate(identity, None, asset_id).await?;
        self.reserve(charge.as_deref()).await?;

        let outcome = async {
            let bundle = self.composer.compose_archive(asset_id).await?;
            let now = Utc::now();
            for entry in &bundle.entries {
                self.record(identity, charge.as_deref(), asset_id, entry.slot, now)
                    .await?;
            }
            Ok::<_, TurnstileError>(bundle)
        }
        .await;

        match outcome {
            Ok(bundle) => {
                self.touch(charge.as_deref()).await;
                self.audit
                    .log(
                        self.audit
                            .event(AuditEventType::DownloadIssued)
                            .with_identity(identity)
                            .with_asset(asset_id)
                            .with_reason(&format!("bundle of {} files", bundle.entries.len())),
                    )
                    .await;
                Ok(bundle)
            }
            Err(e) => {
                self.compensate(charge.as_deref(), identity, asset_id, &e).await;
                Err(e)
            }
        }
    }

    /// Fresh evaluation at issuance time. Returns the grant to charge, or
    /// `None` for membership-derived access.
    async fn revalidate(
        &self,
        identity: &Identity,
        grant_id: Option<&str>,
        asset_id: &str,
    ) -> Result<Option<String>> {
        let decision = self
            .evaluator
            .evaluate_with_retry(Some(identity), asset_id)
            .await?;

        if !(decision.has_access && decision.can_download) {
            return Err(match decision.first_restriction() {
                Some(restriction) => restriction.clone().into_error(),
                None => TurnstileError::Denied("download not permitted".into()),
            });
        }

        match (decision.grant_id, grant_id) {
            (Some(current), Some(expected)) if current != expected => {
                Err(TurnstileError::GrantInvalid(
                    "grant is no longer current for this asset".into(),
                ))
            }
            (current, _) => Ok(current),
        }
    }

    async fn reserve(&self, charge: Option<&str>) -> Result<()> {
        let Some(grant_id) = charge else {
            return Ok(());
        };
        let reservation = self.ledger.reserve(grant_id).await?;
        if reservation.ok {
            return Ok(());
        }
        Err(self.ledger.refusal(grant_id).await?)
    }

    async fn deliver(
        &self,
        identity: &Identity,
        charge: Option<&str>,
        asset_id: &str,
        slot: SlotName,
    ) -> Result<RetrievalReference> {
        let asset = self
            .evaluator
            .store()
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| TurnstileError::NotFound(format!("asset {}", asset_id)))?;
        let file_ref = asset.binding(slot).ok_or_else(|| {
            TurnstileError::NotFound(format!("asset {} has no {} file", asset_id, slot))
        })?;
        if !self.objects.exists(file_ref).await? {
            return Err(TurnstileError::NotFound(format!(
                "{} file for asset {} is missing from storage",
                slot, asset_id
            )));
        }

        // Signing is local; the reference is only handed out once recorded
        let signed = self.objects.mint_signed_url(file_ref, self.ttl)?;
        let now = Utc::now();
        self.record(identity, charge, asset_id, slot, now).await?;
        self.touch(charge).await;

        info!(%identity, asset_id, %slot, reference_id = %signed.reference_id, "download issued");
        self.audit
            .log(
                self.audit
                    .event(AuditEventType::DownloadIssued)
                    .with_identity(identity)
                    .with_asset(asset_id)
                    .with_slot(slot)
                    .with_expiry(signed.expires_at),
            )
            .await;

        Ok(RetrievalReference {
            reference_url: signed.url,
            expires_at: signed.expires_at,
        })
    }

    async fn record(
        &self,
        identity: &Identity,
        charge: Option<&str>,
        asset_id: &str,
        slot: SlotName,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let event = DownloadEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            identity: identity.clone(),
            asset_id: asset_id.to_string(),
            grant_id: charge.map(str::to_string),
            slot,
            downloaded_at: at,
        };
        self.evaluator.store().insert_download_event(&event).await
    }

    /// Stamp download times; a failure here does not undo the delivery
    async fn touch(&self, charge: Option<&str>) {
        let Some(grant_id) = charge else {
            return;
        };
        if let Err(e) = self
            .evaluator
            .store()
            .record_download_times(grant_id, Utc::now())
            .await
        {
            warn!(grant_id, error = %e, "failed to record download times");
        }
    }

    async fn compensate(
        &self,
        charge: Option<&str>,
        identity: &Identity,
        asset_id: &str,
        cause: &TurnstileError,
    ) {
        let Some(grant_id) = charge else {
            return;
        };
        let reason = format!("delivery failed: {}", cause.code());
        if let Err(e) = self
            .ledger
            .release(grant_id, identity, asset_id, &reason)
            .await
        {
            // Not retried; the unit stays consumed until support releases it
            error!(grant_id, error = %e, "failed to release reserved download unit");
        }
    }
}
