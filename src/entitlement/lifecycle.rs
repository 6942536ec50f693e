//! Grant lifecycle manager
//!
//! Promotional grants are created here; revocation and refunds are one-way
//! transitions. There is no un-revoke: restoring access means a new grant.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;

use super::model::{Grant, GrantKind, GrantStatus, Identity};
use crate::db::EntitlementStore;
use crate::logging::{AuditEventType, AuditLogger};
use crate::types::{Result, TurnstileError};

/// Longest promotional window accepted
pub const MAX_TEMPORARY_DAYS: u32 = 3650;

pub struct GrantLifecycle {
    store: Arc<dyn EntitlementStore>,
    audit: AuditLogger,
    /// Default `download_limit` for promotional grants
    promo_download_limit: Option<u32>,
}

impl GrantLifecycle {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        audit: AuditLogger,
        promo_download_limit: Option<u32>,
    ) -> Self {
        Self {
            store,
            audit,
            promo_download_limit,
        }
    }

    /// Create an active promotional grant expiring `duration_days` from now.
    ///
    /// `download_limit` overrides the configured default.
    pub async fn grant_temporary(
        &self,
        identity: &Identity,
        asset_id: &str,
        duration_days: u32,
        reason: &str,
        download_limit: Option<u32>,
    ) -> Result<String> {
        self.grant_temporary_at(identity, asset_id, duration_days, reason, download_limit, Utc::now())
            .await
    }

    pub async fn grant_temporary_at(
        &self,
        identity: &Identity,
        asset_id: &str,
        duration_days: u32,
        reason: &str,
        download_limit: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        if identity.as_str().is_empty() {
            return Err(TurnstileError::BadRequest("identity is required".into()));
        }
        if duration_days == 0 || duration_days > MAX_TEMPORARY_DAYS {
            return Err(TurnstileError::BadRequest(format!(
                "durationDays must be between 1 and {}",
                MAX_TEMPORARY_DAYS
            )));
        }
        if reason.trim().is_empty() {
            return Err(TurnstileError::BadRequest("reason is required".into()));
        }
        if self.store.get_asset(asset_id).await?.is_none() {
            return Err(TurnstileError::NotFound(format!("asset {}", asset_id)));
        }

        let expires_at = now + Duration::days(i64::from(duration_days));
        let mut grant = Grant::new(identity.clone(), asset_id, GrantKind::Promotional, now)
            .with_expiry(expires_at)
            .with_reason(reason);
        if let Some(limit) = download_limit.or(self.promo_download_limit) {
            grant = grant.with_download_limit(limit);
        }

        let grant_id = self.store.insert_grant(grant).await?;
        info!(%identity, asset_id, grant_id = %grant_id, duration_days, "temporary grant created");

        self.audit
            .log(
                self.audit
                    .event(AuditEventType::GrantCreated)
                    .with_identity(identity)
                    .with_asset(asset_id)
                    .with_grant(&grant_id)
                    .with_reason(reason)
                    .with_expiry(expires_at),
            )
            .await;

        Ok(grant_id)
    }

    /// Move a grant to `revoked`, or `refunded` for payment reversals.
    ///
    /// Idempotent: a grant that is already revoked or refunded is left as it
    /// is and its current status returned without error.
    pub async fn revoke(&self, grant_id: &str, reason: &str, refund: bool) -> Result<GrantStatus> {
        let target = if refund {
            GrantStatus::Refunded
        } else {
            GrantStatus::Revoked
        };

        if self
            .store
            .update_grant_status(grant_id, target, reason)
            .await?
        {
            info!(grant_id, status = %target, reason, "grant revoked");
            let event_type = if refund {
                AuditEventType::GrantRefunded
            } else {
                AuditEventType::GrantRevoked
            };
            let mut event = self
                .audit
                .event(event_type)
                .with_grant(grant_id)
                .with_reason(reason);
            if let Some(grant) = self.store.get_grant_by_id(grant_id).await.ok().flatten() {
                event = event
                    .with_identity(&grant.identity)
                    .with_asset(&grant.asset_id);
            }
            self.audit.log(event).await;
            return Ok(target);
        }

        let grant = self
            .store
            .get_grant_by_id(grant_id)
            .await?
            .ok_or_else(|| TurnstileError::NotFound(format!("grant {}", grant_id)))?;
        if grant.status.is_terminal() {
            info!(grant_id, status = %grant.status, "grant already terminal, nothing to do");
            return Ok(grant.status);
        }
        Err(TurnstileError::InvalidState(format!(
            "status update for grant {} did not apply while it is {}",
            grant_id, grant.status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryEntitlementStore;
    use crate::entitlement::model::Asset;

    fn lifecycle(promo_limit: Option<u32>) -> (Arc<MemoryEntitlementStore>, GrantLifecycle) {
        let store = Arc::new(MemoryEntitlementStore::new());
        store.put_asset(Asset::new("a1", "client-intake"));
        let lifecycle = GrantLifecycle::new(store.clone(), AuditLogger::new("test".into()), promo_limit);
        (store, lifecycle)
    }

    #[tokio::test]
    async fn test_temporary_grant_shape() {
        let (store, lifecycle) = lifecycle(Some(5));
        let now = Utc::now();
        let user = Identity::new("u1");
        let id = lifecycle
            .grant_temporary_at(&user, "a1", 14, "webinar attendee", None, now)
            .await
            .unwrap();

        let grant = store.get_grant_by_id(&id).await.unwrap().unwrap();
        assert_eq!(grant.kind, GrantKind::Promotional);
        assert_eq!(grant.status, GrantStatus::Active);
        assert_eq!(grant.expires_at, Some(now + Duration::days(14)));
        assert_eq!(grant.download_limit, Some(5));
        assert_eq!(grant.status_reason.as_deref(), Some("webinar attendee"));
    }

    #[tokio::test]
    async fn test_explicit_limit_overrides_default() {
        let (store, lifecycle) = lifecycle(Some(5));
        let id = lifecycle
            .grant_temporary(&Identity::new("u1"), "a1", 1, "support", Some(1))
            .await
            .unwrap();
        let grant = store.get_grant_by_id(&id).await.unwrap().unwrap();
        assert_eq!(grant.download_limit, Some(1));
    }

    #[tokio::test]
    async fn test_temporary_grant_validation() {
        let (_, lifecycle) = lifecycle(None);
        let user = Identity::new("u1");
        assert!(matches!(
            lifecycle.grant_temporary(&user, "a1", 0, "x", None).await,
            Err(TurnstileError::BadRequest(_))
        ));
        assert!(matches!(
            lifecycle.grant_temporary(&user, "a1", 3, " ", None).await,
            Err(TurnstileError::BadRequest(_))
        ));
        assert!(matches!(
            lifecycle.grant_temporary(&user, "nope", 3, "x", None).await,
            Err(TurnstileError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refund_then_revoke_keeps_refund() {
        let (_, lifecycle) = lifecycle(None);
        let id = lifecycle
            .grant_temporary(&Identity::new("u1"), "a1", 7, "promo", None)
            .await
            .unwrap();

        assert_eq!(
            lifecycle.revoke(&id, "chargeback", true).await.unwrap(),
            GrantStatus::Refunded
        );
        assert_eq!(
            lifecycle.revoke(&id, "abuse", false).await.unwrap(),
            GrantStatus::Refunded
        );
    }

    #[tokio::test]
    async fn test_revoke_unknown_grant() {
        let (_, lifecycle) = lifecycle(None);
        assert!(matches!(
            lifecycle.revoke("missing", "x", false).await,
            Err(TurnstileError::NotFound(_))
        ));
    }
}
