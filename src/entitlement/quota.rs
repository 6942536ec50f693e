//! Quota ledger
//!
//! Reservation is the store's guarded increment and nothing else: no read
//! precedes it, so its answer is authoritative. Any earlier "downloads
//! remaining" figure is advisory.

use std::sync::Arc;
use tracing::{debug, info};

use super::model::{GrantStatus, Identity, Restriction};
use crate::db::EntitlementStore;
use crate::logging::{AuditEventType, AuditLogger};
use crate::types::{Result, TurnstileError};

/// Outcome of a reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub ok: bool,
    /// Downloads left after this attempt; `None` when unlimited
    pub remaining: Option<u32>,
}

pub struct QuotaLedger {
    store: Arc<dyn EntitlementStore>,
    audit: AuditLogger,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn EntitlementStore>, audit: AuditLogger) -> Self {
        Self { store, audit }
    }

    /// Consume one download unit if the grant is active and has one left
    pub async fn reserve(&self, grant_id: &str) -> Result<Reservation> {
        if let Some(grant) = self.store.conditional_increment(grant_id).await? {
            grant.check_integrity()?;
            debug!(grant_id, remaining = ?grant.downloads_remaining(), "download unit reserved");
            return Ok(Reservation {
                ok: true,
                remaining: grant.downloads_remaining(),
            });
        }

        // The guard refused; read back only to report the remainder
        let grant = self
            .store
            .get_grant_by_id(grant_id)
            .await?
            .ok_or_else(|| TurnstileError::NotFound(format!("grant {}", grant_id)))?;
        grant.check_integrity()?;
        Ok(Reservation {
            ok: false,
            remaining: grant.downloads_remaining(),
        })
    }

    /// Explain why a reservation was refused
    pub async fn refusal(&self, grant_id: &str) -> Result<TurnstileError> {
        let grant = self
            .store
            .get_grant_by_id(grant_id)
            .await?
            .ok_or_else(|| TurnstileError::NotFound(format!("grant {}", grant_id)))?;
        let restriction = match grant.status {
            GrantStatus::Revoked => Restriction::Revoked,
            GrantStatus::Refunded => Restriction::Refunded,
            GrantStatus::Expired => Restriction::Expired {
                at: grant.expires_at.unwrap_or(grant.granted_at),
            },
            GrantStatus::Active => Restriction::DownloadLimitReached {
                limit: grant.download_limit.unwrap_or(grant.downloads_used),
            },
        };
        Ok(restriction.into_error())
    }

    /// Give back a unit after a definite delivery failure.
    ///
    /// Never decrements below zero; a no-op for unlimited grants. Returns
    /// whether a unit was restored.
    pub async fn release(
        &self,
        grant_id: &str,
        identity: &Identity,
        asset_id: &str,
        reason: &str,
    ) -> Result<bool> {
        let restored = self.store.conditional_decrement(grant_id).await?;
        if restored {
            info!(grant_id, reason, "download unit released");
            self.audit
                .log(
                    self.audit
                        .event(AuditEventType::QuotaReleased)
                        .with_identity(identity)
                        .with_asset(asset_id)
                        .with_grant(grant_id)
                        .with_reason(reason),
                )
                .await;
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryEntitlementStore;
    use crate::entitlement::model::{Grant, GrantKind};
    use chrono::Utc;

    fn ledger_with(grant: Grant) -> (Arc<MemoryEntitlementStore>, QuotaLedger, String) {
        let store = Arc::new(MemoryEntitlementStore::new());
        let id = grant.grant_id.clone();
        store.put_grant(grant);
        let ledger = QuotaLedger::new(store.clone(), AuditLogger::new("test".into()));
        (store, ledger, id)
    }

    fn grant() -> Grant {
        Grant::new("u1".into(), "a1", GrantKind::Standalone, Utc::now())
    }

    #[tokio::test]
    async fn test_reserve_until_exhausted() {
        let (_, ledger, id) = ledger_with(grant().with_download_limit(2));
        assert_eq!(
            ledger.reserve(&id).await.unwrap(),
            Reservation { ok: true, remaining: Some(1) }
        );
        assert_eq!(
            ledger.reserve(&id).await.unwrap(),
            Reservation { ok: true, remaining: Some(0) }
        );
        assert_eq!(
            ledger.reserve(&id).await.unwrap(),
            Reservation { ok: false, remaining: Some(0) }
        );
        assert!(matches!(
            ledger.refusal(&id).await.unwrap(),
            TurnstileError::QuotaExhausted(_)
        ));
    }

    #[tokio::test]
    async fn test_unlimited_reserve_and_release() {
        let (store, ledger, id) = ledger_with(grant());
        let r = ledger.reserve(&id).await.unwrap();
        assert!(r.ok);
        assert_eq!(r.remaining, None);

        let user = Identity::new("u1");
        assert!(!ledger.release(&id, &user, "a1", "missing file").await.unwrap());
        assert_eq!(store.get_grant_by_id(&id).await.unwrap().unwrap().downloads_used, 1);
    }

    #[tokio::test]
    async fn test_release_restores_unit() {
        let (store, ledger, id) = ledger_with(grant().with_download_limit(1));
        assert!(ledger.reserve(&id).await.unwrap().ok);

        let user = Identity::new("u1");
        assert!(ledger.release(&id, &user, "a1", "missing file").await.unwrap());
        assert!(!ledger.release(&id, &user, "a1", "missing file").await.unwrap());
        assert_eq!(store.get_grant_by_id(&id).await.unwrap().unwrap().downloads_used, 0);
    }

    #[tokio::test]
    async fn test_revoked_grant_refuses_with_grant_invalid() {
        let (_, ledger, id) = ledger_with(grant().with_status(GrantStatus::Revoked));
        assert!(!ledger.reserve(&id).await.unwrap().ok);
        assert!(matches!(
            ledger.refusal(&id).await.unwrap(),
            TurnstileError::GrantInvalid(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_grant() {
        let store = Arc::new(MemoryEntitlementStore::new());
        let ledger = QuotaLedger::new(store, AuditLogger::new("test".into()));
        assert!(matches!(
            ledger.reserve("missing").await,
            Err(TurnstileError::NotFound(_))
        ));
    }
}
