//! Access evaluator
//!
//! Rebuilds an `AccessDecision` from stored membership and grant state on
//! every call. Nothing is cached, so a committed revocation is visible to the
//! next evaluation.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::model::{AccessDecision, Identity};
use super::policy::{self, Facts};
use crate::db::EntitlementStore;
use crate::types::{Result, TurnstileError};

/// Default pause before the single read retry
pub const DEFAULT_READ_RETRY_BACKOFF: Duration = Duration::from_millis(100);

pub struct AccessEvaluator {
    store: Arc<dyn EntitlementStore>,
    retry_backoff: Duration,
}

impl AccessEvaluator {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self {
            store,
            retry_backoff: DEFAULT_READ_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn store(&self) -> &Arc<dyn EntitlementStore> {
        &self.store
    }

    pub async fn evaluate(
        &self,
        identity: Option<&Identity>,
        asset_id: &str,
    ) -> Result<AccessDecision> {
        self.evaluate_at(identity, asset_id, Utc::now()).await
    }

    /// Evaluate as of `now`.
    ///
    /// Storage is never consulted without an identity, and the grant is only
    /// read when membership does not already settle the decision.
    pub async fn evaluate_at(
        &self,
        identity: Option<&Identity>,
        asset_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision> {
        let Some(identity) = identity else {
            return policy::decide(&Facts {
                authenticated: false,
                membership: None,
                grant: None,
                now,
            });
        };

        let membership = self.store.get_membership(identity).await?;
        let supersedes = membership
            .as_ref()
            .is_some_and(|m| m.unlocks_everything_at(now));

        let grant = if supersedes {
            None
        } else {
            self.store.get_grant(identity, asset_id, now).await?
        };

        let decision = policy::decide(&Facts {
            authenticated: true,
            membership: membership.as_ref(),
            grant: grant.as_ref(),
            now,
        })
        .inspect_err(|e| {
            if let TurnstileError::InvalidState(detail) = e {
                tracing::error!(%identity, asset_id, detail = %detail, "entitlement integrity violation");
            }
        })?;

        debug!(
            %identity,
            asset_id,
            has_access = decision.has_access,
            can_download = decision.can_download,
            tier = ?decision.tier,
            "access evaluated"
        );
        Ok(decision)
    }

    /// `evaluate`, retried once after a backoff when the store is unavailable.
    ///
    /// Only reads go through here; writes are never retried.
    pub async fn evaluate_with_retry(
        &self,
        identity: Option<&Identity>,
        asset_id: &str,
    ) -> Result<AccessDecision> {
        match self.evaluate(identity, asset_id).await {
            Err(TurnstileError::StoreUnavailable(detail)) => {
                warn!(asset_id, detail = %detail, "entitlement store unavailable, retrying read once");
                tokio::time::sleep(self.retry_backoff).await;
                self.evaluate(identity, asset_id).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryEntitlementStore;
    use crate::entitlement::model::{
        Grant, GrantKind, GrantStatus, Membership, MembershipStatus, Restriction, Tier,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Arc<MemoryEntitlementStore>, AccessEvaluator) {
        let store = Arc::new(MemoryEntitlementStore::new());
        let evaluator = AccessEvaluator::new(store.clone());
        (store, evaluator)
    }

    #[tokio::test]
    async fn test_anonymous_caller_needs_authentication() {
        let (_, evaluator) = setup();
        let decision = evaluator.evaluate(None, "a1").await.unwrap();
        assert!(!decision.has_access);
        assert_eq!(
            decision.first_restriction(),
            Some(&Restriction::AuthenticationRequired)
        );
    }

    #[tokio::test]
    async fn test_membership_unlocks_unpurchased_assets() {
        let (store, evaluator) = setup();
        let user = Identity::new("member-1");
        store.put_membership(Membership::new(user.clone(), MembershipStatus::Active, true));

        for asset in ["a1", "a2", "never-bought"] {
            let decision = evaluator.evaluate(Some(&user), asset).await.unwrap();
            assert!(decision.has_access);
            assert_eq!(decision.tier, Tier::Member);
            assert_eq!(decision.downloads_remaining, None);
        }
    }

    #[tokio::test]
    async fn test_revoked_grant_denied_even_with_future_expiry() {
        let (store, evaluator) = setup();
        let user = Identity::new("u1");
        store.put_grant(
            Grant::new(user.clone(), "a1", GrantKind::Standalone, Utc::now())
                .with_status(GrantStatus::Revoked)
                .with_expiry(Utc::now() + chrono::Duration::days(90)),
        );

        let decision = evaluator.evaluate(Some(&user), "a1").await.unwrap();
        assert!(!decision.has_access);
        assert_eq!(decision.first_restriction(), Some(&Restriction::Revoked));
    }

    #[tokio::test]
    async fn test_integrity_violation_surfaces() {
        let (store, evaluator) = setup();
        let user = Identity::new("u1");
        store.put_grant(
            Grant::new(user.clone(), "a1", GrantKind::Standalone, Utc::now())
                .with_download_limit(1)
                .with_downloads_used(2),
        );
        assert!(matches!(
            evaluator.evaluate(Some(&user), "a1").await,
            Err(TurnstileError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_grant_selected_by_evaluation_clock() {
        let (store, evaluator) = setup();
        let user = Identity::new("u1");
        let now = Utc::now();
        store.put_grant(Grant::new(
            user.clone(),
            "a1",
            GrantKind::Standalone,
            now - chrono::Duration::days(30),
        ));
        store.put_grant(
            Grant::new(user.clone(), "a1", GrantKind::Promotional, now - chrono::Duration::days(1))
                .with_expiry(now + chrono::Duration::days(5)),
        );

        let later = now + chrono::Duration::days(10);
        let decision = evaluator.evaluate_at(Some(&user), "a1", later).await.unwrap();
        assert!(decision.has_access);
        assert!(decision.can_download);
    }

    /// Fails the first `failures` membership reads
    struct Flaky {
        inner: MemoryEntitlementStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl EntitlementStore for Flaky {
        async fn get_membership(&self, identity: &Identity) -> Result<Option<Membership>> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TurnstileError::StoreUnavailable("timeout".into()));
            }
            self.inner.get_membership(identity).await
        }
        async fn get_grant(
            &self,
            i: &Identity,
            a: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<Grant>> {
            self.inner.get_grant(i, a, now).await
        }
        async fn get_grant_by_id(&self, id: &str) -> Result<Option<Grant>> {
            self.inner.get_grant_by_id(id).await
        }
        async fn get_asset(&self, id: &str) -> Result<Option<crate::entitlement::model::Asset>> {
            self.inner.get_asset(id).await
        }
        async fn conditional_increment(&self, id: &str) -> Result<Option<Grant>> {
            self.inner.conditional_increment(id).await
        }
        async fn conditional_decrement(&self, id: &str) -> Result<bool> {
            self.inner.conditional_decrement(id).await
        }
        async fn record_download_times(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
            self.inner.record_download_times(id, at).await
        }
        async fn insert_download_event(
            &self,
            e: &crate::entitlement::model::DownloadEvent,
        ) -> Result<()> {
            self.inner.insert_download_event(e).await
        }
        async fn insert_grant(&self, g: Grant) -> Result<String> {
            self.inner.insert_grant(g).await
        }
        async fn update_grant_status(&self, id: &str, s: GrantStatus, r: &str) -> Result<bool> {
            self.inner.update_grant_status(id, s, r).await
        }
        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }
    }

    fn flaky(failures: usize) -> AccessEvaluator {
        AccessEvaluator::new(Arc::new(Flaky {
            inner: MemoryEntitlementStore::new(),
            failures: AtomicUsize::new(failures),
        }))
        .with_retry_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_read_retried_once() {
        let user = Identity::new("u1");
        let decision = flaky(1).evaluate_with_retry(Some(&user), "a1").await.unwrap();
        assert_eq!(
            decision.first_restriction(),
            Some(&Restriction::PurchaseRequired)
        );
    }

    #[tokio::test]
    async fn test_persistent_outage_is_not_a_denial() {
        let user = Identity::new("u1");
        assert!(matches!(
            flaky(2).evaluate_with_retry(Some(&user), "a1").await,
            Err(TurnstileError::StoreUnavailable(_))
        ));
    }
}
