//! Action authorizer
//!
//! Marketing visibility and sharing are deliberately open. Reviewing needs a
//! valid entitlement; downloading also needs quota.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::evaluator::AccessEvaluator;
use super::model::{AccessDecision, Identity, Restriction};
use crate::types::{Result, TurnstileError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Download,
    Share,
    Review,
}

/// What an action needs from the access decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Nothing,
    Entitlement,
    EntitlementWithQuota,
}

impl Action {
    pub fn requirement(self) -> Requirement {
        match self {
            Action::View | Action::Share => Requirement::Nothing,
            Action::Review => Requirement::Entitlement,
            Action::Download => Requirement::EntitlementWithQuota,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Download => "download",
            Action::Share => "share",
            Action::Review => "review",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = TurnstileError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "view" => Ok(Action::View),
            "download" => Ok(Action::Download),
            "share" => Ok(Action::Share),
            "review" => Ok(Action::Review),
            other => Err(TurnstileError::BadRequest(format!(
                "unknown action '{}'",
                other
            ))),
        }
    }
}

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Authorization {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Restriction behind a download denial
    #[serde(skip)]
    pub restriction: Option<Restriction>,
    /// Decision consulted, if the action needed one
    #[serde(skip)]
    pub decision: Option<AccessDecision>,
}

impl Authorization {
    fn allow(decision: Option<AccessDecision>) -> Self {
        Self {
            allowed: true,
            reason: None,
            restriction: None,
            decision,
        }
    }

    fn deny(reason: String, restriction: Option<Restriction>, decision: AccessDecision) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            restriction,
            decision: Some(decision),
        }
    }

    /// The error a delivery path should raise for this denial
    pub fn into_error(self) -> TurnstileError {
        match (self.restriction, self.reason) {
            (Some(restriction), _) => restriction.into_error(),
            (None, reason) => {
                TurnstileError::Denied(reason.unwrap_or_else(|| "not permitted".to_string()))
            }
        }
    }
}

pub struct ActionAuthorizer {
    evaluator: Arc<AccessEvaluator>,
}

impl ActionAuthorizer {
    pub fn new(evaluator: Arc<AccessEvaluator>) -> Self {
        Self { evaluator }
    }

    pub async fn authorize(
        &self,
        identity: Option<&Identity>,
        asset_id: &str,
        action: Action,
    ) -> Result<Authorization> {
        let requirement = action.requirement();
        if requirement == Requirement::Nothing {
            return Ok(Authorization::allow(None));
        }

        let decision = self
            .evaluator
            .evaluate_with_retry(identity, asset_id)
            .await?;

        Ok(match requirement {
            Requirement::Nothing => Authorization::allow(None),
            Requirement::Entitlement if decision.has_access => Authorization::allow(Some(decision)),
            Requirement::Entitlement => {
                let restriction = decision.first_restriction().cloned();
                Authorization::deny("only customers may review".to_string(), restriction, decision)
            }
            Requirement::EntitlementWithQuota if decision.has_access && decision.can_download => {
                Authorization::allow(Some(decision))
            }
            Requirement::EntitlementWithQuota => {
                let restriction = decision.first_restriction().cloned();
                let reason = restriction
                    .as_ref()
                    .map(Restriction::to_string)
                    .unwrap_or_else(|| "download not permitted".to_string());
                Authorization::deny(reason, restriction, decision)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryEntitlementStore;
    use crate::entitlement::model::{Grant, GrantKind};
    use chrono::Utc;

    fn authorizer(store: Arc<MemoryEntitlementStore>) -> ActionAuthorizer {
        ActionAuthorizer::new(Arc::new(AccessEvaluator::new(store)))
    }

    #[tokio::test]
    async fn test_view_and_share_need_nothing() {
        let auth = authorizer(Arc::new(MemoryEntitlementStore::new()));
        for action in [Action::View, Action::Share] {
            let result = auth.authorize(None, "a1", action).await.unwrap();
            assert!(result.allowed);
            assert!(result.decision.is_none());
        }
    }

    #[tokio::test]
    async fn test_review_without_purchase() {
        let auth = authorizer(Arc::new(MemoryEntitlementStore::new()));
        let user = Identity::new("u1");
        let result = auth.authorize(Some(&user), "a1", Action::Review).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("only customers may review"));
    }

    #[tokio::test]
    async fn test_exhausted_quota_blocks_download_only() {
        let store = Arc::new(MemoryEntitlementStore::new());
        let user = Identity::new("u1");
        store.put_grant(
            Grant::new(user.clone(), "a1", GrantKind::Standalone, Utc::now())
                .with_download_limit(3)
                .with_downloads_used(3),
        );
        let auth = authorizer(store);

        let download = auth
            .authorize(Some(&user), "a1", Action::Download)
            .await
            .unwrap();
        assert!(!download.allowed);
        assert!(download.reason.as_deref().unwrap().contains("limit reached"));
        assert!(matches!(
            download.into_error(),
            TurnstileError::QuotaExhausted(_)
        ));

        let review = auth.authorize(Some(&user), "a1", Action::Review).await.unwrap();
        assert!(review.allowed);
    }

    #[tokio::test]
    async fn test_anonymous_download_is_unauthenticated() {
        let auth = authorizer(Arc::new(MemoryEntitlementStore::new()));
        let result = auth.authorize(None, "a1", Action::Download).await.unwrap();
        assert!(!result.allowed);
        assert!(matches!(result.into_error(), TurnstileError::Unauthenticated));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("review".parse::<Action>().unwrap(), Action::Review);
        assert!("delete".parse::<Action>().is_err());
    }
}
