//! Access precedence table
//!
//! The evaluator's priority order lives here as one ordered list of rules.
//! Each rule either settles the decision or passes to the next one; the last
//! rule always settles. Reordering entitlement checks means editing
//! `PRECEDENCE`, not hunting through conditionals.

use chrono::{DateTime, Utc};

use super::model::{AccessDecision, Grant, GrantStatus, Membership, Restriction};
use crate::types::{Result, TurnstileError};

/// Everything a decision may depend on
#[derive(Debug, Clone, Copy)]
pub struct Facts<'a> {
    pub authenticated: bool,
    pub membership: Option<&'a Membership>,
    pub grant: Option<&'a Grant>,
    pub now: DateTime<Utc>,
}

/// Outcome of a single rule
pub enum Verdict {
    /// The decision is settled
    Settle(AccessDecision),
    /// Stored data violates an invariant
    Invalid(TurnstileError),
}

type RuleFn = fn(&Facts<'_>) -> Option<Verdict>;

/// A named step of the precedence table
pub struct Rule {
    pub name: &'static str,
    check: RuleFn,
}

/// Evaluation order, highest priority first
pub const PRECEDENCE: &[Rule] = &[
    Rule {
        name: "authentication",
        check: require_authentication,
    },
    Rule {
        name: "membership",
        check: membership_supersedes,
    },
    Rule {
        name: "purchase",
        check: require_purchase,
    },
    Rule {
        name: "integrity",
        check: counters_consistent,
    },
    Rule {
        name: "revocation",
        check: reject_terminal,
    },
    Rule {
        name: "expiry",
        check: reject_expired,
    },
    Rule {
        name: "quota",
        check: apply_quota,
    },
];

/// Names of the rules in evaluation order
pub fn precedence() -> impl Iterator<Item = &'static str> {
    PRECEDENCE.iter().map(|rule| rule.name)
}

/// Walk the precedence table and return the first settled decision
pub fn decide(facts: &Facts<'_>) -> Result<AccessDecision> {
    for rule in PRECEDENCE {
        match (rule.check)(facts) {
            Some(Verdict::Settle(decision)) => return Ok(decision),
            Some(Verdict::Invalid(err)) => return Err(err),
            None => continue,
        }
    }
    Err(TurnstileError::Internal(
        "access precedence table did not settle".to_string(),
    ))
}

fn require_authentication(facts: &Facts<'_>) -> Option<Verdict> {
    (!facts.authenticated)
        .then(|| Verdict::Settle(AccessDecision::denied(Restriction::AuthenticationRequired)))
}

fn membership_supersedes(facts: &Facts<'_>) -> Option<Verdict> {
    facts
        .membership
        .filter(|m| m.unlocks_everything_at(facts.now))
        .map(|m| Verdict::Settle(AccessDecision::member(m.current_period_end)))
}

fn require_purchase(facts: &Facts<'_>) -> Option<Verdict> {
    facts
        .grant
        .is_none()
        .then(|| Verdict::Settle(AccessDecision::denied(Restriction::PurchaseRequired)))
}

fn counters_consistent(facts: &Facts<'_>) -> Option<Verdict> {
    facts
        .grant
        .and_then(|g| g.check_integrity().err())
        .map(Verdict::Invalid)
}

fn reject_terminal(facts: &Facts<'_>) -> Option<Verdict> {
    let grant = facts.grant?;
    let restriction = match grant.status {
        GrantStatus::Revoked => Restriction::Revoked,
        GrantStatus::Refunded => Restriction::Refunded,
        GrantStatus::Active | GrantStatus::Expired => return None,
    };
    Some(Verdict::Settle(AccessDecision::denied(restriction)))
}

fn reject_expired(facts: &Facts<'_>) -> Option<Verdict> {
    let grant = facts.grant?;
    let expired_at = match (grant.status, grant.expires_at) {
        // Time-based expiry, whatever the row still says
        (_, Some(at)) if at <= facts.now => at,
        // Marked expired by a sweep but without a recorded date
        (GrantStatus::Expired, at) => at.unwrap_or(facts.now),
        _ => return None,
    };
    Some(Verdict::Settle(AccessDecision::denied(Restriction::Expired {
        at: expired_at,
    })))
}

fn apply_quota(facts: &Facts<'_>) -> Option<Verdict> {
    let grant = facts.grant?;
    let remaining = grant.downloads_remaining();
    let can_download = remaining.map_or(true, |r| r > 0);

    let mut restrictions = Vec::new();
    if !can_download {
        if let Some(limit) = grant.download_limit {
            restrictions.push(Restriction::DownloadLimitReached { limit });
        }
    }

    Some(Verdict::Settle(AccessDecision {
        has_access: true,
        tier: grant.kind.into(),
        expires_at: grant.expires_at,
        can_download,
        downloads_remaining: remaining,
        restrictions,
        grant_id: Some(grant.grant_id.clone()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::model::{GrantKind, MembershipStatus, Tier};
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn grant() -> Grant {
        Grant::new("u1".into(), "a1", GrantKind::Standalone, now() - Duration::days(10))
    }

    fn member() -> Membership {
        Membership::new("u1".into(), MembershipStatus::Active, true)
    }

    fn facts<'a>(membership: Option<&'a Membership>, grant: Option<&'a Grant>) -> Facts<'a> {
        Facts {
            authenticated: true,
            membership,
            grant,
            now: now(),
        }
    }

    fn restriction(decision: &AccessDecision) -> Option<&Restriction> {
        decision.first_restriction()
    }

    #[test]
    fn test_precedence_order() {
        let order: Vec<_> = precedence().collect();
        assert_eq!(
            order,
            vec![
                "authentication",
                "membership",
                "purchase",
                "integrity",
                "revocation",
                "expiry",
                "quota"
            ]
        );
    }

    #[test]
    fn test_authentication_beats_membership() {
        let m = member();
        let f = Facts {
            authenticated: false,
            ..facts(Some(&m), None)
        };
        let d = decide(&f).unwrap();
        assert!(!d.has_access);
        assert_eq!(restriction(&d), Some(&Restriction::AuthenticationRequired));
    }

    #[test]
    fn test_membership_beats_missing_purchase() {
        let m = member();
        let d = decide(&facts(Some(&m), None)).unwrap();
        assert!(d.has_access);
        assert_eq!(d.tier, Tier::Member);
    }

    #[test]
    fn test_membership_beats_revoked_grant() {
        let m = member();
        let g = grant().with_status(GrantStatus::Revoked);
        let d = decide(&facts(Some(&m), Some(&g))).unwrap();
        assert!(d.has_access);
        assert_eq!(d.tier, Tier::Member);
        assert!(d.grant_id.is_none());
    }

    #[test]
    fn test_membership_beats_expired_grant() {
        let m = member();
        let g = grant().with_expiry(now() - Duration::days(1));
        let d = decide(&facts(Some(&m), Some(&g))).unwrap();
        assert!(d.has_access);
        assert_eq!(d.tier, Tier::Member);
    }

    #[test]
    fn test_membership_beats_quota() {
        let m = member().with_period_end(now() + Duration::days(20));
        let g = grant().with_download_limit(1).with_downloads_used(1);
        let d = decide(&facts(Some(&m), Some(&g))).unwrap();
        assert!(d.can_download);
        assert_eq!(d.downloads_remaining, None);
        assert_eq!(d.expires_at, m.current_period_end);
    }

    #[test]
    fn test_membership_beats_corrupt_counters() {
        let m = member();
        let g = grant().with_download_limit(1).with_downloads_used(5);
        assert!(decide(&facts(Some(&m), Some(&g))).unwrap().has_access);
    }

    #[test]
    fn test_inactive_membership_falls_through_to_purchase() {
        let m = Membership::new("u1".into(), MembershipStatus::Cancelled, true);
        let d = decide(&facts(Some(&m), None)).unwrap();
        assert_eq!(restriction(&d), Some(&Restriction::PurchaseRequired));
    }

    #[test]
    fn test_integrity_beats_revocation() {
        let g = grant()
            .with_status(GrantStatus::Revoked)
            .with_download_limit(1)
            .with_downloads_used(2);
        assert!(matches!(
            decide(&facts(None, Some(&g))),
            Err(TurnstileError::InvalidState(_))
        ));
    }

    #[test]
    fn test_revocation_beats_expiry() {
        let g = grant()
            .with_status(GrantStatus::Revoked)
            .with_expiry(now() - Duration::days(1));
        let d = decide(&facts(None, Some(&g))).unwrap();
        assert_eq!(restriction(&d), Some(&Restriction::Revoked));
    }

    #[test]
    fn test_refund_beats_expiry() {
        let g = grant()
            .with_status(GrantStatus::Refunded)
            .with_expiry(now() - Duration::days(1));
        let d = decide(&facts(None, Some(&g))).unwrap();
        assert_eq!(restriction(&d), Some(&Restriction::Refunded));
    }

    #[test]
    fn test_revocation_ignores_future_expiry() {
        let g = grant()
            .with_status(GrantStatus::Revoked)
            .with_expiry(now() + Duration::days(30));
        let d = decide(&facts(None, Some(&g))).unwrap();
        assert!(!d.has_access);
    }

    #[test]
    fn test_revocation_beats_quota() {
        let g = grant()
            .with_status(GrantStatus::Refunded)
            .with_download_limit(3)
            .with_downloads_used(3);
        let d = decide(&facts(None, Some(&g))).unwrap();
        assert_eq!(restriction(&d), Some(&Restriction::Refunded));
        assert!(!d.can_download);
    }

    #[test]
    fn test_expiry_beats_quota() {
        let at = now() - Duration::hours(2);
        let g = grant()
            .with_expiry(at)
            .with_download_limit(3)
            .with_downloads_used(3);
        let d = decide(&facts(None, Some(&g))).unwrap();
        assert!(!d.has_access);
        assert_eq!(restriction(&d), Some(&Restriction::Expired { at }));
    }

    #[test]
    fn test_stored_expired_status_denies() {
        let g = grant().with_status(GrantStatus::Expired);
        let d = decide(&facts(None, Some(&g))).unwrap();
        assert!(!d.has_access);
        assert!(matches!(restriction(&d), Some(Restriction::Expired { .. })));
    }

    #[test]
    fn test_quota_exhausted_keeps_access() {
        let g = grant().with_download_limit(3).with_downloads_used(3);
        let d = decide(&facts(None, Some(&g))).unwrap();
        assert!(d.has_access);
        assert!(!d.can_download);
        assert_eq!(d.downloads_remaining, Some(0));
        assert!(restriction(&d).unwrap().to_string().contains("limit reached"));
    }

    #[test]
    fn test_unlimited_grant() {
        let g = grant().with_downloads_used(40);
        let d = decide(&facts(None, Some(&g))).unwrap();
        assert!(d.has_access && d.can_download);
        assert_eq!(d.downloads_remaining, None);
        assert_eq!(d.tier, Tier::Standalone);
        assert_eq!(d.grant_id.as_deref(), Some(g.grant_id.as_str()));
        assert!(d.restrictions.is_empty());
    }
}
