//! Entitlement domain model
//!
//! Grants, memberships, assets and the computed `AccessDecision`. Kinds and
//! statuses are closed enums so every evaluation site has to handle each case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::types::TurnstileError;

/// Opaque, externally authenticated principal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// How a grant was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    Promotional,
    Standalone,
    WithUpdates,
    Member,
}

/// Stored lifecycle state of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Refunded,
    Revoked,
    Expired,
}

impl GrantStatus {
    /// Revoked and refunded grants never authorize anything again
    pub fn is_terminal(self) -> bool {
        matches!(self, GrantStatus::Revoked | GrantStatus::Refunded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Refunded => "refunded",
            GrantStatus::Revoked => "revoked",
            GrantStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The right of one identity to act on one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub grant_id: String,
    pub identity: Identity,
    pub asset_id: String,
    pub kind: GrantKind,
    pub status: GrantStatus,
    /// Why the grant was created or last changed status
    pub status_reason: Option<String>,
    pub granted_at: DateTime<Utc>,
    /// `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
    /// `None` is unlimited
    pub download_limit: Option<u32>,
    pub downloads_used: u32,
    pub first_download_at: Option<DateTime<Utc>>,
    pub last_download_at: Option<DateTime<Utc>>,
}

impl Grant {
    /// A fresh active grant with no downloads recorded
    pub fn new(
        identity: Identity,
        asset_id: impl Into<String>,
        kind: GrantKind,
        granted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            grant_id: uuid::Uuid::new_v4().to_string(),
            identity,
            asset_id: asset_id.into(),
            kind,
            status: GrantStatus::Active,
            status_reason: None,
            granted_at,
            expires_at: None,
            download_limit: None,
            downloads_used: 0,
            first_download_at: None,
            last_download_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_download_limit(mut self, limit: u32) -> Self {
        self.download_limit = Some(limit);
        self
    }

    pub fn with_downloads_used(mut self, used: u32) -> Self {
        self.downloads_used = used;
        self
    }

    pub fn with_status(mut self, status: GrantStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.status_reason = Some(reason.into());
        self
    }

    /// Time-based expiry, independent of the stored status
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Active, not terminal and not past its expiry
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && !self.is_expired_at(now)
    }

    /// Remaining downloads, `None` when unlimited
    pub fn downloads_remaining(&self) -> Option<u32> {
        self.download_limit
            .map(|limit| limit.saturating_sub(self.downloads_used))
    }

    /// Check the counter invariant `downloads_used <= download_limit`
    pub fn check_integrity(&self) -> Result<(), TurnstileError> {
        match self.download_limit {
            Some(limit) if self.downloads_used > limit => Err(TurnstileError::InvalidState(format!(
                "grant {} has downloads_used {} above download_limit {}",
                self.grant_id, self.downloads_used, limit
            ))),
            _ => Ok(()),
        }
    }
}

/// Pick the grant that speaks for an (identity, asset) pair.
///
/// Revoked grants stay on record, so a pair can hold several rows over time.
/// A usable grant wins over an unusable one; ties go to the most recent.
pub fn select_current_grant(mut grants: Vec<Grant>, now: DateTime<Utc>) -> Option<Grant> {
    grants.sort_by(|a, b| {
        b.is_usable_at(now)
            .cmp(&a.is_usable_at(now))
            .then(b.granted_at.cmp(&a.granted_at))
    });
    grants.into_iter().next()
}

/// Membership billing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    PastDue,
    Cancelled,
    Expired,
}

/// Account-wide subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub identity: Identity,
    pub status: MembershipStatus,
    pub all_workflows_access: bool,
    pub current_period_end: Option<DateTime<Utc>>,
    pub receives_updates: bool,
    pub early_access: bool,
    pub custom_workflow_requests: u32,
}

impl Membership {
    pub fn new(identity: Identity, status: MembershipStatus, all_workflows_access: bool) -> Self {
        Self {
            identity,
            status,
            all_workflows_access,
            current_period_end: None,
            receives_updates: false,
            early_access: false,
            custom_workflow_requests: 0,
        }
    }

    pub fn with_period_end(mut self, end: DateTime<Utc>) -> Self {
        self.current_period_end = Some(end);
        self
    }

    /// Whether this membership supersedes asset-level grant evaluation
    pub fn unlocks_everything_at(&self, now: DateTime<Utc>) -> bool {
        let within_period = match self.current_period_end {
            Some(end) => end > now,
            None => true,
        };
        self.status == MembershipStatus::Active && self.all_workflows_access && within_period
    }
}

/// Named file slot on an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Guide,
    PromptSet,
    Checklist,
    Examples,
    RedactionGuide,
    ExportTemplates,
}

impl SlotName {
    pub const ALL: [SlotName; 6] = [
        SlotName::Guide,
        SlotName::PromptSet,
        SlotName::Checklist,
        SlotName::Examples,
        SlotName::RedactionGuide,
        SlotName::ExportTemplates,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SlotName::Guide => "guide",
            SlotName::PromptSet => "prompt_set",
            SlotName::Checklist => "checklist",
            SlotName::Examples => "examples",
            SlotName::RedactionGuide => "redaction_guide",
            SlotName::ExportTemplates => "export_templates",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotName {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SlotName::ALL
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| TurnstileError::NotFound(format!("unknown file slot '{}'", s)))
    }
}

/// One file slot and its binding in object storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSlot {
    pub name: SlotName,
    /// Opaque locator in the object store
    pub file_ref: Option<String>,
    /// The asset's `has_X` flag
    pub present: bool,
}

/// A purchasable digital product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub asset_id: String,
    pub slug: String,
    pub slots: Vec<FileSlot>,
}

impl Asset {
    pub fn new(asset_id: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            slug: slug.into(),
            slots: Vec::new(),
        }
    }

    /// Bind a slot to a backing file and mark it present
    pub fn with_file(mut self, name: SlotName, file_ref: impl Into<String>) -> Self {
        self.slots.retain(|s| s.name != name);
        self.slots.push(FileSlot {
            name,
            file_ref: Some(file_ref.into()),
            present: true,
        });
        self
    }

    /// Backing reference for a slot, if it is both present and bound
    pub fn binding(&self, name: SlotName) -> Option<&str> {
        self.slots
            .iter()
            .find(|s| s.name == name && s.present)
            .and_then(|s| s.file_ref.as_deref())
    }

    /// All present, bound slots in declaration order
    pub fn bound_slots(&self) -> impl Iterator<Item = (SlotName, &str)> {
        self.slots
            .iter()
            .filter(|s| s.present)
            .filter_map(|s| s.file_ref.as_deref().map(|r| (s.name, r)))
    }
}

/// Immutable record of a successful delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEvent {
    pub event_id: String,
    pub identity: Identity,
    pub asset_id: String,
    /// `None` for membership-derived downloads
    pub grant_id: Option<String>,
    pub slot: SlotName,
    pub downloaded_at: DateTime<Utc>,
}

/// Access tier reported in decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Promotional,
    Standalone,
    WithUpdates,
    Member,
    None,
}

impl From<GrantKind> for Tier {
    fn from(kind: GrantKind) -> Self {
        match kind {
            GrantKind::Promotional => Tier::Promotional,
            GrantKind::Standalone => Tier::Standalone,
            GrantKind::WithUpdates => Tier::WithUpdates,
            GrantKind::Member => Tier::Member,
        }
    }
}

/// Why an action is limited. Serialized as its human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restriction {
    AuthenticationRequired,
    PurchaseRequired,
    Revoked,
    Refunded,
    Expired { at: DateTime<Utc> },
    DownloadLimitReached { limit: u32 },
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Restriction::AuthenticationRequired => write!(f, "authentication required"),
            Restriction::PurchaseRequired => write!(f, "purchase required"),
            Restriction::Revoked => write!(f, "access has been revoked"),
            Restriction::Refunded => write!(f, "purchase was refunded"),
            Restriction::Expired { at } => {
                write!(f, "access expired on {}", at.format("%Y-%m-%d"))
            }
            Restriction::DownloadLimitReached { limit } => {
                write!(f, "download limit reached ({} of {} used)", limit, limit)
            }
        }
    }
}

impl Serialize for Restriction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Restriction {
    /// Error raised when this restriction blocks a delivery
    pub fn into_error(self) -> TurnstileError {
        let message = self.to_string();
        match self {
            Restriction::AuthenticationRequired => TurnstileError::Unauthenticated,
            Restriction::PurchaseRequired => TurnstileError::Denied(message),
            Restriction::Revoked | Restriction::Refunded => TurnstileError::GrantInvalid(message),
            Restriction::Expired { .. } => TurnstileError::Expired(message),
            Restriction::DownloadLimitReached { .. } => TurnstileError::QuotaExhausted(message),
        }
    }
}

/// Sole output of the access evaluator, rebuilt from stored state every time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub has_access: bool,
    pub tier: Tier,
    pub expires_at: Option<DateTime<Utc>>,
    pub can_download: bool,
    pub downloads_remaining: Option<u32>,
    pub restrictions: Vec<Restriction>,
    /// Grant the decision was derived from; `None` for membership or denial
    #[serde(skip)]
    pub grant_id: Option<String>,
}

impl AccessDecision {
    pub fn denied(restriction: Restriction) -> Self {
        Self {
            has_access: false,
            tier: Tier::None,
            expires_at: None,
            can_download: false,
            downloads_remaining: None,
            restrictions: vec![restriction],
            grant_id: None,
        }
    }

    pub fn member(period_end: Option<DateTime<Utc>>) -> Self {
        Self {
            has_access: true,
            tier: Tier::Member,
            expires_at: period_end,
            can_download: true,
            downloads_remaining: None,
            restrictions: Vec::new(),
            grant_id: None,
        }
    }

    pub fn first_restriction(&self) -> Option<&Restriction> {
        self.restrictions.first()
    }
}
