//! Database schemas for Turnstile
//!
//! MongoDB document structures for grants, memberships, assets and
//! download events. Documents store counters as `i64` and timestamps as BSON
//! dates; conversion into the domain model rejects values the model cannot
//! represent.

mod asset;
mod download_event;
mod grant;
mod membership;
mod metadata;

pub use asset::{AssetDoc, SlotDoc, ASSET_COLLECTION};
pub use download_event::{DownloadEventDoc, DOWNLOAD_EVENT_COLLECTION};
pub use grant::{GrantDoc, GRANT_COLLECTION};
pub use membership::{MembershipDoc, MEMBERSHIP_COLLECTION};
pub use metadata::Metadata;

use crate::types::TurnstileError;

/// Stored counter to domain counter
pub(crate) fn counter(field: &str, value: i64) -> Result<u32, TurnstileError> {
    u32::try_from(value)
        .map_err(|_| TurnstileError::InvalidState(format!("{} out of range: {}", field, value)))
}
