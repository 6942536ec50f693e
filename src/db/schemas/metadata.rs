//! Bookkeeping stamped on every stored document

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Record timestamps plus the retirement flag honored by every read
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    /// Retired records stay on disk for audit but are invisible to lookups
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    /// Bumped by every guarded write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

impl Metadata {
    pub fn new() -> Self {
        let now = DateTime::now();
        Self {
            is_deleted: false,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}
