//! Grant document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::counter;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::entitlement::model::{Grant, GrantKind, GrantStatus, Identity};
use crate::types::TurnstileError;

/// Collection name for grants
pub const GRANT_COLLECTION: &str = "grants";

/// Grant document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GrantDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Stable grant identifier (uuid)
    pub grant_id: String,

    pub identity: String,
    pub asset_id: String,
    pub kind: GrantKind,
    pub status: GrantStatus,

    #[serde(default)]
    pub status_reason: Option<String>,

    pub granted_at: DateTime,

    #[serde(default)]
    pub expires_at: Option<DateTime>,

    /// Null means unlimited
    #[serde(default)]
    pub download_limit: Option<i64>,

    #[serde(default)]
    pub downloads_used: i64,

    #[serde(default)]
    pub first_download_at: Option<DateTime>,

    #[serde(default)]
    pub last_download_at: Option<DateTime>,
}

impl From<Grant> for GrantDoc {
    fn from(grant: Grant) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            grant_id: grant.grant_id,
            identity: grant.identity.as_str().to_string(),
            asset_id: grant.asset_id,
            kind: grant.kind,
            status: grant.status,
            status_reason: grant.status_reason,
            granted_at: DateTime::from_chrono(grant.granted_at),
            expires_at: grant.expires_at.map(DateTime::from_chrono),
            download_limit: grant.download_limit.map(i64::from),
            downloads_used: i64::from(grant.downloads_used),
            first_download_at: grant.first_download_at.map(DateTime::from_chrono),
            last_download_at: grant.last_download_at.map(DateTime::from_chrono),
        }
    }
}

impl TryFrom<GrantDoc> for Grant {
    type Error = TurnstileError;

    fn try_from(doc: GrantDoc) -> Result<Self, Self::Error> {
        Ok(Grant {
            download_limit: doc
                .download_limit
                .map(|limit| counter("download_limit", limit))
                .transpose()?,
            downloads_used: counter("downloads_used", doc.downloads_used)?,
            grant_id: doc.grant_id,
            identity: Identity::new(doc.identity),
            asset_id: doc.asset_id,
            kind: doc.kind,
            status: doc.status,
            status_reason: doc.status_reason,
            granted_at: doc.granted_at.to_chrono(),
            expires_at: doc.expires_at.map(|d| d.to_chrono()),
            first_download_at: doc.first_download_at.map(|d| d.to_chrono()),
            last_download_at: doc.last_download_at.map(|d| d.to_chrono()),
        })
    }
}

impl IntoIndexes for GrantDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "grant_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("grant_id_unique".to_string())
                        .build(),
                ),
            ),
            // Several grants may exist per pair once one has been revoked
            (
                doc! { "identity": 1, "asset_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("identity_asset_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for GrantDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
