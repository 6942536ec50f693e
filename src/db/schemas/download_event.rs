//! Download event document schema (append-only)

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::entitlement::model::{DownloadEvent, SlotName};

/// Collection name for download events
pub const DOWNLOAD_EVENT_COLLECTION: &str = "download_events";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DownloadEventDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub event_id: String,
    pub identity: String,
    pub asset_id: String,

    /// Null for membership-derived downloads
    #[serde(default)]
    pub grant_id: Option<String>,

    pub slot: SlotName,
    pub downloaded_at: DateTime,
}

impl From<&DownloadEvent> for DownloadEventDoc {
    fn from(event: &DownloadEvent) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            event_id: event.event_id.clone(),
            identity: event.identity.as_str().to_string(),
            asset_id: event.asset_id.clone(),
            grant_id: event.grant_id.clone(),
            slot: event.slot,
            downloaded_at: DateTime::from_chrono(event.downloaded_at),
        }
    }
}

impl IntoIndexes for DownloadEventDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "event_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("event_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "identity": 1, "asset_id": 1, "downloaded_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("identity_asset_time_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for DownloadEventDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
