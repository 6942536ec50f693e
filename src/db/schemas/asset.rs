//! Asset document schema
//!
//! Assets are authored elsewhere; this service only reads them.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::entitlement::model::{Asset, FileSlot, SlotName};

/// Collection name for assets
pub const ASSET_COLLECTION: &str = "assets";

/// One file slot binding
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SlotDoc {
    pub name: SlotName,

    #[serde(default)]
    pub file_ref: Option<String>,

    /// The asset's `has_X` flag
    #[serde(default)]
    pub present: bool,
}

/// Asset document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AssetDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub asset_id: String,
    pub slug: String,

    #[serde(default)]
    pub slots: Vec<SlotDoc>,
}

impl From<Asset> for AssetDoc {
    fn from(asset: Asset) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            asset_id: asset.asset_id,
            slug: asset.slug,
            slots: asset
                .slots
                .into_iter()
                .map(|s| SlotDoc {
                    name: s.name,
                    file_ref: s.file_ref,
                    present: s.present,
                })
                .collect(),
        }
    }
}

impl From<AssetDoc> for Asset {
    fn from(doc: AssetDoc) -> Self {
        Asset {
            asset_id: doc.asset_id,
            slug: doc.slug,
            slots: doc
                .slots
                .into_iter()
                .map(|s| FileSlot {
                    name: s.name,
                    file_ref: s.file_ref,
                    present: s.present,
                })
                .collect(),
        }
    }
}

impl IntoIndexes for AssetDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "asset_id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("asset_id_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for AssetDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
