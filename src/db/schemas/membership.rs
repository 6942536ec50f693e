//! Membership document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use super::counter;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::entitlement::model::{Identity, Membership, MembershipStatus};
use crate::types::TurnstileError;

/// Collection name for memberships
pub const MEMBERSHIP_COLLECTION: &str = "memberships";

/// Membership document, one per identity. Written by the billing integration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MembershipDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub identity: String,
    pub status: MembershipStatus,

    #[serde(default)]
    pub all_workflows_access: bool,

    #[serde(default)]
    pub current_period_end: Option<DateTime>,

    #[serde(default)]
    pub receives_updates: bool,

    #[serde(default)]
    pub early_access: bool,

    #[serde(default)]
    pub custom_workflow_requests: i64,
}

impl From<Membership> for MembershipDoc {
    fn from(m: Membership) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            identity: m.identity.as_str().to_string(),
            status: m.status,
            all_workflows_access: m.all_workflows_access,
            current_period_end: m.current_period_end.map(DateTime::from_chrono),
            receives_updates: m.receives_updates,
            early_access: m.early_access,
            custom_workflow_requests: i64::from(m.custom_workflow_requests),
        }
    }
}

impl TryFrom<MembershipDoc> for Membership {
    type Error = TurnstileError;

    fn try_from(doc: MembershipDoc) -> Result<Self, Self::Error> {
        Ok(Membership {
            custom_workflow_requests: counter(
                "custom_workflow_requests",
                doc.custom_workflow_requests,
            )?,
            identity: Identity::new(doc.identity),
            status: doc.status,
            all_workflows_access: doc.all_workflows_access,
            current_period_end: doc.current_period_end.map(|d| d.to_chrono()),
            receives_updates: doc.receives_updates,
            early_access: doc.early_access,
        })
    }
}

impl IntoIndexes for MembershipDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "identity": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("identity_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for MembershipDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
