//! MongoDB client and collection wrapper

use bson::{doc, DateTime, Document};
use mongodb::{
    error::ErrorKind,
    options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::db::schemas::Metadata;
use crate::types::TurnstileError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, TurnstileError> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri).await.map_err(|e| {
            TurnstileError::StoreUnavailable(format!("Failed to connect to MongoDB: {}", e))
        })?;

        let mongo = Self {
            client,
            db_name: db_name.to_string(),
        };
        mongo.ping().await?;

        info!("Connected to MongoDB database '{}'", db_name);
        Ok(mongo)
    }

    /// Round-trip a ping command
    pub async fn ping(&self) -> Result<(), TurnstileError> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| TurnstileError::StoreUnavailable(format!("MongoDB ping failed: {}", e)))?;
        Ok(())
    }

    /// Get a typed collection, applying its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, TurnstileError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, TurnstileError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), TurnstileError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner.create_indexes(indices).await.map_err(|e| {
            TurnstileError::StoreUnavailable(format!("Failed to create indexes: {}", e))
        })?;

        Ok(())
    }

    /// Insert a document, setting metadata timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<(), TurnstileError> {
        let metadata = item.mut_metadata();
        metadata.is_deleted = false;
        metadata.created_at = Some(DateTime::now());
        metadata.updated_at = Some(DateTime::now());

        self.inner
            .insert_one(item)
            .await
            .map_err(|e| TurnstileError::StoreUnavailable(format!("Insert failed: {}", e)))?;

        Ok(())
    }

    /// Find one document by filter
    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, TurnstileError> {
        self.inner
            .find_one(live(filter))
            .await
            .map_err(read_error)
    }

    /// Every live document matching the filter.
    ///
    /// A document that fails to decode fails the whole read with
    /// `InvalidState` rather than dropping out of the result.
    pub async fn find_all(&self, filter: Document) -> Result<Vec<T>, TurnstileError> {
        use futures_util::TryStreamExt;

        let cursor = self.inner.find(live(filter)).await.map_err(read_error)?;
        cursor.try_collect().await.map_err(read_error)
    }

    /// Update one document
    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, TurnstileError> {
        self.inner
            .update_one(live(filter), update.into())
            .await
            .map_err(|e| TurnstileError::StoreUnavailable(format!("Update failed: {}", e)))
    }

    /// Guarded update returning the document as it is after the write
    ///
    /// `None` means no document matched the filter and nothing was written.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<Option<T>, TurnstileError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.inner
            .find_one_and_update(live(filter), update)
            .with_options(options)
            .await
            .map_err(|e| TurnstileError::StoreUnavailable(format!("Update failed: {}", e)))
    }
}

/// Exclude soft-deleted documents
/// Undecodable documents are integrity faults; anything else is an outage
fn read_error(err: mongodb::error::Error) -> TurnstileError {
    match err.kind.as_ref() {
        ErrorKind::BsonDeserialization(e) => {
            TurnstileError::InvalidState(format!("Malformed document: {}", e))
        }
        _ => TurnstileError::StoreUnavailable(format!("Find failed: {}", err)),
    }
}

fn live(mut filter: Document) -> Document {
    filter.insert("metadata.is_deleted", doc! { "$ne": true });
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_filter_excludes_soft_deleted() {
        let filter = live(doc! { "grant_id": "g1" });
        assert_eq!(filter.get_str("grant_id").unwrap(), "g1");
        assert!(filter.get_document("metadata.is_deleted").is_ok());
    }

    #[test]
    fn test_undecodable_document_is_invalid_state() {
        use crate::db::schemas::GrantDoc;

        let stored = doc! {
            "grant_id": "g1",
            "identity": "u1",
            "asset_id": "a1",
            "kind": "standalone",
            "status": "frozen",
            "granted_at": DateTime::now(),
        };
        let decode = bson::from_document::<GrantDoc>(stored).unwrap_err();
        let err = read_error(mongodb::error::Error::from(ErrorKind::BsonDeserialization(decode)));
        assert!(matches!(err, TurnstileError::InvalidState(_)));
    }
}
