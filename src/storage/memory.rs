//! In-memory object store for tests and dev mode

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};

use super::{chunked, ByteStream, ObjectStore, ReferenceSigner};
use crate::types::{Result, TurnstileError};

const CHUNK_SIZE: usize = 16 * 1024;

pub struct MemoryObjectStore {
    objects: DashMap<String, Bytes>,
    /// References that fail with `StoreUnavailable`, to exercise outage paths
    unavailable: DashSet<String>,
    signer: ReferenceSigner,
}

impl MemoryObjectStore {
    pub fn new(signer: ReferenceSigner) -> Self {
        Self {
            objects: DashMap::new(),
            unavailable: DashSet::new(),
            signer,
        }
    }

    pub fn put(&self, file_ref: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.insert(file_ref.into(), data.into());
    }

    pub fn remove(&self, file_ref: &str) {
        self.objects.remove(file_ref);
    }

    /// Make every access to `file_ref` fail as if storage were down
    pub fn set_unavailable(&self, file_ref: impl Into<String>) {
        self.unavailable.insert(file_ref.into());
    }

    fn check_available(&self, file_ref: &str) -> Result<()> {
        if self.unavailable.contains(file_ref) {
            return Err(TurnstileError::StoreUnavailable(format!(
                "object storage unreachable for {}",
                file_ref
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn resolve(&self, file_ref: &str) -> Result<Option<ByteStream>> {
        self.check_available(file_ref)?;
        Ok(self
            .objects
            .get(file_ref)
            .map(|data| chunked(data.clone(), CHUNK_SIZE)))
    }

    async fn exists(&self, file_ref: &str) -> Result<bool> {
        self.check_available(file_ref)?;
        Ok(self.objects.contains_key(file_ref))
    }

    fn signer(&self) -> &ReferenceSigner {
        &self.signer
    }
}
