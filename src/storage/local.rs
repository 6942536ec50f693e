//! Filesystem-backed object store

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::{ByteStream, ObjectStore, ReferenceSigner};
use crate::types::{Result, TurnstileError};

const CHUNK_SIZE: usize = 64 * 1024;

/// Files under a root directory, addressed by relative path
pub struct LocalObjectStore {
    root: PathBuf,
    signer: ReferenceSigner,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, signer: ReferenceSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    /// Map a reference to a path, refusing anything that leaves the root
    fn path_for(&self, file_ref: &str) -> Result<PathBuf> {
        let relative = Path::new(file_ref);
        let contained = !file_ref.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !contained {
            return Err(TurnstileError::Forbidden(format!(
                "file reference '{}' escapes the storage root",
                file_ref
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn file_stream(file: File) -> ByteStream {
    Box::pin(stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok::<_, io::Error>(None);
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), file)))
    }))
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn resolve(&self, file_ref: &str) -> Result<Option<ByteStream>> {
        let path = self.path_for(file_ref)?;
        match File::open(&path).await {
            Ok(file) => Ok(Some(file_stream(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TurnstileError::StoreUnavailable(format!(
                "cannot open {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn exists(&self, file_ref: &str) -> Result<bool> {
        let path = self.path_for(file_ref)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TurnstileError::StoreUnavailable(format!(
                "cannot stat {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn signer(&self) -> &ReferenceSigner {
        &self.signer
    }
}
