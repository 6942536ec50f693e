//! Remote object store reached over HTTP
//!
//! Talks to a storage sidecar exposing `GET|HEAD {base}/blob/{file_ref}`.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::StatusCode;
use std::io;
use std::time::Duration;
use tracing::debug;

use super::{ByteStream, ObjectStore, ReferenceSigner};
use crate::types::{Result, TurnstileError};

pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    signer: ReferenceSigner,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>, signer: ReferenceSigner) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| TurnstileError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            signer,
        })
    }

    fn blob_url(&self, file_ref: &str) -> String {
        format!(
            "{}/blob/{}",
            self.base_url.trim_end_matches('/'),
            file_ref.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn resolve(&self, file_ref: &str) -> Result<Option<ByteStream>> {
        let url = self.blob_url(file_ref);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(file_ref, "blob not found");
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(Some(Box::pin(stream)))
    }

    async fn exists(&self, file_ref: &str) -> Result<bool> {
        let response = self.client.head(self.blob_url(file_ref)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    fn signer(&self) -> &ReferenceSigner {
        &self.signer
    }
}
