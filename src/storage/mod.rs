//! Object storage collaborator
//!
//! Backing files are addressed by opaque `file_ref` strings. Every backend
//! mints the same kind of retrieval reference: a signed, expiring token
//! redeemed at `GET /files/{token}` on this service. Expiry is checked on
//! redemption, independently of any quota accounting.

pub mod http;
pub mod local;
pub mod memory;
pub mod token;

pub use http::HttpObjectStore;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use token::{ReferenceClaims, ReferenceSigner, SignedUrl};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use crate::types::{Result, TurnstileError};

/// Incremental file contents
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Read access to backing files plus reference minting
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a file for streaming; `None` when the reference has no backing bytes
    async fn resolve(&self, file_ref: &str) -> Result<Option<ByteStream>>;

    /// Whether the reference currently has backing bytes
    async fn exists(&self, file_ref: &str) -> Result<bool>;

    fn signer(&self) -> &ReferenceSigner;

    fn mint_signed_url(&self, file_ref: &str, ttl: Duration) -> Result<SignedUrl> {
        self.signer().mint(file_ref, ttl)
    }

    /// Verify a minted reference and open the file it points at
    async fn redeem(&self, token: &str) -> Result<(ReferenceClaims, ByteStream)> {
        let claims = self.signer().verify(token)?;
        match self.resolve(&claims.file_ref).await? {
            Some(stream) => Ok((claims, stream)),
            None => Err(TurnstileError::NotFound("file no longer available".into())),
        }
    }
}

/// Split a buffer into chunks of at most `chunk` bytes
pub(crate) fn chunked(data: Bytes, chunk: usize) -> ByteStream {
    let mut pieces = Vec::new();
    let mut rest = data;
    while rest.len() > chunk {
        pieces.push(Ok(rest.split_to(chunk)));
    }
    if !rest.is_empty() {
        pieces.push(Ok(rest));
    }
    Box::pin(futures::stream::iter(pieces))
}
