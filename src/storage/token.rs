//! Signed retrieval references
//!
//! A reference is an HS256 JWT naming one file and carrying its own expiry.
//! Holding it grants nothing beyond that file until `exp`.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth::jwt::require_secret;
use crate::types::{Result, TurnstileError};

/// Payload of a retrieval reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceClaims {
    pub file_ref: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique per minted reference, for correlating audit records
    pub jti: String,
}

/// A minted, expiring retrieval URL
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub reference_id: String,
}

#[derive(Clone)]
pub struct ReferenceSigner {
    secret: String,
    public_url: String,
}

impl ReferenceSigner {
    pub fn new(secret: String, public_url: impl Into<String>) -> Result<Self> {
        require_secret("SIGNING_SECRET", &secret)?;
        Ok(Self {
            secret,
            public_url: public_url.into(),
        })
    }

    /// Signer with a fixed insecure secret for dev mode
    pub fn new_dev(public_url: impl Into<String>) -> Self {
        Self {
            secret: "dev-mode-signing-secret-not-for-production".into(),
            public_url: public_url.into(),
        }
    }

    pub fn mint(&self, file_ref: &str, ttl: Duration) -> Result<SignedUrl> {
        self.mint_at(file_ref, ttl, Utc::now())
    }

    /// Mint as of `now`
    pub fn mint_at(&self, file_ref: &str, ttl: Duration, now: DateTime<Utc>) -> Result<SignedUrl> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| TurnstileError::Config(format!("reference TTL out of range: {}", e)))?;
        let expires_at = now + ttl;

        let claims = ReferenceClaims {
            file_ref: file_ref.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| TurnstileError::Internal(format!("Failed to sign reference: {}", e)))?;

        Ok(SignedUrl {
            url: format!("{}/files/{}", self.public_url.trim_end_matches('/'), token),
            expires_at,
            reference_id: claims.jti,
        })
    }

    /// Check signature and expiry. Expired references map to `Expired`,
    /// anything else that fails to verify to `Forbidden`.
    pub fn verify(&self, token: &str) -> Result<ReferenceClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        let data = decode::<ReferenceClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )?;
        Ok(data.claims)
    }
}
