//! Caller JWT handling
//!
//! Tokens are HS256 and issued by the storefront's login service; this
//! service only verifies them. `generate_token` exists for tooling and tests.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::PermissionLevel;
use crate::entitlement::model::Identity;
use crate::types::TurnstileError;

/// Shortest HMAC secret accepted outside dev mode
pub const MIN_SECRET_LEN: usize = 32;

/// Reject missing or short HMAC secrets, naming the setting in the error
pub(crate) fn require_secret(setting: &str, secret: &str) -> Result<(), TurnstileError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(TurnstileError::Config(format!(
            "{} must be at least {} characters",
            setting, MIN_SECRET_LEN
        )));
    }
    Ok(())
}

/// Payload of a caller token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Opaque identity of the caller
    pub sub: String,
    pub permission_level: PermissionLevel,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity::new(self.sub.clone())
    }
}

/// Why a presented token was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    BadSignature,
    Malformed,
    NoSubject,
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TokenRejection::Expired => "token expired",
            TokenRejection::BadSignature => "invalid signature",
            TokenRejection::Malformed => "malformed token",
            TokenRejection::NoSubject => "token has no subject",
        })
    }
}

#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: i64,
}

impl JwtValidator {
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, TurnstileError> {
        require_secret("JWT_SECRET", &secret)?;
        Ok(Self {
            secret,
            expiry_seconds: i64::try_from(expiry_seconds)
                .map_err(|_| TurnstileError::Config("JWT_EXPIRY_SECONDS out of range".into()))?,
        })
    }

    /// Validator with a fixed insecure secret for dev mode
    pub fn new_dev() -> Self {
        Self {
            secret: "dev-mode-caller-secret-not-for-production".into(),
            expiry_seconds: 3600,
        }
    }

    /// Issue a token for an identity
    pub fn generate_token(
        &self,
        identity: &str,
        permission_level: PermissionLevel,
    ) -> Result<String, TurnstileError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: identity.to_string(),
            permission_level,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| TurnstileError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Verify signature and expiry and decode the claims
    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenRejection> {
        let validation = Validation::new(Algorithm::HS256);

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => TokenRejection::Expired,
            ErrorKind::InvalidSignature => TokenRejection::BadSignature,
            _ => TokenRejection::Malformed,
        })?
        .claims;

        if claims.sub.trim().is_empty() {
            return Err(TokenRejection::NoSubject);
        }
        Ok(claims)
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let (scheme, token) = auth_header?.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
