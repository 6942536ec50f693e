//! Error types for Turnstile
//!
//! Expected outcomes (`Unauthenticated`, `Denied`, `QuotaExhausted`, `Expired`,
//! `GrantInvalid`) are user-facing results. `StoreUnavailable` and
//! `InvalidState` are operational failures and must never be folded into a denial.

use hyper::StatusCode;

/// Main error type for Turnstile operations
#[derive(Debug, thiserror::Error)]
pub enum TurnstileError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Access denied: {0}")]
    Denied(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Access expired: {0}")]
    Expired(String),

    #[error("Grant invalid: {0}")]
    GrantInvalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TurnstileError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Denied(_) => StatusCode::FORBIDDEN,
            Self::QuotaExhausted(_) => StatusCode::FORBIDDEN,
            Self::Expired(_) => StatusCode::FORBIDDEN,
            Self::GrantInvalid(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidState(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            // A plain denial on the delivery path means there is no usable grant
            Self::Denied(_) => "GRANT_INVALID",
            Self::QuotaExhausted(_) => "QUOTA_EXHAUSTED",
            Self::Expired(_) => "EXPIRED",
            Self::GrantInvalid(_) => "GRANT_INVALID",
            Self::NotFound(_) => "NOT_FOUND",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Config(_) => "INTERNAL",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this is an expected, user-facing outcome rather than a failure.
    ///
    /// Expected outcomes are audit facts and are never logged as errors.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated
                | Self::Denied(_)
                | Self::QuotaExhausted(_)
                | Self::Expired(_)
                | Self::GrantInvalid(_)
                | Self::NotFound(_)
                | Self::BadRequest(_)
                | Self::Forbidden(_)
        )
    }

    /// Message suitable for the `message` field of an error body
    pub fn message(&self) -> String {
        match self {
            Self::Unauthenticated => "authentication required".to_string(),
            Self::Denied(m)
            | Self::QuotaExhausted(m)
            | Self::Expired(m)
            | Self::GrantInvalid(m)
            | Self::NotFound(m)
            | Self::BadRequest(m)
            | Self::Forbidden(m) => m.clone(),
            // Operational details stay in the logs
            Self::StoreUnavailable(_) => "entitlement store temporarily unavailable".to_string(),
            Self::InvalidState(_) => "entitlement data is inconsistent".to_string(),
            Self::Config(_) | Self::Internal(_) => "internal error".to_string(),
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for TurnstileError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for TurnstileError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for TurnstileError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for TurnstileError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<bson::de::Error> for TurnstileError {
    fn from(err: bson::de::Error) -> Self {
        Self::InvalidState(format!("Malformed document: {}", err))
    }
}

impl From<bson::ser::Error> for TurnstileError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("Document serialization failed: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for TurnstileError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired("retrieval reference expired".into()),
            _ => Self::Forbidden(format!("Invalid token: {}", err)),
        }
    }
}

impl From<reqwest::Error> for TurnstileError {
    fn from(err: reqwest::Error) -> Self {
        Self::StoreUnavailable(format!("Object storage request failed: {}", err))
    }
}

impl From<zip::result::ZipError> for TurnstileError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Internal(format!("Archive error: {}", err))
    }
}

/// Result type alias for Turnstile operations
pub type Result<T> = std::result::Result<T, TurnstileError>;
