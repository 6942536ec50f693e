//! Caller authentication
//!
//! Turns request headers into a `Caller`: an optional identity plus a
//! permission level. A missing or bad token is not an error here; the
//! entitlement layer answers "authentication required" where it matters.

pub mod api_key;
pub mod jwt;
pub mod permissions;

pub use api_key::ApiKeyValidator;
pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenRejection};
pub use permissions::PermissionLevel;

use tracing::debug;

use crate::entitlement::model::Identity;

/// Authenticated caller of one request
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub identity: Option<Identity>,
    pub level: PermissionLevel,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_admin(&self) -> bool {
        self.level.allows(PermissionLevel::Admin)
    }
}

/// Resolve the caller from raw header values
pub fn authenticate(
    jwt: &JwtValidator,
    api_keys: &ApiKeyValidator,
    authorization: Option<&str>,
    api_key: Option<&str>,
) -> Caller {
    if let Some(key) = ApiKeyValidator::extract_from_header(api_key) {
        if let Some(level) = api_keys.validate(key) {
            return Caller {
                identity: None,
                level,
            };
        }
        debug!("Rejected X-API-Key");
    }

    let Some(token) = extract_token_from_header(authorization) else {
        return Caller::anonymous();
    };

    match jwt.verify_token(token) {
        Ok(claims) => Caller {
            identity: Some(claims.identity()),
            level: claims.permission_level,
        },
        Err(rejection) => {
            debug!(%rejection, "Ignoring bearer token");
            Caller::anonymous()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validators() -> (JwtValidator, ApiKeyValidator) {
        (
            JwtValidator::new_dev(),
            ApiKeyValidator::new(Some("ops-key".into())),
        )
    }

    #[test]
    fn test_bearer_token_yields_identity() {
        let (jwt, keys) = validators();
        let token = jwt
            .generate_token("customer-7", PermissionLevel::Customer)
            .unwrap();
        let header = format!("Bearer {}", token);

        let caller = authenticate(&jwt, &keys, Some(&header), None);
        assert_eq!(caller.identity, Some(Identity::new("customer-7")));
        assert_eq!(caller.level, PermissionLevel::Customer);
        assert!(!caller.is_admin());
    }

    #[test]
    fn test_garbage_token_is_anonymous() {
        let (jwt, keys) = validators();
        let caller = authenticate(&jwt, &keys, Some("Bearer nope"), None);
        assert!(caller.identity.is_none());
        assert_eq!(caller.level, PermissionLevel::Public);
    }

    #[test]
    fn test_api_key_grants_admin_without_identity() {
        let (jwt, keys) = validators();
        let caller = authenticate(&jwt, &keys, None, Some("ops-key"));
        assert!(caller.is_admin());
        assert!(caller.identity.is_none());
    }

    #[test]
    fn test_wrong_api_key_falls_back_to_token() {
        let (jwt, keys) = validators();
        let token = jwt
            .generate_token("support-1", PermissionLevel::Admin)
            .unwrap();
        let header = format!("Bearer {}", token);
        let caller = authenticate(&jwt, &keys, Some(&header), Some("guess"));
        assert!(caller.is_admin());
        assert_eq!(caller.identity, Some(Identity::new("support-1")));
    }
}
