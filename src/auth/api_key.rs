//! Static admin API key
//!
//! Billing webhooks and support scripts authenticate with `X-API-Key`
//! instead of a JWT. Only the admin level can be obtained this way.

use crate::auth::PermissionLevel;

#[derive(Debug, Clone)]
pub struct ApiKeyValidator {
    admin_key: Option<String>,
}

impl ApiKeyValidator {
    pub fn new(admin_key: Option<String>) -> Self {
        Self {
            admin_key: admin_key.filter(|k| !k.is_empty()),
        }
    }

    /// Check if API key authentication is configured
    pub fn is_configured(&self) -> bool {
        self.admin_key.is_some()
    }

    /// Permission level granted by a presented key, if it matches
    pub fn validate(&self, api_key: &str) -> Option<PermissionLevel> {
        let admin = self.admin_key.as_deref()?;
        constant_time_compare(api_key, admin).then_some(PermissionLevel::Admin)
    }

    /// Extract API key from request headers
    pub fn extract_from_header(header: Option<&str>) -> Option<&str> {
        header.filter(|h| !h.is_empty())
    }
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_rejects_everything() {
        let validator = ApiKeyValidator::new(None);
        assert!(!validator.is_configured());
        assert_eq!(validator.validate("any-key"), None);
    }

    #[test]
    fn test_admin_key_validation() {
        let validator = ApiKeyValidator::new(Some("admin-secret".into()));
        assert_eq!(
            validator.validate("admin-secret"),
            Some(PermissionLevel::Admin)
        );
        assert_eq!(validator.validate("wrong-key"), None);
    }

    #[test]
    fn test_empty_key_treated_as_none() {
        assert!(!ApiKeyValidator::new(Some("".into())).is_configured());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
    }
}
