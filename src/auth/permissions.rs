//! Permission levels carried by caller tokens

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who is calling. Ordered so `level >= required` reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum PermissionLevel {
    /// Anonymous caller
    #[default]
    Public = 0,
    /// Authenticated storefront customer
    Customer = 1,
    /// Support and billing operators
    Admin = 2,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::Public => write!(f, "PUBLIC"),
            PermissionLevel::Customer => write!(f, "CUSTOMER"),
            PermissionLevel::Admin => write!(f, "ADMIN"),
        }
    }
}

impl PermissionLevel {
    /// Check if this level satisfies a requirement
    pub fn allows(self, required: PermissionLevel) -> bool {
        self >= required
    }
}
