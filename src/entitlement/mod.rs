//! Entitlement engine
//!
//! Decides what an identity may do with an asset and manages the grant state
//! those decisions are built from.

pub mod authorizer;
pub mod evaluator;
pub mod lifecycle;
pub mod model;
pub mod policy;
pub mod quota;

pub use authorizer::{Action, ActionAuthorizer, Authorization};
pub use evaluator::AccessEvaluator;
pub use lifecycle::GrantLifecycle;
pub use model::{AccessDecision, Identity, Restriction};
pub use quota::{QuotaLedger, Reservation};
