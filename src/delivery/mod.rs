//! Secure delivery: single-file retrieval references and whole-asset bundles

pub mod bundle;
pub mod issuer;

pub use bundle::{Bundle, BundleComposer, BundleEntry};
pub use issuer::{DeliveryIssuer, RetrievalReference};
