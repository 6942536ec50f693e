//! Entitlement persistence
//!
//! `EntitlementStore` is the only seam between the engine and durable state.
//! MongoDB backs production; the in-memory store backs development and tests.

pub mod memory;
pub mod mongo;
pub mod mongo_store;
pub mod schemas;
pub mod store;

pub use memory::MemoryEntitlementStore;
pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
pub use mongo_store::MongoEntitlementStore;
pub use store::EntitlementStore;
