//! Logging infrastructure for Turnstile
//!
//! Operational logs go through `tracing`; the audit trail of grant and
//! delivery state transitions is appended as JSONL by `AuditLogger`.

pub mod audit;

pub use audit::{AuditEvent, AuditEventType, AuditLogger};
