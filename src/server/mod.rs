//! HTTP server for Turnstile

pub mod http;

pub use http::{handle_request, route, run, AppState};
