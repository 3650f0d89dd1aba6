//! HTTP surface — the REST endpoints the wizard calls.

pub mod routes;

pub use routes::{AppState, app_routes};
