//! HTTP monitoring server.
//!
//! Exposes one headless page context over HTTP: run capabilities, inspect
//! live processes, and stop them by id, agent, or all at once. See
//! [`routes`] for the endpoint list.

pub mod routes;

pub use routes::{app_router, AppState};
