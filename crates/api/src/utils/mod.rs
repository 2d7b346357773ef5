//! Shared helpers for route handlers

pub mod auth;
pub mod errors;
pub mod health;
/// Tracing subscriber setup and request logging.
pub mod logging;
