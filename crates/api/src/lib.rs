//! # MailPilot API
//!
//! HTTP application layer - routes, wiring and the server entry point.
//!
//! This crate contains:
//! - Route handlers (push webhook, scheduled triggers, admin, health)
//! - Application context (dependency injection)
//! - Logging bootstrap
//!
//! ## Architecture
//! - Depends on `domain`, `core`, and `infra`
//! - Wires up the hexagonal architecture
//! - Exposes the pipeline over axum

pub mod commands;
pub mod context;
pub mod router;
pub mod utils;

pub use context::{AppContext, Providers};
pub use router::build_router;
pub use utils::errors::ApiError;
