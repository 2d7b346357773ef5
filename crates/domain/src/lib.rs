//! # MailPilot Domain
//!
//! Business domain types for the MailPilot scheduling pipeline.
//!
//! This crate contains:
//! - Mailbox watch, notification and history types
//! - Processing job state machine and stage payloads
//! - Domain error types and Result definitions
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other MailPilot crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
