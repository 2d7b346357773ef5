//! # MailPilot Infrastructure
//!
//! Infrastructure implementations of core domain ports.
//!
//! This crate contains:
//! - Database implementations (SQLite via an r2d2 pool)
//! - HTTP client with retry, timeout and call metrics
//! - External service integrations (Gmail, Google Calendar, OpenAI)
//! - Configuration loading
//! - Cron-driven sweeps and the notification worker
//!
//! ## Architecture
//! - Implements traits defined in `mailpilot-core`
//! - Depends on `mailpilot-domain` and `mailpilot-core`
//! - Contains all "impure" code (I/O, network, timers)

pub mod config;
pub mod database;
pub mod dispatch;
pub mod errors;
pub mod http;
pub mod integrations;
pub mod observability;
pub mod scheduling;

// Re-export commonly used items
pub use database::{DbManager, SqliteJobRepository, SqliteMailboxRepository, SqliteWatchRepository};
pub use dispatch::{NotificationQueue, NotificationWorker, NotificationWorkerConfig};
pub use errors::InfraError;
pub use http::HttpClient;
pub use integrations::google::{GmailClient, GoogleCalendarClient, GoogleTokenManager};
pub use integrations::openai::OpenAIClient;
pub use observability::metrics::PipelineMetrics;
