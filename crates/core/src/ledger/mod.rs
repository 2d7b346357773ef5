//! Idempotency ledger
//!
//! Owns every [`ProcessingJob`] row. Admission, stage advances and terminal
//! transitions are compare-and-set writes on the job's version, so two
//! workers racing on one message id cannot both make progress.
//!
//! [`ProcessingJob`]: mailpilot_domain::ProcessingJob

pub mod ports;
pub mod service;

pub use ports::JobRepository;
pub use service::{IdempotencyLedger, LedgerSettings};
