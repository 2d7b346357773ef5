//! Notification intake and dispatch
//!
//! [`NotificationIntake`] runs on the request path and only decides whether a
//! push is worth queueing. [`NotificationProcessor`] runs off the request
//! path: it resolves the history range and feeds message ids to the pipeline.

pub mod processor;
pub mod service;

pub use processor::{DispatchResult, NotificationProcessor, NotificationReport, ResolutionSummary};
pub use service::{IgnoreReason, IntakeDecision, NotificationIntake};
