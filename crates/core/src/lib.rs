//! # MailPilot Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for storage and the mail, calendar and
//!   completion capabilities
//! - The watch registry and renewal service
//! - The history cursor tracker
//! - The idempotency ledger and the per-message pipeline
//! - Notification intake and dispatch
//!
//! ## Architecture Principles
//! - Only depends on `mailpilot-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod clock;
pub mod history;
pub mod intake;
pub mod ledger;
pub mod pipeline;
pub mod retry;
pub mod watch;

// Infrastructure ports
pub mod mailbox_ports;
pub mod provider_ports;

pub use clock::{Clock, ManualClock, SystemClock};
pub use history::HistoryCursorTracker;
pub use intake::{
    DispatchResult, IgnoreReason, IntakeDecision, NotificationIntake, NotificationProcessor,
    NotificationReport, ResolutionSummary,
};
pub use ledger::ports::JobRepository;
pub use ledger::{IdempotencyLedger, LedgerSettings};
pub use mailbox_ports::MailboxDirectory;
pub use pipeline::{EmailPipeline, JobOutcome, PipelineDeps, PipelineSettings, RecoverySweep, SlotPolicy};
pub use provider_ports::{CalendarProvider, CompletionService, MailProvider};
pub use retry::RetryPolicy;
pub use watch::ports::WatchRepository;
pub use watch::{MailboxLifecycle, MailboxRenewal, RenewalSettings, WatchRegistry, WatchRenewalService};
