//! Watch registry, renewal and mailbox lifecycle
//!
//! The registry is the only writer of [`MailboxWatch`] and [`MailboxState`]
//! rows; renewal and lifecycle go through it.
//!
//! [`MailboxWatch`]: mailpilot_domain::MailboxWatch
//! [`MailboxState`]: mailpilot_domain::MailboxState

pub mod lifecycle;
pub mod ports;
pub mod registry;
pub mod renewal;

pub use lifecycle::MailboxLifecycle;
pub use ports::WatchRepository;
pub use registry::WatchRegistry;
pub use renewal::{MailboxRenewal, RenewalSettings, WatchRenewalService};
