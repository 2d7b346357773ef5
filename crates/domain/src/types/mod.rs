//! Domain types and models

pub mod job;
pub mod message;
pub mod scheduling;
pub mod watch;

pub use job::{
    Admission, JobLease, JobOutputs, JobStatus, ProcessingJob, SendIntent, StageOutput,
};
pub use message::{normalize_address, OutgoingReply, RawMessage, SendReceipt};
pub use scheduling::{
    AvailabilityResult, DraftReply, EventDraft, FreeBusyQuery, IntentParse, ParsedIntent,
    PromptVariant, ReplyKind, ReplyRequest, TimeWindow,
};
pub use watch::{
    ConnectedMailbox, CursorAdvance, HistoryPage, HistoryRange, HistoryRecord,
    HistoryResolution, MailboxState, MailboxStatus, MailboxWatch, Notification,
    RenewalOutcome, WatchRegistration,
};
