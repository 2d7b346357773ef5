//! Email processing pipeline
//!
//! fetch -> parse -> resolve availability -> draft -> send, one job per
//! message id, each stage's output persisted through the ledger before the
//! next stage reads it.

pub mod draft;
pub mod recovery;
pub mod service;
pub mod settings;
pub mod slots;

pub use recovery::RecoverySweep;
pub use service::{EmailPipeline, JobOutcome, PipelineDeps};
pub use settings::PipelineSettings;
pub use slots::SlotPolicy;
