//! Application constants
//!
//! Centralized location for domain-level constants shared by the pipeline,
//! the adapters and the HTTP surface.

// Pipeline defaults
/// Timeout for a single provider call.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
/// Attempts per pipeline stage before the job fails.
pub const DEFAULT_STAGE_MAX_ATTEMPTS: u32 = 5;
/// First retry delay.
pub const DEFAULT_STAGE_BASE_DELAY_MS: u64 = 1_000;
/// Multiplier applied to each successive delay.
pub const DEFAULT_STAGE_BACKOFF_FACTOR: u32 = 2;
/// Upper bound on any retry delay.
pub const DEFAULT_STAGE_MAX_DELAY_MS: u64 = 30_000;
/// Lease length; past it a running job counts as abandoned.
pub const DEFAULT_JOB_LIVENESS_SECS: u64 = 600;
/// Times a job may be picked up before it is failed.
pub const DEFAULT_MAX_JOB_RUNS: u32 = 3;

// Slot selection
/// Step between candidate alternative start times.
pub const DEFAULT_SLOT_GRANULARITY_MINUTES: u32 = 15;
/// Alternatives offered when no requested slot is free.
pub const DEFAULT_MAX_ALTERNATIVES: usize = 3;
/// Days searched for alternatives.
pub const DEFAULT_ALTERNATIVE_SEARCH_DAYS: u32 = 5;
/// First bookable hour, local time.
pub const DEFAULT_BUSINESS_START_HOUR: u32 = 9;
/// Hour by which meetings must end, local time.
pub const DEFAULT_BUSINESS_END_HOUR: u32 = 17;
/// Meeting length when the request does not state one.
pub const DEFAULT_MEETING_MINUTES: u32 = 30;

// Watch renewal
/// Six-field cron expression for the renewal sweep.
pub const DEFAULT_RENEWAL_CRON: &str = "0 0 */6 * * *";
/// Renew watches expiring within this many hours.
pub const DEFAULT_RENEWAL_LEAD_HOURS: u64 = 24;
/// Consecutive renewal failures before a mailbox is suspended.
pub const DEFAULT_MAX_RENEWAL_FAILURES: u32 = 3;

// Recovery and intake
/// Six-field cron expression for the recovery sweep.
pub const DEFAULT_RECOVERY_CRON: &str = "0 */5 * * * *";
/// Jobs resumed per recovery run.
pub const DEFAULT_RECOVERY_BATCH: usize = 50;
/// Notifications processed in parallel.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 8;
/// Bounded intake queue size.
pub const DEFAULT_INTAKE_CAPACITY: usize = 256;
/// Recent messages scanned after the history cursor expires.
pub const DEFAULT_RESYNC_LIMIT: usize = 50;

// Draft templating
/// Marker in model prose replaced by the rendered times.
pub const SLOT_PLACEHOLDER: &str = "{{TIMES}}";
/// Header stamped on sent replies so they are never answered.
pub const REPLY_MARKER_HEADER: &str = "X-MailPilot-Reply";
/// Right-hand side of generated `Message-ID`s.
pub const MESSAGE_ID_DOMAIN: &str = "mailpilot.local";

// Error text stored on jobs is capped
/// Longest error text stored on a job.
pub const MAX_ERROR_LENGTH: usize = 256;
