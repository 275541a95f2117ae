//! The resumable batch-scan engine.
//!
//! A job is a [`ResumableJob`]: it takes a per-job [`LockManager`] lock,
//! loads its cursor from the [`JobStateRepo`], lets a [`BatchScanner`] walk
//! candidates in key order until the data runs out or the [`TimeBudget`] is
//! spent, then either clears the cursor or schedules a continuation.

mod budget;
mod context;
mod cursor;
mod job;
mod lock;
mod scanner;

pub use budget::{BatchWindow, TimeBudget, MIN_BUDGET};
pub use context::JobContext;
pub use cursor::{CursorRecord, JobState, JobStateRepo};
pub use job::{JobError, ResumableJob, RunSummary, ScanJobSettings};
pub use lock::{LockManager, LockRecord};
pub use scanner::{
    BatchScanner, Candidate, CandidateSource, ItemOutcome, ItemProcessor, ScanOutcome,
    MIN_SCAN_KEY,
};

pub(crate) fn cursor_key(job_id: &str) -> String {
    format!("jobs/{}/cursor", job_id)
}

pub(crate) fn lock_key(job_id: &str) -> String {
    format!("jobs/{}/lock", job_id)
}
