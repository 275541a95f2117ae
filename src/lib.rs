//! Archive Jobs Library
//!
//! Resumable, time-budgeted batch scans over the story archive, plus the
//! notification fan-out and retrying mail queue. The binary wires these into
//! a wake-up loop; the library is exposed for tests and embedding.

pub mod clock;
pub mod config;
pub mod content;
pub mod engine;
pub mod jobs;
pub mod mail;
pub mod scheduling;
pub mod sqlite_persistence;
pub mod state_store;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{JobContext, JobError, ResumableJob, RunSummary};
pub use jobs::Jobs;
pub use state_store::{InMemoryStateStore, SqliteStateStore, StateStore};
