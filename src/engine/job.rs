use super::budget::TimeBudget;
use super::context::JobContext;
use super::cursor::JobStateRepo;
use super::lock::LockManager;
use super::scanner::{BatchScanner, Candidate, CandidateSource, ItemProcessor, ScanOutcome};
use crate::clock::chrono_duration;
use crate::scheduling::{Wakeup, WakeupHandler, WakeupKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("state store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("cursor for job {job_id} cannot move from {current} to {attempted}")]
    CursorRegression {
        job_id: String,
        current: i64,
        attempted: i64,
    },

    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),
}

/// Engine knobs for one scan job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJobSettings {
    pub batch_size: usize,
    pub budget: TimeBudget,
    /// Must outlive one invocation plus the continuation delay.
    pub lock_ttl: Duration,
    pub continuation_delay: Duration,
}

impl ScanJobSettings {
    pub fn validate(&self) -> Result<(), JobError> {
        if self.batch_size == 0 {
            return Err(JobError::InvalidConfig("batch_size must be > 0".to_string()));
        }
        let minimum_ttl = self.budget.budget() + self.continuation_delay;
        if self.lock_ttl <= minimum_ttl {
            return Err(JobError::InvalidConfig(format!(
                "lock_ttl {:?} must exceed budget plus continuation delay ({:?})",
                self.lock_ttl, minimum_ttl
            )));
        }
        Ok(())
    }
}

/// Result of one job invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub job_id: String,
    pub scanned: usize,
    pub transitioned: usize,
    pub errors: usize,
    pub has_more: bool,
    /// Another invocation held the lock; nothing was done.
    pub skipped_locked: bool,
    pub continuation_scheduled: bool,
}

impl RunSummary {
    fn empty(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            ..Default::default()
        }
    }

    fn from_outcome(job_id: &str, outcome: &ScanOutcome) -> Self {
        Self {
            job_id: job_id.to_string(),
            scanned: outcome.scanned,
            transitioned: outcome.transitioned,
            errors: outcome.errors,
            has_more: outcome.has_more,
            ..Default::default()
        }
    }
}

/// A batch-scan job: a candidate source and a transition plugged into the
/// lock / cursor / budget / continuation machinery.
pub struct ResumableJob<T> {
    job_id: String,
    settings: ScanJobSettings,
    source: Arc<dyn CandidateSource<T>>,
    processor: Arc<dyn ItemProcessor<T>>,
    locks: LockManager,
    state: JobStateRepo,
    ctx: JobContext,
}

impl<T: Candidate> ResumableJob<T> {
    pub fn new(
        job_id: impl Into<String>,
        settings: ScanJobSettings,
        source: Arc<dyn CandidateSource<T>>,
        processor: Arc<dyn ItemProcessor<T>>,
        ctx: JobContext,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            settings,
            source,
            processor,
            locks: LockManager::new(ctx.state_store.clone(), ctx.clock.clone()),
            state: JobStateRepo::new(ctx.state_store.clone(), ctx.clock.clone()),
            ctx,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn settings(&self) -> &ScanJobSettings {
        &self.settings
    }

    /// Begin a fresh cycle from the minimum key and run the first batch window.
    pub fn start_cycle(&self) -> Result<RunSummary, JobError> {
        self.invoke(true)
    }

    /// Continue the cycle in progress. Without a cursor there is nothing to
    /// continue and an empty summary is returned.
    pub fn run_batch(&self) -> Result<RunSummary, JobError> {
        self.invoke(false)
    }

    fn invoke(&self, fresh_cycle: bool) -> Result<RunSummary, JobError> {
        if !self.locks.acquire(&self.job_id, self.settings.lock_ttl)? {
            return Ok(RunSummary {
                skipped_locked: true,
                ..RunSummary::empty(&self.job_id)
            });
        }

        let result = self.run_locked(fresh_cycle);

        if let Err(e) = self.locks.release(&self.job_id) {
            warn!(
                "Failed to release lock for job {}, it will expire on its own: {:#}",
                self.job_id, e
            );
        }
        result
    }

    fn run_locked(&self, fresh_cycle: bool) -> Result<RunSummary, JobError> {
        let start_after = if fresh_cycle {
            info!("Starting job cycle: {}", self.job_id);
            self.state.start_cycle(&self.job_id)?.last_key
        } else {
            match self.state.cursor(&self.job_id)? {
                Some(cursor) => {
                    info!(
                        "Resuming job {} after key {}",
                        self.job_id, cursor.last_key
                    );
                    cursor.last_key
                }
                None => {
                    debug!("Job {} has no cycle in progress", self.job_id);
                    return Ok(RunSummary::empty(&self.job_id));
                }
            }
        };

        let window = self.settings.budget.window(self.ctx.clock.now());
        let scanner = BatchScanner::new(
            &self.job_id,
            self.source.as_ref(),
            self.processor.as_ref(),
            self.settings.batch_size,
            self.ctx.clock.as_ref(),
        );
        let outcome = scanner.run(start_after, &window, |key| {
            self.state.advance(&self.job_id, key).map(|_| ())
        })?;

        let mut summary = RunSummary::from_outcome(&self.job_id, &outcome);
        if outcome.has_more {
            summary.continuation_scheduled = self.schedule_continuation()?;
        } else {
            self.state.clear(&self.job_id)?;
            info!(
                "Job {} finished cycle: scanned {}, transitioned {}",
                self.job_id, summary.scanned, summary.transitioned
            );
        }

        if summary.errors > 0 {
            warn!(
                "Job {} had {} failed items out of {} scanned",
                self.job_id, summary.errors, summary.scanned
            );
        }
        Ok(summary)
    }

    fn schedule_continuation(&self) -> Result<bool, JobError> {
        if self.ctx.scheduler.has_pending_once(&self.job_id)? {
            debug!("Continuation for job {} already pending", self.job_id);
            return Ok(false);
        }
        let fire_at = self.ctx.clock.now() + chrono_duration(self.settings.continuation_delay);
        self.ctx.scheduler.schedule_once(&self.job_id, fire_at, None)?;
        info!("Job {} out of budget, continuation at {}", self.job_id, fire_at);
        Ok(true)
    }
}

impl<T: Candidate> WakeupHandler for ResumableJob<T>
where
    ResumableJob<T>: Send + Sync,
{
    fn job_name(&self) -> &str {
        &self.job_id
    }

    fn handle(&self, wakeup: &Wakeup) -> anyhow::Result<()> {
        let summary = match wakeup.kind {
            WakeupKind::Recurring { .. } => self.start_cycle()?,
            WakeupKind::Once => self.run_batch()?,
        };
        debug!("Job {} wake-up summary: {:?}", self.job_id, summary);
        Ok(())
    }
}
