use super::job::JobError;
use super::lock::LockRecord;
use super::scanner::MIN_SCAN_KEY;
use super::{cursor_key, lock_key};
use crate::clock::Clock;
use crate::state_store::{get_json, set_json, update_json, StateStore};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Resumption point of an in-progress scan cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    /// Key of the last item the scanner moved past. Zero at cycle start.
    pub last_key: i64,
    pub cycle_started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything persisted about one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub cursor: Option<CursorRecord>,
    pub lock: Option<LockRecord>,
}

/// Typed access to per-job cursor state.
#[derive(Clone)]
pub struct JobStateRepo {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl JobStateRepo {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn load(&self, job_id: &str) -> Result<JobState, JobError> {
        Ok(JobState {
            job_id: job_id.to_string(),
            cursor: self.cursor(job_id)?,
            lock: get_json(self.store.as_ref(), &lock_key(job_id))?,
        })
    }

    pub fn cursor(&self, job_id: &str) -> Result<Option<CursorRecord>, JobError> {
        Ok(get_json(self.store.as_ref(), &cursor_key(job_id))?)
    }

    /// Reset the cursor to the minimum key for a fresh cycle.
    pub fn start_cycle(&self, job_id: &str) -> Result<CursorRecord, JobError> {
        let now = self.clock.now();
        let record = CursorRecord {
            last_key: MIN_SCAN_KEY,
            cycle_started_at: now,
            updated_at: now,
        };
        set_json(self.store.as_ref(), &cursor_key(job_id), &record, None)?;
        Ok(record)
    }

    /// Persist a new cursor position. It must be strictly past the stored one.
    pub fn advance(&self, job_id: &str, last_key: i64) -> Result<CursorRecord, JobError> {
        let now = self.clock.now();
        let mut regression: Option<i64> = None;
        let mut written: Option<CursorRecord> = None;

        update_json::<CursorRecord, _>(self.store.as_ref(), &cursor_key(job_id), None, |current| {
            regression = None;
            let cycle_started_at = match &current {
                Some(cursor) if cursor.last_key >= last_key => {
                    regression = Some(cursor.last_key);
                    return None;
                }
                Some(cursor) => cursor.cycle_started_at,
                None => now,
            };
            let record = CursorRecord {
                last_key,
                cycle_started_at,
                updated_at: now,
            };
            written = Some(record.clone());
            Some(record)
        })?;

        if let Some(current) = regression {
            return Err(JobError::CursorRegression {
                job_id: job_id.to_string(),
                current,
                attempted: last_key,
            });
        }
        written.ok_or_else(|| JobError::Store(anyhow!("cursor for {} was not written", job_id)))
    }

    pub fn clear(&self, job_id: &str) -> Result<(), JobError> {
        Ok(self.store.delete(&cursor_key(job_id))?)
    }
}
