use super::lock_key;
use crate::clock::Clock;
use crate::state_store::{get_json, StateStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What a held lock looks like in the state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub job_id: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

/// TTL-bound mutual exclusion per job id.
///
/// Acquisition never waits: `false` means another invocation holds the lock
/// and the caller should skip this wake-up. A holder that dies without
/// releasing blocks the job for at most the TTL.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn acquire(&self, job_id: &str, ttl: Duration) -> Result<bool> {
        let record = LockRecord {
            job_id: job_id.to_string(),
            acquired_at: self.clock.now(),
            ttl_secs: ttl.as_secs(),
        };
        let acquired =
            self.store
                .set_if_absent(&lock_key(job_id), &serde_json::to_string(&record)?, Some(ttl))?;
        if !acquired {
            debug!("Lock for job {} is held, skipping", job_id);
        }
        Ok(acquired)
    }

    /// Drop the lock regardless of who holds it.
    pub fn release(&self, job_id: &str) -> Result<()> {
        self.store.delete(&lock_key(job_id))
    }

    /// The live lock for `job_id`, if any.
    pub fn current(&self, job_id: &str) -> Result<Option<LockRecord>> {
        get_json(self.store.as_ref(), &lock_key(job_id))
    }
}
