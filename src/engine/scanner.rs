use super::budget::BatchWindow;
use super::job::JobError;
use crate::clock::Clock;
use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

/// Cursor position of a fresh cycle, before any key a candidate can have.
pub const MIN_SCAN_KEY: i64 = i64::MIN;

/// An item the scanner can page over.
pub trait Candidate {
    /// Strictly increasing sort key; pagination is by key, never by offset.
    /// Any value above [`MIN_SCAN_KEY`] is visited, including zero and
    /// negative keys.
    fn scan_key(&self) -> i64;
}

/// Fetches up to `limit` candidates with key strictly greater than
/// `after_key`, ascending by key.
pub trait CandidateSource<T>: Send + Sync {
    fn fetch_after(&self, after_key: i64, limit: usize) -> Result<Vec<T>>;
}

impl<T, F> CandidateSource<T> for F
where
    F: Fn(i64, usize) -> Result<Vec<T>> + Send + Sync,
{
    fn fetch_after(&self, after_key: i64, limit: usize) -> Result<Vec<T>> {
        self(after_key, limit)
    }
}

/// Applies the job's transition to one item.
///
/// Implementations must be idempotent: an item may be handed over again
/// after a crash or a restarted cycle, and the second application must have
/// no further effect.
pub trait ItemProcessor<T>: Send + Sync {
    fn process(&self, item: &T) -> Result<ItemOutcome>;
}

impl<T, F> ItemProcessor<T> for F
where
    F: Fn(&T) -> Result<ItemOutcome> + Send + Sync,
{
    fn process(&self, item: &T) -> Result<ItemOutcome> {
        self(item)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Transitioned,
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    pub scanned: usize,
    pub transitioned: usize,
    pub errors: usize,
    pub batches: usize,
    /// Cursor position when the scan stopped.
    pub last_key: i64,
    pub has_more: bool,
}

/// Runs fetch/process batches until the source is exhausted or the window
/// closes. The window is only checked between batches.
pub struct BatchScanner<'a, T> {
    job_id: &'a str,
    source: &'a dyn CandidateSource<T>,
    processor: &'a dyn ItemProcessor<T>,
    batch_size: usize,
    clock: &'a dyn Clock,
}

impl<'a, T: Candidate> BatchScanner<'a, T> {
    pub fn new(
        job_id: &'a str,
        source: &'a dyn CandidateSource<T>,
        processor: &'a dyn ItemProcessor<T>,
        batch_size: usize,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            job_id,
            source,
            processor,
            batch_size,
            clock,
        }
    }

    /// Scan forward from `start_after`.
    ///
    /// `checkpoint` is called with the new cursor after every full batch,
    /// before the deadline check, so whatever position the scan stops at
    /// with `has_more` set has already been persisted.
    pub fn run<F>(
        &self,
        start_after: i64,
        window: &BatchWindow,
        mut checkpoint: F,
    ) -> Result<ScanOutcome, JobError>
    where
        F: FnMut(i64) -> Result<(), JobError>,
    {
        let limit = self.batch_size.max(1);
        let mut outcome = ScanOutcome {
            last_key: start_after,
            ..Default::default()
        };
        let mut cursor = start_after;

        loop {
            let batch = self.source.fetch_after(cursor, limit)?;
            if batch.is_empty() {
                outcome.has_more = false;
                break;
            }

            let batch_len = batch.len();
            let batch_start = cursor;
            for item in &batch {
                let key = item.scan_key();
                if key <= cursor {
                    warn!(
                        "Job {}: source returned key {} at or behind cursor {}, ignoring",
                        self.job_id, key, cursor
                    );
                    continue;
                }

                outcome.scanned += 1;
                match self.processor.process(item) {
                    Ok(ItemOutcome::Transitioned) => outcome.transitioned += 1,
                    Ok(ItemOutcome::Unchanged) => {}
                    Err(e) => {
                        outcome.errors += 1;
                        warn!("Job {}: failed to process item {}: {:#}", self.job_id, key, e);
                    }
                }
                cursor = key;
            }
            outcome.batches += 1;

            if cursor == batch_start {
                warn!(
                    "Job {}: batch made no progress past cursor {}, treating scan as exhausted",
                    self.job_id, cursor
                );
                outcome.has_more = false;
                break;
            }

            outcome.has_more = batch_len >= limit;
            debug!(
                "Job {}: batch {} done, {} items, cursor now {}",
                self.job_id, outcome.batches, batch_len, cursor
            );
            if !outcome.has_more {
                break;
            }

            checkpoint(cursor)?;
            if window.is_expired(self.clock.now()) {
                break;
            }
        }

        outcome.last_key = cursor;
        Ok(outcome)
    }
}
