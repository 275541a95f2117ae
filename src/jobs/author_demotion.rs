//! Demotes authors who have nothing published back to readers.

use crate::config::JobSettings;
use crate::content::{Account, AccountRole, ContentStore};
use crate::engine::{CandidateSource, ItemOutcome, ItemProcessor, JobContext, ResumableJob};
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

pub const JOB_ID: &str = "author_demotion";

pub struct AuthorDemotion {
    store: Arc<dyn ContentStore>,
}

impl AuthorDemotion {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }
}

impl CandidateSource<Account> for AuthorDemotion {
    fn fetch_after(&self, after_key: i64, limit: usize) -> Result<Vec<Account>> {
        self.store.authors_after(after_key, limit)
    }
}

impl ItemProcessor<Account> for AuthorDemotion {
    fn process(&self, account: &Account) -> Result<ItemOutcome> {
        if account.role == AccountRole::Reader {
            return Ok(ItemOutcome::Unchanged);
        }
        if self.store.published_story_count(account.id)? > 0 {
            return Ok(ItemOutcome::Unchanged);
        }
        if self.store.set_account_role(account.id, AccountRole::Reader)? {
            debug!("Demoted author {} ({}) to reader", account.id, account.handle);
            Ok(ItemOutcome::Transitioned)
        } else {
            Ok(ItemOutcome::Unchanged)
        }
    }
}

pub fn build(
    settings: &JobSettings,
    store: Arc<dyn ContentStore>,
    ctx: JobContext,
) -> ResumableJob<Account> {
    let job = Arc::new(AuthorDemotion::new(store));
    ResumableJob::new(
        JOB_ID,
        settings.scan_settings(),
        job.clone(),
        job,
        ctx,
    )
}
