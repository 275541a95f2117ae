#![allow(dead_code)]

use archive_jobs::clock::{Clock, ManualClock};
use archive_jobs::config::{AppConfig, CliConfig, FileConfig};
use archive_jobs::content::SqliteContentStore;
use archive_jobs::engine::JobContext;
use archive_jobs::jobs::Jobs;
use archive_jobs::mail::MailTransport;
use archive_jobs::scheduling::{StoreScheduler, WakeupHandler};
use archive_jobs::state_store::SqliteStateStore;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestHarness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub config: AppConfig,
    pub state_store: Arc<SqliteStateStore>,
    pub content: Arc<SqliteContentStore>,
    pub scheduler: Arc<StoreScheduler>,
    pub transport: Arc<dyn MailTransport>,
    pub jobs: Jobs,
}

impl TestHarness {
    /// Build with the given TOML config (db_dir is filled in).
    pub fn new(toml_config: &str, transport: Arc<dyn MailTransport>) -> Self {
        let dir = TempDir::new().unwrap();
        let file_config: FileConfig = toml::from_str(toml_config).unwrap();
        let config = AppConfig::resolve(
            &CliConfig {
                db_dir: Some(dir.path().to_path_buf()),
                execution_ceiling_secs: 60,
            },
            Some(file_config),
        )
        .unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        Self::open(dir, clock, config, transport)
    }

    fn open(
        dir: TempDir,
        clock: Arc<ManualClock>,
        config: AppConfig,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let state_store =
            Arc::new(SqliteStateStore::new(config.state_db_path(), clock.clone()).unwrap());
        let content = Arc::new(SqliteContentStore::new(config.content_db_path()).unwrap());
        let scheduler = Arc::new(StoreScheduler::new(state_store.clone()));
        let ctx = JobContext::new(state_store.clone(), scheduler.clone(), clock.clone());
        let jobs = Jobs::build(&config, content.clone(), transport.clone(), ctx);
        Self {
            dir,
            clock,
            config,
            state_store,
            content,
            scheduler,
            transport,
            jobs,
        }
    }

    /// Drop every in-memory object and reopen from the same database files,
    /// as a restarted process would.
    pub fn restart(self) -> Self {
        let TestHarness {
            dir,
            clock,
            config,
            transport,
            ..
        } = self;
        Self::open(dir, clock, config, transport)
    }

    pub fn ctx(&self) -> JobContext {
        JobContext::new(
            self.state_store.clone(),
            self.scheduler.clone(),
            self.clock.clone(),
        )
    }

    pub fn handler(&self, job_name: &str) -> Arc<dyn WakeupHandler> {
        self.jobs
            .handlers()
            .into_iter()
            .find(|h| h.job_name() == job_name)
            .unwrap_or_else(|| panic!("no handler for {}", job_name))
    }

    /// Take every due wake-up and run its handler inline. Returns how many ran.
    pub fn fire_due(&self) -> usize {
        let due = self.scheduler.take_due(self.clock.now()).unwrap();
        let handlers = self.jobs.handlers();
        for wakeup in &due {
            let handler = handlers
                .iter()
                .find(|h| h.job_name() == wakeup.job_name)
                .unwrap_or_else(|| panic!("no handler for {}", wakeup.job_name));
            handler.handle(wakeup).unwrap();
        }
        due.len()
    }
}
