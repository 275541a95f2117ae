//! The concrete jobs this service runs, and the wiring that builds them from
//! configuration.
//!
//! Scan jobs (`author_demotion`, `story_status`, `featured_stories`) are
//! [`ResumableJob`]s fired daily. Mail delivery adds the per-chunk
//! dispatcher and the recurring queue sweep.

pub mod author_demotion;
pub mod featured_stories;
pub mod mail_sweep;
pub mod publication;
pub mod story_status;

pub use featured_stories::{Scorer, WeightedEngagementScorer};
pub use mail_sweep::MailSweep;
pub use publication::{PublicationEvent, PublicationNotifier};

use crate::config::{AppConfig, MailSettings, MailTransportKind};
use crate::content::ContentStore;
use crate::engine::{
    Candidate, JobContext, JobError, JobState, JobStateRepo, LockManager, ResumableJob, RunSummary,
};
use crate::mail::{
    BatchDispatcher, EmailQueue, FanOutSettings, FanOutSummary, HttpMailTransport,
    LogMailTransport, MailTransport, RetryPolicy, SweepSummary,
};
use crate::scheduling::{Cadence, Scheduler, WakeupHandler};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Name-addressable view of a scan job, whatever its candidate type.
pub trait ScanJob: Send + Sync {
    fn job_id(&self) -> &str;
    fn start_cycle(&self) -> Result<RunSummary, JobError>;
    fn run_batch(&self) -> Result<RunSummary, JobError>;
}

impl<T: Candidate> ScanJob for ResumableJob<T>
where
    ResumableJob<T>: Send + Sync,
{
    fn job_id(&self) -> &str {
        ResumableJob::job_id(self)
    }

    fn start_cycle(&self) -> Result<RunSummary, JobError> {
        ResumableJob::start_cycle(self)
    }

    fn run_batch(&self) -> Result<RunSummary, JobError> {
        ResumableJob::run_batch(self)
    }
}

/// A scan job with its wake-up handler and daily cadence.
pub struct ScheduledJob {
    pub job: Arc<dyn ScanJob>,
    pub handler: Arc<dyn WakeupHandler>,
    pub cadence: Cadence,
}

impl ScheduledJob {
    fn new<T: Candidate + 'static>(job: ResumableJob<T>, cadence: Cadence) -> Self
    where
        ResumableJob<T>: Send + Sync,
    {
        let job = Arc::new(job);
        Self {
            job: job.clone(),
            handler: job,
            cadence,
        }
    }
}

pub fn mail_transport(settings: &MailSettings) -> Result<Arc<dyn MailTransport>> {
    match settings.transport {
        MailTransportKind::Log => Ok(Arc::new(LogMailTransport::new(&settings.from_address))),
        MailTransportKind::Http => {
            let endpoint = settings
                .http_endpoint
                .as_deref()
                .context("mail.http_endpoint is required for the http transport")?;
            Ok(Arc::new(HttpMailTransport::new(
                endpoint,
                settings.http_token.clone(),
                &settings.from_address,
                Duration::from_secs(settings.http_timeout_secs),
            )?))
        }
    }
}

/// Every job of the service, built once from configuration.
pub struct Jobs {
    scan_jobs: Vec<ScheduledJob>,
    queue: Arc<EmailQueue>,
    dispatcher: Arc<BatchDispatcher>,
    mail_sweep: Arc<MailSweep>,
    publication: PublicationNotifier,
    content: Arc<dyn ContentStore>,
    state: JobStateRepo,
    sweep_interval_secs: u64,
}

impl Jobs {
    pub fn build(
        config: &AppConfig,
        content: Arc<dyn ContentStore>,
        transport: Arc<dyn MailTransport>,
        ctx: JobContext,
    ) -> Self {
        Self::build_with_scorer(
            config,
            content,
            transport,
            Arc::new(WeightedEngagementScorer::default()),
            ctx,
        )
    }

    pub fn build_with_scorer(
        config: &AppConfig,
        content: Arc<dyn ContentStore>,
        transport: Arc<dyn MailTransport>,
        scorer: Arc<dyn Scorer>,
        ctx: JobContext,
    ) -> Self {
        let scan_jobs = vec![
            ScheduledJob::new(
                author_demotion::build(&config.author_demotion, content.clone(), ctx.clone()),
                config.author_demotion.cadence(),
            ),
            ScheduledJob::new(
                story_status::build(&config.story_status, content.clone(), ctx.clone()),
                config.story_status.job.cadence(),
            ),
            ScheduledJob::new(
                featured_stories::build(
                    &config.featured_stories,
                    content.clone(),
                    scorer,
                    ctx.clone(),
                ),
                config.featured_stories.job.cadence(),
            ),
        ];

        let mail = &config.mail;
        let queue = Arc::new(EmailQueue::new(
            ctx.state_store.clone(),
            ctx.clock.clone(),
            RetryPolicy::new(mail),
        ));
        let dispatcher = Arc::new(BatchDispatcher::new(
            FanOutSettings {
                chunk_size: mail.chunk_size,
                chunk_delay: Duration::from_secs(mail.chunk_delay_secs),
            },
            ctx.scheduler.clone(),
            queue.clone(),
            transport.clone(),
            ctx.clock.clone(),
        ));
        let mail_sweep = Arc::new(MailSweep::new(
            queue.clone(),
            transport,
            LockManager::new(ctx.state_store.clone(), ctx.clock.clone()),
            mail.sweep_settings(),
        ));
        let publication = PublicationNotifier::new(content.clone(), dispatcher.clone());

        Self {
            scan_jobs,
            queue,
            dispatcher,
            mail_sweep,
            publication,
            content,
            state: JobStateRepo::new(ctx.state_store.clone(), ctx.clock.clone()),
            sweep_interval_secs: mail.sweep_interval_secs,
        }
    }

    pub fn scan_jobs(&self) -> &[ScheduledJob] {
        &self.scan_jobs
    }

    pub fn scan_job(&self, job_id: &str) -> Result<Arc<dyn ScanJob>, JobError> {
        self.scan_jobs
            .iter()
            .find(|s| s.job.job_id() == job_id)
            .map(|s| s.job.clone())
            .ok_or_else(|| JobError::UnknownJob(job_id.to_string()))
    }

    /// Every wake-up handler the host loop should route to.
    pub fn handlers(&self) -> Vec<Arc<dyn WakeupHandler>> {
        let mut handlers: Vec<Arc<dyn WakeupHandler>> =
            self.scan_jobs.iter().map(|s| s.handler.clone()).collect();
        handlers.push(self.dispatcher.clone());
        handlers.push(self.mail_sweep.clone());
        handlers
    }

    /// Register the daily scan cycles and the mail sweep. Safe to call on
    /// every start; unchanged registrations keep their fire times.
    pub fn register_recurring(
        &self,
        scheduler: &dyn Scheduler,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        for scheduled in &self.scan_jobs {
            register(scheduler, scheduled.job.job_id(), scheduled.cadence.clone(), now)?;
        }
        register(
            scheduler,
            mail_sweep::JOB_ID,
            Cadence::Every {
                interval_secs: self.sweep_interval_secs,
            },
            now,
        )
    }

    pub fn job_states(&self) -> Result<Vec<JobState>, JobError> {
        self.scan_jobs
            .iter()
            .map(|s| self.state.load(s.job.job_id()))
            .collect()
    }

    pub fn notify_publication(&self, story_id: i64, chapter: Option<u32>) -> Result<FanOutSummary> {
        let event = PublicationEvent::for_story(self.content.as_ref(), story_id, chapter)?;
        self.publication.notify(&event)
    }

    pub fn sweep(&self) -> Result<SweepSummary> {
        self.mail_sweep.run()
    }

    pub fn queue(&self) -> &EmailQueue {
        &self.queue
    }
}

fn register(
    scheduler: &dyn Scheduler,
    job_id: &str,
    cadence: Cadence,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    let first_fire_at = cadence
        .next_after(now)
        .with_context(|| format!("Cadence {} for {} never fires", cadence, job_id))?;
    info!("Scheduling {} {}, first at {}", job_id, cadence, first_fire_at);
    scheduler.schedule_recurring(job_id, cadence, first_fire_at)
}
