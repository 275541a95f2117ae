use anyhow::{Context, Result};
use archive_jobs::clock::{Clock, SystemClock};
use archive_jobs::config::{AppConfig, CliConfig, FileConfig};
use archive_jobs::content::SqliteContentStore;
use archive_jobs::engine::JobContext;
use archive_jobs::jobs::{mail_transport, Jobs};
use archive_jobs::scheduling::{StoreScheduler, WakeupLoop};
use archive_jobs::state_store::SqliteStateStore;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding state.db and content.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in it override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Wall-clock ceiling the host gives one job invocation.
    #[clap(long, default_value_t = 60)]
    pub execution_ceiling_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register recurring wake-ups and serve them until Ctrl+C.
    Run,

    /// Start a fresh cycle of a scan job and run its first batch window.
    StartCycle { job: String },

    /// Continue the cycle in progress of a scan job.
    RunBatch { job: String },

    /// Print job states, pending wake-ups and the mail queue.
    Status,

    /// Notify followers and subscribers about a publication.
    NotifyPublication {
        #[clap(long)]
        story_id: i64,

        /// Chapter number, when a chapter rather than a new story was published.
        #[clap(long)]
        chapter: Option<u32>,
    },

    /// Run the mail queue sweep once.
    Sweep,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            execution_ceiling_secs: self.execution_ceiling_secs,
        }
    }
}

struct Services {
    clock: Arc<dyn Clock>,
    state_store: Arc<SqliteStateStore>,
    scheduler: Arc<StoreScheduler>,
    jobs: Jobs,
}

fn open_services(config: &AppConfig) -> Result<Services> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    info!("Opening state database at {:?}...", config.state_db_path());
    let state_store = Arc::new(SqliteStateStore::new(
        config.state_db_path(),
        clock.clone(),
    )?);

    info!("Opening content database at {:?}...", config.content_db_path());
    let content = Arc::new(SqliteContentStore::new(config.content_db_path())?);

    let scheduler = Arc::new(StoreScheduler::new(state_store.clone()));
    let transport = mail_transport(&config.mail)?;
    let ctx = JobContext::new(state_store.clone(), scheduler.clone(), clock.clone());
    let jobs = Jobs::build(config, content, transport, ctx);

    Ok(Services {
        clock,
        state_store,
        scheduler,
        jobs,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_forever(services: Services) -> Result<()> {
    services
        .jobs
        .register_recurring(services.scheduler.as_ref(), services.clock.now())?;

    let purged = services.state_store.purge_expired()?;
    if purged > 0 {
        info!("Purged {} expired state entries", purged);
    }

    let shutdown_token = CancellationToken::new();
    let mut wakeup_loop = WakeupLoop::new(
        services.scheduler.as_ref().clone(),
        services.clock.clone(),
        shutdown_token.clone(),
    );
    for handler in services.jobs.handlers() {
        wakeup_loop.register(handler);
    }

    // Handlers run on blocking threads; the blocking HTTP client must not be
    // created or dropped inside the async context, so the runtime is scoped here.
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(async move {
        let signal_token = shutdown_token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
            signal_token.cancel();
        });

        wakeup_loop.run().await;
    });
    Ok(())
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;
    let services = open_services(&config)?;

    match cli_args.command {
        Command::Run => run_forever(services)?,
        Command::StartCycle { job } => {
            let summary = services.jobs.scan_job(&job)?.start_cycle()?;
            print_json(&summary)?;
        }
        Command::RunBatch { job } => {
            let summary = services.jobs.scan_job(&job)?.run_batch()?;
            print_json(&summary)?;
        }
        Command::Status => {
            let status = serde_json::json!({
                "jobs": services.jobs.job_states()?,
                "pending_wakeups": services.scheduler.pending()?,
                "mail_queue": services.jobs.queue().len()?,
                "failed_deliveries": services.jobs.queue().failed()?.len(),
            });
            print_json(&status)?;
        }
        Command::NotifyPublication { story_id, chapter } => {
            let summary = services.jobs.notify_publication(story_id, chapter)?;
            print_json(&summary)?;
        }
        Command::Sweep => {
            let summary = services.jobs.sweep()?;
            print_json(&summary)?;
        }
    }
    Ok(())
}
