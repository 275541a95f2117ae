mod file_config;

pub use file_config::{FileConfig, MailConfig, ScanJobConfig};

use crate::engine::{ScanJobSettings, TimeBudget};
use crate::mail::SweepSettings;
use crate::scheduling::Cadence;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Slack added on top of budget + continuation delay when no lock TTL is set.
const DEFAULT_LOCK_TTL_SLACK_SECS: u64 = 60;

/// Longest backoff interval accepted from configuration.
const MAX_BACKOFF_LIMIT_SECS: u64 = 365 * 86400;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub execution_ceiling_secs: u64,
}

/// Engine settings for one daily scan job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    pub batch_size: usize,
    pub execution_ceiling_secs: u64,
    pub safety_margin_secs: u64,
    pub max_budget_secs: u64,
    pub daily_hour: u32,
    pub daily_minute: u32,
    pub lock_ttl_secs: u64,
    pub continuation_delay_secs: u64,
}

impl JobSettings {
    pub fn time_budget(&self) -> TimeBudget {
        TimeBudget::new(
            Duration::from_secs(self.execution_ceiling_secs),
            Duration::from_secs(self.safety_margin_secs),
            Duration::from_secs(self.max_budget_secs),
        )
    }

    pub fn scan_settings(&self) -> ScanJobSettings {
        ScanJobSettings {
            batch_size: self.batch_size,
            budget: self.time_budget(),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            continuation_delay: Duration::from_secs(self.continuation_delay_secs),
        }
    }

    pub fn cadence(&self) -> Cadence {
        Cadence::Daily {
            hour: self.daily_hour,
            minute: self.daily_minute,
        }
    }

    fn resolve(
        file: Option<ScanJobConfig>,
        execution_ceiling_secs: u64,
        daily_hour: u32,
        daily_minute: u32,
    ) -> Self {
        let file = file.unwrap_or_default();
        let execution_ceiling_secs = file.execution_ceiling_secs.unwrap_or(execution_ceiling_secs);
        let safety_margin_secs = file.safety_margin_secs.unwrap_or(15);
        let max_budget_secs = file.max_budget_secs.unwrap_or(300);
        let continuation_delay_secs = file.continuation_delay_secs.unwrap_or(60);

        let budget_secs = TimeBudget::new(
            Duration::from_secs(execution_ceiling_secs),
            Duration::from_secs(safety_margin_secs),
            Duration::from_secs(max_budget_secs),
        )
        .budget()
        .as_secs();
        let lock_ttl_secs = file.lock_ttl_secs.unwrap_or(
            budget_secs + continuation_delay_secs + DEFAULT_LOCK_TTL_SLACK_SECS,
        );

        Self {
            batch_size: file.batch_size.unwrap_or(100),
            execution_ceiling_secs,
            safety_margin_secs,
            max_budget_secs,
            daily_hour: file.daily_hour.unwrap_or(daily_hour),
            daily_minute: file.daily_minute.unwrap_or(daily_minute),
            lock_ttl_secs,
            continuation_delay_secs,
        }
    }

    fn validate(&self, job_name: &str) -> Result<()> {
        if self.daily_hour >= 24 {
            bail!("{}: daily_hour must be < 24, got {}", job_name, self.daily_hour);
        }
        if self.daily_minute >= 60 {
            bail!(
                "{}: daily_minute must be < 60, got {}",
                job_name,
                self.daily_minute
            );
        }
        if let Err(e) = self.scan_settings().validate() {
            bail!("{}: {}", job_name, e);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryStatusSettings {
    pub job: JobSettings,
    /// Ongoing stories without a new chapter for this long go on hiatus.
    pub hiatus_after_days: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeaturedStoriesSettings {
    pub job: JobSettings,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailTransportKind {
    #[default]
    Log,
    Http,
}

impl MailTransportKind {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "log" => Some(MailTransportKind::Log),
            "http" => Some(MailTransportKind::Http),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub max_backoff_secs: u64,
    pub chunk_size: usize,
    pub chunk_delay_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_lock_ttl_secs: u64,
    pub execution_ceiling_secs: u64,
    pub sweep_safety_margin_secs: u64,
    pub sweep_max_budget_secs: u64,
    pub transport: MailTransportKind,
    pub http_endpoint: Option<String>,
    pub http_token: Option<String>,
    pub http_timeout_secs: u64,
    pub from_address: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 1800,
            max_backoff_secs: 7 * 86400,
            chunk_size: 50,
            chunk_delay_secs: 60,
            sweep_interval_secs: 300,
            sweep_lock_ttl_secs: 600,
            execution_ceiling_secs: 60,
            sweep_safety_margin_secs: 15,
            sweep_max_budget_secs: 300,
            transport: MailTransportKind::Log,
            http_endpoint: None,
            http_token: None,
            http_timeout_secs: 30,
            from_address: "noreply@archive.local".to_string(),
        }
    }
}

impl MailSettings {
    /// Time allowance of one sweep invocation.
    pub fn sweep_budget(&self) -> TimeBudget {
        TimeBudget::new(
            Duration::from_secs(self.execution_ceiling_secs),
            Duration::from_secs(self.sweep_safety_margin_secs),
            Duration::from_secs(self.sweep_max_budget_secs),
        )
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            batch_size: self.chunk_size,
            budget: self.sweep_budget(),
            lock_ttl: Duration::from_secs(self.sweep_lock_ttl_secs),
        }
    }

    fn resolve(file: Option<MailConfig>, execution_ceiling_secs: u64) -> Result<Self> {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        let transport = match file.transport {
            Some(s) => match MailTransportKind::parse(&s) {
                Some(kind) => kind,
                None => bail!("Unknown mail transport: {} (expected log or http)", s),
            },
            None => defaults.transport,
        };

        let settings = Self {
            max_attempts: file.max_attempts.unwrap_or(defaults.max_attempts),
            backoff_base_secs: file.backoff_base_secs.unwrap_or(defaults.backoff_base_secs),
            max_backoff_secs: file.max_backoff_secs.unwrap_or(defaults.max_backoff_secs),
            chunk_size: file.chunk_size.unwrap_or(defaults.chunk_size),
            chunk_delay_secs: file.chunk_delay_secs.unwrap_or(defaults.chunk_delay_secs),
            sweep_interval_secs: file
                .sweep_interval_secs
                .unwrap_or(defaults.sweep_interval_secs),
            sweep_lock_ttl_secs: file
                .sweep_lock_ttl_secs
                .unwrap_or(defaults.sweep_lock_ttl_secs),
            execution_ceiling_secs: file
                .execution_ceiling_secs
                .unwrap_or(execution_ceiling_secs),
            sweep_safety_margin_secs: file
                .sweep_safety_margin_secs
                .unwrap_or(defaults.sweep_safety_margin_secs),
            sweep_max_budget_secs: file
                .sweep_max_budget_secs
                .unwrap_or(defaults.sweep_max_budget_secs),
            transport,
            http_endpoint: file.http_endpoint,
            http_token: file.http_token,
            http_timeout_secs: file.http_timeout_secs.unwrap_or(defaults.http_timeout_secs),
            from_address: file.from_address.unwrap_or(defaults.from_address),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            bail!("mail.max_attempts must be >= 1");
        }
        if self.chunk_size == 0 {
            bail!("mail.chunk_size must be > 0");
        }
        if self.backoff_base_secs == 0 {
            bail!("mail.backoff_base_secs must be > 0");
        }
        let sweep_run_secs = self.sweep_budget().budget().as_secs() + self.http_timeout_secs;
        if self.sweep_lock_ttl_secs <= sweep_run_secs {
            bail!(
                "mail.sweep_lock_ttl_secs {} must exceed sweep budget plus http_timeout_secs ({})",
                self.sweep_lock_ttl_secs,
                sweep_run_secs
            );
        }
        if self.max_backoff_secs > MAX_BACKOFF_LIMIT_SECS {
            bail!(
                "mail.max_backoff_secs must be <= {}, got {}",
                MAX_BACKOFF_LIMIT_SECS,
                self.max_backoff_secs
            );
        }
        if self.transport == MailTransportKind::Http && self.http_endpoint.is_none() {
            bail!("mail.http_endpoint is required when mail.transport = \"http\"");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub author_demotion: JobSettings,
    pub story_status: StoryStatusSettings,
    pub featured_stories: FeaturedStoriesSettings,
    pub mail: MailSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let execution_ceiling_secs = file
            .execution_ceiling_secs
            .unwrap_or(cli.execution_ceiling_secs);

        // Staggered so the daily jobs don't all wake at once.
        let author_demotion = JobSettings::resolve(file.author_demotion, execution_ceiling_secs, 3, 0);
        author_demotion.validate("author_demotion")?;

        let story_status_file = file.story_status;
        let hiatus_after_days = story_status_file
            .as_ref()
            .and_then(|f| f.hiatus_after_days)
            .unwrap_or(90);
        let story_status = StoryStatusSettings {
            job: JobSettings::resolve(story_status_file, execution_ceiling_secs, 3, 20),
            hiatus_after_days,
        };
        story_status.job.validate("story_status")?;

        let featured_file = file.featured_stories;
        let threshold = featured_file
            .as_ref()
            .and_then(|f| f.featured_threshold)
            .unwrap_or(50.0);
        let featured_stories = FeaturedStoriesSettings {
            job: JobSettings::resolve(featured_file, execution_ceiling_secs, 3, 40),
            threshold,
        };
        featured_stories.job.validate("featured_stories")?;

        let mail = MailSettings::resolve(file.mail, execution_ceiling_secs)?;

        Ok(Self {
            db_dir,
            author_demotion,
            story_status,
            featured_stories,
            mail,
        })
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.db_dir.join("state.db")
    }

    pub fn content_db_path(&self) -> PathBuf {
        self.db_dir.join("content.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_temp_db_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    fn cli_for(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(dir.path().to_path_buf()),
            execution_ceiling_secs: 60,
        }
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = make_temp_db_dir();
        let config = AppConfig::resolve(&cli_for(&temp_dir), None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        let job = &config.author_demotion;
        assert_eq!(job.batch_size, 100);
        assert_eq!(job.execution_ceiling_secs, 60);
        assert_eq!(job.time_budget().budget(), Duration::from_secs(45));
        assert_eq!(job.lock_ttl_secs, 165);
        assert_eq!(config.story_status.hiatus_after_days, 90);
        assert_eq!(config.featured_stories.threshold, 50.0);
        assert_eq!(config.mail, MailSettings::default());
    }

    #[test]
    fn test_default_schedule_is_staggered() {
        let temp_dir = make_temp_db_dir();
        let config = AppConfig::resolve(&cli_for(&temp_dir), None).unwrap();

        assert_eq!(
            config.author_demotion.cadence(),
            Cadence::Daily { hour: 3, minute: 0 }
        );
        assert_eq!(
            config.story_status.job.cadence(),
            Cadence::Daily { hour: 3, minute: 20 }
        );
        assert_eq!(
            config.featured_stories.job.cadence(),
            Cadence::Daily { hour: 3, minute: 40 }
        );
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = make_temp_db_dir();
        let other_dir = make_temp_db_dir();
        let file: FileConfig = toml::from_str(&format!(
            r#"
            db_dir = "{}"
            execution_ceiling_secs = 120

            [story_status]
            execution_ceiling_secs = 30
            hiatus_after_days = 14

            [featured_stories]
            featured_threshold = 12.5

            [mail]
            max_attempts = 5
            "#,
            other_dir.path().display()
        ))
        .unwrap();

        let config = AppConfig::resolve(&cli_for(&temp_dir), Some(file)).unwrap();

        assert_eq!(config.db_dir, other_dir.path());
        assert_eq!(config.author_demotion.execution_ceiling_secs, 120);
        assert_eq!(config.story_status.job.execution_ceiling_secs, 30);
        assert_eq!(config.story_status.hiatus_after_days, 14);
        assert_eq!(config.featured_stories.threshold, 12.5);
        assert_eq!(config.mail.max_attempts, 5);
    }

    #[test]
    fn test_lock_ttl_defaults_follow_budget() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            execution_ceiling_secs: 900,
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        // budget capped at 300, plus 60 continuation, plus 60 slack
        assert_eq!(config.author_demotion.lock_ttl_secs, 420);
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let cli = CliConfig {
            db_dir: None,
            execution_ceiling_secs: 60,
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("db_dir"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/to/db")),
            execution_ceiling_secs: 60,
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
            execution_ceiling_secs: 60,
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_rejects_invalid_daily_time() {
        let temp_dir = make_temp_db_dir();
        let file: FileConfig = toml::from_str("[author_demotion]\ndaily_hour = 24\n").unwrap();
        let err = AppConfig::resolve(&cli_for(&temp_dir), Some(file)).unwrap_err();
        assert!(err.to_string().contains("daily_hour"));

        let file: FileConfig = toml::from_str("[story_status]\ndaily_minute = 60\n").unwrap();
        let err = AppConfig::resolve(&cli_for(&temp_dir), Some(file)).unwrap_err();
        assert!(err.to_string().contains("daily_minute"));
    }

    #[test]
    fn test_rejects_lock_ttl_shorter_than_run() {
        let temp_dir = make_temp_db_dir();
        let file: FileConfig = toml::from_str("[author_demotion]\nlock_ttl_secs = 90\n").unwrap();

        let err = AppConfig::resolve(&cli_for(&temp_dir), Some(file)).unwrap_err();

        assert!(err.to_string().contains("lock_ttl"));
    }

    #[test]
    fn test_rejects_zero_batch_and_chunk_sizes() {
        let temp_dir = make_temp_db_dir();
        let file: FileConfig = toml::from_str("[featured_stories]\nbatch_size = 0\n").unwrap();
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_err());

        let file: FileConfig = toml::from_str("[mail]\nchunk_size = 0\n").unwrap();
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_err());

        let file: FileConfig = toml::from_str("[mail]\nmax_attempts = 0\n").unwrap();
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_err());
    }

    #[test]
    fn test_rejects_zero_backoff_base() {
        let temp_dir = make_temp_db_dir();
        let file: FileConfig = toml::from_str("[mail]\nbackoff_base_secs = 0\n").unwrap();

        let err = AppConfig::resolve(&cli_for(&temp_dir), Some(file)).unwrap_err();

        assert!(err.to_string().contains("backoff_base_secs"));
    }

    #[test]
    fn test_sweep_budget_follows_ceiling() {
        let temp_dir = make_temp_db_dir();
        let config = AppConfig::resolve(&cli_for(&temp_dir), None).unwrap();

        let sweep = config.mail.sweep_settings();
        assert_eq!(sweep.budget.budget(), Duration::from_secs(45));
        assert_eq!(sweep.batch_size, 50);
        assert_eq!(sweep.lock_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_rejects_sweep_lock_ttl_shorter_than_sweep() {
        let temp_dir = make_temp_db_dir();
        // 45s budget plus 30s http timeout
        let file: FileConfig = toml::from_str("[mail]\nsweep_lock_ttl_secs = 75\n").unwrap();
        let err = AppConfig::resolve(&cli_for(&temp_dir), Some(file)).unwrap_err();
        assert!(err.to_string().contains("sweep_lock_ttl_secs"));

        let file: FileConfig = toml::from_str("[mail]\nsweep_lock_ttl_secs = 76\n").unwrap();
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_ok());
    }

    #[test]
    fn test_http_transport_requires_endpoint() {
        let temp_dir = make_temp_db_dir();
        let file: FileConfig = toml::from_str("[mail]\ntransport = \"http\"\n").unwrap();
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_err());

        let file: FileConfig = toml::from_str(
            "[mail]\ntransport = \"HTTP\"\nhttp_endpoint = \"https://mail.example.com/send\"\n",
        )
        .unwrap();
        let config = AppConfig::resolve(&cli_for(&temp_dir), Some(file)).unwrap();
        assert_eq!(config.mail.transport, MailTransportKind::Http);

        let file: FileConfig = toml::from_str("[mail]\ntransport = \"pigeon\"\n").unwrap();
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_err());
    }

    #[test]
    fn test_db_path_helpers() {
        let temp_dir = make_temp_db_dir();
        let config = AppConfig::resolve(&cli_for(&temp_dir), None).unwrap();

        assert_eq!(config.state_db_path(), temp_dir.path().join("state.db"));
        assert_eq!(config.content_db_path(), temp_dir.path().join("content.db"));
    }
}
