use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub execution_ceiling_secs: Option<u64>,

    // Per-job sections
    pub author_demotion: Option<ScanJobConfig>,
    pub story_status: Option<ScanJobConfig>,
    pub featured_stories: Option<ScanJobConfig>,
    pub mail: Option<MailConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScanJobConfig {
    pub batch_size: Option<usize>,
    pub execution_ceiling_secs: Option<u64>,
    pub safety_margin_secs: Option<u64>,
    pub max_budget_secs: Option<u64>,
    pub daily_hour: Option<u32>,
    pub daily_minute: Option<u32>,
    pub lock_ttl_secs: Option<u64>,
    pub continuation_delay_secs: Option<u64>,
    // Job-specific knobs, ignored by jobs that don't use them
    pub hiatus_after_days: Option<u32>,
    pub featured_threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MailConfig {
    pub max_attempts: Option<u32>,
    pub backoff_base_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub chunk_size: Option<usize>,
    pub chunk_delay_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub sweep_lock_ttl_secs: Option<u64>,
    pub execution_ceiling_secs: Option<u64>,
    pub sweep_safety_margin_secs: Option<u64>,
    pub sweep_max_budget_secs: Option<u64>,
    /// "log" or "http"
    pub transport: Option<String>,
    pub http_endpoint: Option<String>,
    pub http_token: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub from_address: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
