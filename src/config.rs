use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::discovery::RepoFilters;

/// Main configuration structure for orgbackup
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Source organization on GitHub
    pub github: GitHubConfig,

    /// Repository filtering configuration
    #[serde(default)]
    pub repositories: RepositoryFilterConfig,

    /// Destination key -> destination specific settings.
    /// Each recognized key is decoded by the target registry.
    #[serde(default)]
    pub backup_targets: BTreeMap<String, serde_yaml::Value>,

    /// Concurrency and timeout settings
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Notification sinks
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// GitHub source configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Organization whose repositories are backed up
    pub organization: String,

    /// Token, literal or `${VAR}` placeholder
    #[serde(default)]
    pub token: String,

    /// API base URL, anything but the public API is treated as GitHub Enterprise
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

/// Repository filtering configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RepositoryFilterConfig {
    #[serde(default = "default_true")]
    pub include_private: bool,

    #[serde(default)]
    pub include_archived: bool,

    #[serde(default)]
    pub include_forks: bool,

    /// Regex patterns, a match drops the repository
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Regex patterns, when non-empty only matching repositories are kept
    #[serde(default)]
    pub include_patterns: Vec<String>,
}

/// Performance configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PerformanceConfig {
    /// Maximum backup tasks running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_backups: usize,

    /// Upper bound for a single repository/target task in seconds
    #[serde(default = "default_task_timeout")]
    pub task_timeout: u64,

    /// Timeout for destination API calls in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,
}

/// Notification sinks configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub slack: SlackConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Incoming webhook URL, literal or `${VAR}` placeholder
    #[serde(default)]
    pub webhook_url: String,

    #[serde(default = "default_slack_channel")]
    pub channel: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,

    /// HMAC-SHA256 signing secret
    #[serde(default)]
    pub secret: Option<String>,
}

/// SMTP delivery of HTML summaries
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub smtp_server: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// SMTP login, also the sender when `from_address` is unset
    #[serde(default)]
    pub username: String,

    /// Literal or `${VAR}` placeholder
    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub from_address: Option<String>,

    #[serde(default)]
    pub recipients: Vec<String>,

    /// Upgrade the connection with STARTTLS; plain SMTP when false
    #[serde(default = "default_true")]
    pub starttls: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "pretty", "full"
}

/// Scheduler configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    /// Interval between runs
    #[serde(default = "default_interval")]
    pub interval: String, // "24h"

    /// Run once immediately when the scheduler starts
    #[serde(default)]
    pub run_on_start: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_max_concurrent() -> usize {
    5
}
fn default_task_timeout() -> u64 {
    3600
}
fn default_http_timeout() -> u64 {
    30
}
fn default_slack_channel() -> String {
    "#backup-alerts".to_string()
}
fn default_smtp_port() -> u16 {
    587
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}
fn default_interval() -> String {
    "24h".to_string()
}

// Default implementations
impl Default for RepositoryFilterConfig {
    fn default() -> Self {
        Self {
            include_private: default_true(),
            include_archived: false,
            include_forks: false,
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_backups: default_max_concurrent(),
            task_timeout: default_task_timeout(),
            http_timeout: default_http_timeout(),
        }
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            channel: default_slack_channel(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: None,
            recipients: Vec::new(),
            starttls: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            run_on_start: false,
        }
    }
}

impl Config {
    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow!("Configuration file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", path))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Check the parts of the configuration that would otherwise fail mid-run
    pub fn validate(&self) -> Result<()> {
        if self.github.organization.trim().is_empty() {
            return Err(anyhow!("github.organization is required"));
        }

        if self.backup_targets.is_empty() {
            return Err(anyhow!("At least one backup target must be configured"));
        }

        // Compiling the filters surfaces bad patterns before discovery starts
        self.repo_filters()?;

        parse_duration(&self.schedule.interval).context("Invalid schedule.interval")?;

        Ok(())
    }

    /// Build the discovery filters from the repositories section
    pub fn repo_filters(&self) -> Result<RepoFilters> {
        RepoFilters::new(
            self.repositories.include_private,
            self.repositories.include_archived,
            self.repositories.include_forks,
            &self.repositories.exclude_patterns,
            &self.repositories.include_patterns,
        )
    }

    /// Worker count, never below one
    pub fn max_concurrent_backups(&self) -> usize {
        self.performance.max_concurrent_backups.max(1)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.performance.task_timeout)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.performance.http_timeout)
    }

    pub fn schedule_interval(&self) -> Result<Duration> {
        parse_duration(&self.schedule.interval).map(Duration::from_secs)
    }
}

/// Resolve a credential value.
///
/// A value of the exact form `${NAME}` is read from the environment and becomes
/// the empty string when `NAME` is unset. Anything else is returned as is.
pub fn resolve_credential(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => std::env::var(var).unwrap_or_default(),
        None => trimmed.to_string(),
    }
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(raw: &str) -> Result<String> {
    Ok(shellexpand::full(raw)
        .with_context(|| format!("Failed to expand path: {}", raw))?
        .into_owned())
}

/// Parse duration strings like "30m", "6h", "1d" or raw seconds
pub fn parse_duration(duration_str: &str) -> Result<u64> {
    let duration_str = duration_str.trim().to_lowercase();

    let (value, unit) = if let Some(value) = duration_str.strip_suffix('s') {
        (value.parse::<u64>().context("Invalid seconds value")?, 1)
    } else if let Some(value) = duration_str.strip_suffix('m') {
        (value.parse::<u64>().context("Invalid minutes value")?, 60)
    } else if let Some(value) = duration_str.strip_suffix('h') {
        (value.parse::<u64>().context("Invalid hours value")?, 3600)
    } else if let Some(value) = duration_str.strip_suffix('d') {
        (value.parse::<u64>().context("Invalid days value")?, 86400)
    } else {
        let value = duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30m', '6h', '1d'")?;
        (value, 1)
    };

    let seconds = value
        .checked_mul(unit)
        .ok_or_else(|| anyhow!("Duration too large: {}", duration_str))?;

    if seconds == 0 {
        return Err(anyhow!("Duration must be greater than zero"));
    }

    Ok(seconds)
}
