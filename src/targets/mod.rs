//! Backup destinations
//!
//! Every destination implements [`BackupTarget`]. The registry turns the
//! `backup_targets` section of the configuration into a name -> target map;
//! the set of variants is closed and chosen by configuration key.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::discovery::RepositoryDescriptor;

pub mod bitbucket;
pub mod dat;
pub mod gitea;
pub mod gitlab;
pub mod gittorrent;
pub mod ipfs;
pub mod local;
pub mod radicle;

pub use bitbucket::BitbucketTarget;
pub use dat::DatTarget;
pub use gitea::GiteaTarget;
pub use gitlab::GitLabTarget;
pub use gittorrent::GitTorrentTarget;
pub use ipfs::IpfsTarget;
pub use local::LocalTarget;
pub use radicle::RadicleTarget;

/// How a repository reached its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMethod {
    /// Destination pulls from the source on its own schedule
    Mirror,
    /// Full clone pushed over the destination's git transport
    ClonePush,
    /// Versioned copy on the local filesystem
    LocalSnapshot,
    RadiclePush,
    IpfsArchive,
    /// Bundle announced to a BitTorrent tracker
    GittorrentBundle,
    DatArchive,
}

/// Destination-specific payload of a successful task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupResult {
    pub method: SyncMethod,

    /// Identifier of the destination entity (project id, CID, snapshot name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,

    /// Where the backup can be found (web URL, path, gateway link)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// True when an existing destination entity was found and updated
    pub reused_existing: bool,
}

impl BackupResult {
    pub fn new(method: SyncMethod) -> Self {
        Self {
            method,
            remote_id: None,
            location: None,
            reused_existing: false,
        }
    }

    pub fn with_remote_id(mut self, id: impl Into<String>) -> Self {
        self.remote_id = Some(id.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn reused(mut self, reused: bool) -> Self {
        self.reused_existing = reused;
        self
    }
}

/// Uniform contract for one backup destination
///
/// `backup_repository` must be idempotent per repository: a second call
/// finds the destination entity created by the first and updates it.
#[async_trait]
pub trait BackupTarget: Send + Sync {
    /// Registry name, used as the per-target key in summaries
    fn name(&self) -> &str;

    /// Configuration read only, no I/O
    fn is_enabled(&self) -> bool;

    /// Lightweight round-trip to the destination; logs and returns false on failure
    async fn test_connection(&self) -> bool;

    async fn backup_repository(&self, repo: &RepositoryDescriptor) -> Result<BackupResult>;
}

/// Name -> target map produced by the registry
pub type TargetMap = BTreeMap<String, Arc<dyn BackupTarget>>;

/// Build one target per recognized key in `backup_targets`.
///
/// Unknown keys are ignored. A recognized key whose settings do not decode
/// is a configuration error.
pub fn build_targets(config: &Config) -> Result<TargetMap> {
    let http_timeout = config.http_timeout();
    let mut targets: TargetMap = BTreeMap::new();

    for (key, value) in &config.backup_targets {
        let target: Arc<dyn BackupTarget> = match key.as_str() {
            "gitlab" => Arc::new(GitLabTarget::new(decode(key, value)?, http_timeout)?),
            "gitea" => Arc::new(GiteaTarget::new(decode(key, value)?, http_timeout)?),
            "bitbucket" => Arc::new(BitbucketTarget::new(decode(key, value)?, http_timeout)?),
            "local_backup" => Arc::new(LocalTarget::new(decode(key, value)?)?),
            "radicle" => Arc::new(RadicleTarget::new(decode(key, value)?)),
            "gittorrent" => Arc::new(GitTorrentTarget::new(decode(key, value)?, http_timeout)?),
            "ipfs" => Arc::new(IpfsTarget::new(decode(key, value)?, http_timeout)?),
            "dat" => Arc::new(DatTarget::new(decode(key, value)?)),
            other => {
                debug!("Ignoring unsupported backup target: {}", other);
                continue;
            }
        };

        info!(
            "Registered backup target {} ({})",
            target.name(),
            if target.is_enabled() { "enabled" } else { "disabled" }
        );
        targets.insert(target.name().to_string(), target);
    }

    Ok(targets)
}

fn decode<T: DeserializeOwned>(key: &str, value: &serde_yaml::Value) -> Result<T> {
    // An empty section (`gitea:`) decodes as all defaults
    let value = if value.is_null() {
        serde_yaml::Value::Mapping(Default::default())
    } else {
        value.clone()
    };

    serde_yaml::from_value(value).with_context(|| format!("Invalid settings for backup target {}", key))
}

/// HTTP client shared by every request of one adapter
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("orgbackup/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Turn a non-success response into an error carrying the response body
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    action: &str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("{} failed with HTTP {}: {}", action, status, body.trim()))
}

pub(crate) fn default_true() -> bool {
    true
}
