use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{error, info};

use super::{ensure_success, http_client, BackupResult, BackupTarget, SyncMethod};
use crate::discovery::RepositoryDescriptor;
use crate::git::{sanitize_component, GitClient};

/// `backup_targets.gittorrent` settings
#[derive(Debug, Clone, Deserialize)]
pub struct GitTorrentConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Tracker base URL; torrents are announced and uploaded here
    #[serde(default = "default_tracker_url")]
    pub tracker_url: String,

    /// Port the local seeder listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// `git-torrent` executable
    #[serde(default = "default_binary")]
    pub binary: String,
}

fn default_tracker_url() -> String {
    "http://localhost:6881".to_string()
}

fn default_port() -> u16 {
    6882
}

fn default_binary() -> String {
    "git-torrent".to_string()
}

/// Git bundles published as torrents.
///
/// Each run bundles every ref, wraps the bundle in a torrent and uploads it
/// to the tracker under the repository name, replacing the previous upload.
pub struct GitTorrentTarget {
    config: GitTorrentConfig,
    tracker: String,
    client: reqwest::Client,
    git: GitClient,
}

impl GitTorrentTarget {
    pub fn new(config: GitTorrentConfig, timeout: Duration) -> Result<Self> {
        let tracker = config.tracker_url.trim_end_matches('/').to_string();
        Ok(Self {
            config,
            tracker,
            client: http_client(timeout)?,
            git: GitClient::new(),
        })
    }

    async fn cli(&self, args: &[&str], cwd: Option<&Path>) -> Result<String> {
        let mut command = AsyncCommand::new(&self.config.binary);
        command.args(args).kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.config.binary))?;

        if !output.status.success() {
            return Err(anyhow!(
                "git-torrent {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn create_torrent(
        &self,
        bundle: &Path,
        torrent: &Path,
        repo: &RepositoryDescriptor,
    ) -> Result<()> {
        let port = self.config.port.to_string();
        let bundle = bundle.to_string_lossy();
        let torrent = torrent.to_string_lossy();

        self.cli(
            &[
                "create",
                "--tracker",
                &self.tracker,
                "--port",
                &port,
                "--name",
                &repo.name,
                "--comment",
                &repo.description,
                bundle.as_ref(),
                torrent.as_ref(),
            ],
            None,
        )
        .await?;
        Ok(())
    }

    async fn upload(&self, file_name: &str, torrent: Vec<u8>) -> Result<()> {
        let part = Part::bytes(torrent)
            .file_name(file_name.to_string())
            .mime_str("application/x-bittorrent")
            .context("Invalid torrent content type")?;

        let response = self
            .client
            .post(format!("{}/upload", self.tracker))
            .multipart(Form::new().part("torrent", part))
            .send()
            .await
            .context("Tracker upload request failed")?;

        ensure_success(response, "Tracker upload").await?;
        Ok(())
    }
}

#[async_trait]
impl BackupTarget for GitTorrentTarget {
    fn name(&self) -> &str {
        "gittorrent"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn test_connection(&self) -> bool {
        if !self.config.enabled {
            return false;
        }

        match self.cli(&["--version"], None).await {
            Ok(version) => info!("GitTorrent CLI found: {}", version),
            Err(e) => {
                error!("GitTorrent connection failed: {}", e);
                return false;
            }
        }

        let announce = async {
            let response = self
                .client
                .get(format!("{}/announce", self.tracker))
                .send()
                .await?;
            ensure_success(response, "Tracker announce").await
        }
        .await;

        match announce {
            Ok(_) => {
                info!("GitTorrent tracker is reachable at {}", self.tracker);
                true
            }
            Err(e) => {
                error!("GitTorrent tracker check failed: {}", e);
                false
            }
        }
    }

    async fn backup_repository(&self, repo: &RepositoryDescriptor) -> Result<BackupResult> {
        info!("Backing up {} using GitTorrent", repo.name);

        let scratch = self.git.scratch_dir(&repo.name)?;
        let mirror = scratch.path().join("mirror.git");
        let base = sanitize_component(&repo.name);
        let bundle = scratch.path().join(format!("{}.bundle", base));
        let torrent_name = format!("{}.torrent", base);
        let torrent = scratch.path().join(&torrent_name);

        self.git.mirror_clone(repo.source_url(), &mirror).await?;
        self.git.create_bundle(&mirror, &bundle).await?;
        self.create_torrent(&bundle, &torrent, repo).await?;

        let data = tokio::fs::read(&torrent)
            .await
            .with_context(|| format!("Failed to read torrent {}", torrent.display()))?;
        self.upload(&torrent_name, data).await?;

        info!("Published {} to tracker {}", repo.name, self.tracker);
        Ok(BackupResult::new(SyncMethod::GittorrentBundle)
            .with_remote_id(torrent_name)
            .with_location(format!("{}/announce", self.tracker)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: GitTorrentConfig = serde_yaml::from_str("enabled: true").unwrap();
        assert_eq!(config.tracker_url, "http://localhost:6881");
        assert_eq!(config.port, 6882);
        assert_eq!(config.binary, "git-torrent");
    }

    #[tokio::test]
    async fn test_missing_cli_fails_connection_and_task() {
        let target = GitTorrentTarget::new(
            GitTorrentConfig {
                enabled: true,
                tracker_url: "http://127.0.0.1:1".to_string(),
                port: 6882,
                binary: "orgbackup-no-such-git-torrent".to_string(),
            },
            Duration::from_secs(1),
        )
        .unwrap();
        let repo = RepositoryDescriptor::new("svc", "/nonexistent/orgbackup/svc.git");

        assert!(!target.test_connection().await);
        assert!(target.backup_repository(&repo).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_target_skips_connection_check() {
        let config: GitTorrentConfig = serde_yaml::from_str("enabled: false").unwrap();
        let target = GitTorrentTarget::new(config, Duration::from_secs(1)).unwrap();
        assert!(!target.is_enabled());
        assert!(!target.test_connection().await);
    }
}
