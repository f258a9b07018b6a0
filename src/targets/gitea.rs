use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{default_true, ensure_success, http_client, BackupResult, BackupTarget, SyncMethod};
use crate::config::resolve_credential;
use crate::discovery::RepositoryDescriptor;
use crate::git::{with_credentials, GitClient};

/// `backup_targets.gitea` settings
#[derive(Debug, Clone, Deserialize)]
pub struct GiteaConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the instance, e.g. https://gitea.example.com
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub token: String,

    /// Owning organization on the Gitea side
    #[serde(default)]
    pub organization: String,

    /// User name paired with the token for git pushes
    #[serde(default = "default_push_user")]
    pub username: String,

    #[serde(default = "default_true")]
    pub create_mirrors: bool,
}

fn default_push_user() -> String {
    "oauth2".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct Repository {
    id: u64,
    html_url: String,
    clone_url: String,
    #[serde(default)]
    mirror: bool,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(alias = "login")]
    username: String,
}

pub struct GiteaTarget {
    config: GiteaConfig,
    token: String,
    api: String,
    client: reqwest::Client,
    git: GitClient,
}

impl GiteaTarget {
    pub fn new(config: GiteaConfig, timeout: Duration) -> Result<Self> {
        let token = resolve_credential(&config.token);
        let api = format!("{}/api/v1", config.url.trim_end_matches('/'));

        Ok(Self {
            config,
            token,
            api,
            client: http_client(timeout)?,
            git: GitClient::new(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api, path))
            .header("Authorization", format!("token {}", self.token))
    }

    /// Fetch the repository; `None` when Gitea answers 404
    async fn get_repository(&self, name: &str) -> Result<Option<Repository>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{}/{}", self.config.organization, name),
            )
            .send()
            .await
            .context("Gitea repository lookup request failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let repo = ensure_success(response, "Gitea repository lookup")
            .await?
            .json()
            .await
            .context("Invalid Gitea repository response")?;
        Ok(Some(repo))
    }

    /// Create the repository as a pull mirror of the source
    async fn migrate_mirror(&self, repo: &RepositoryDescriptor) -> Result<Repository> {
        let body = json!({
            "clone_addr": repo.clone_url,
            "repo_name": repo.name,
            "repo_owner": self.config.organization,
            "mirror": true,
            "mirror_interval": "8h",
            "private": repo.private,
            "description": repo.description,
            "service": "git",
        });

        let response = self
            .request(reqwest::Method::POST, "/repos/migrate")
            .json(&body)
            .send()
            .await
            .context("Gitea migration request failed")?;

        let created = ensure_success(response, "Gitea mirror migration")
            .await?
            .json()
            .await
            .context("Invalid Gitea migration response")?;

        info!("Mirror configured for {}", repo.name);
        Ok(created)
    }

    async fn create_repository(&self, repo: &RepositoryDescriptor) -> Result<Repository> {
        let body = json!({
            "name": repo.name,
            "description": repo.description,
            "private": repo.private,
            "auto_init": false,
        });

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/orgs/{}/repos", self.config.organization),
            )
            .json(&body)
            .send()
            .await
            .context("Gitea repository creation request failed")?;

        let created = ensure_success(response, "Gitea repository creation")
            .await?
            .json()
            .await
            .context("Invalid Gitea repository creation response")?;

        info!("Created Gitea repository: {}", repo.name);
        Ok(created)
    }

    async fn trigger_mirror_sync(&self, repo: &RepositoryDescriptor) {
        let result = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/{}/mirror-sync", self.config.organization, repo.name),
            )
            .send()
            .await;

        match result {
            Ok(response) => match ensure_success(response, "Gitea mirror sync").await {
                Ok(_) => info!("Mirror sync triggered for {}", repo.name),
                Err(e) => warn!("Failed to sync mirror for {}: {}", repo.name, e),
            },
            Err(e) => warn!("Failed to sync mirror for {}: {}", repo.name, e),
        }
    }

    async fn clone_and_push(&self, target: &Repository, repo: &RepositoryDescriptor) -> Result<()> {
        let scratch = self.git.scratch_dir(&repo.name)?;
        let mirror = scratch.path().join("mirror.git");

        self.git.mirror_clone(repo.source_url(), &mirror).await?;

        let remote = with_credentials(&target.clone_url, &self.config.username, &self.token)?;
        self.git.push_all(&mirror, &remote).await?;

        info!("Successfully pushed {} to Gitea", repo.name);
        Ok(())
    }
}

#[async_trait]
impl BackupTarget for GiteaTarget {
    fn name(&self) -> &str {
        "gitea"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn test_connection(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.token.is_empty() || self.config.url.is_empty() {
            error!("Gitea url or token is not configured");
            return false;
        }

        let result = async {
            let response = self.request(reqwest::Method::GET, "/user").send().await?;
            let user: User = ensure_success(response, "Gitea user lookup")
                .await?
                .json()
                .await?;
            Ok::<_, anyhow::Error>(user)
        }
        .await;

        match result {
            Ok(user) => {
                info!("Connected to Gitea as: {}", user.username);
                true
            }
            Err(e) => {
                error!("Gitea connection failed: {}", e);
                false
            }
        }
    }

    async fn backup_repository(&self, repo: &RepositoryDescriptor) -> Result<BackupResult> {
        if self.token.is_empty() {
            return Err(anyhow!("Gitea token is not configured"));
        }
        if self.config.organization.is_empty() {
            return Err(anyhow!("Gitea organization is not configured"));
        }

        info!("Backing up {} to Gitea", repo.name);

        let existing = self.get_repository(&repo.name).await?;
        let reused = existing.is_some();
        if reused {
            info!("Repository {} already exists in Gitea", repo.name);
        }

        // Private repositories are pushed, never pull-mirrored
        let mirror = self.config.create_mirrors && !repo.private;
        if self.config.create_mirrors && repo.private {
            info!("{} is private, pushing instead of mirroring", repo.name);
        }

        let (method, target) = match existing {
            Some(target) if mirror && target.mirror => {
                self.trigger_mirror_sync(repo).await;
                (SyncMethod::Mirror, target)
            }
            Some(target) => {
                if mirror {
                    warn!(
                        "Gitea repository {} is not a mirror, pushing instead",
                        repo.name
                    );
                }
                self.clone_and_push(&target, repo).await?;
                (SyncMethod::ClonePush, target)
            }
            None if mirror => (SyncMethod::Mirror, self.migrate_mirror(repo).await?),
            None => {
                let target = self.create_repository(repo).await?;
                self.clone_and_push(&target, repo).await?;
                (SyncMethod::ClonePush, target)
            }
        };

        Ok(BackupResult::new(method)
            .with_remote_id(target.id.to_string())
            .with_location(target.html_url)
            .reused(reused))
    }
}
