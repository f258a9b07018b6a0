use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

use super::{ensure_success, http_client, BackupResult, BackupTarget, SyncMethod};
use crate::config::resolve_credential;
use crate::discovery::RepositoryDescriptor;
use crate::git::{with_credentials, GitClient};

/// `backup_targets.bitbucket` settings.
///
/// Bitbucket has no pull mirrors, so every backup is a clone-and-push.
#[derive(Debug, Clone, Deserialize)]
pub struct BitbucketConfig {
    #[serde(default)]
    pub enabled: bool,

    /// REST API base
    #[serde(default = "default_api_url")]
    pub url: String,

    /// Git host used for pushes
    #[serde(default = "default_git_url")]
    pub git_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub app_password: String,

    #[serde(default)]
    pub workspace: String,
}

fn default_api_url() -> String {
    "https://api.bitbucket.org".to_string()
}

fn default_git_url() -> String {
    "https://bitbucket.org".to_string()
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

pub struct BitbucketTarget {
    config: BitbucketConfig,
    username: String,
    app_password: String,
    client: reqwest::Client,
    git: GitClient,
}

/// Bitbucket repository slugs are lower-case
pub fn repository_slug(name: &str) -> String {
    name.to_lowercase()
}

impl BitbucketTarget {
    pub fn new(config: BitbucketConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            username: resolve_credential(&config.username),
            app_password: resolve_credential(&config.app_password),
            config,
            client: http_client(timeout)?,
            git: GitClient::new(),
        })
    }

    fn repository_url(&self, slug: &str) -> String {
        format!(
            "{}/2.0/repositories/{}/{}",
            self.config.url.trim_end_matches('/'),
            self.config.workspace,
            slug
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.app_password))
    }

    async fn repository_exists(&self, slug: &str) -> Result<bool> {
        let response = self
            .request(reqwest::Method::GET, self.repository_url(slug))
            .send()
            .await
            .context("Bitbucket repository lookup request failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        ensure_success(response, "Bitbucket repository lookup").await?;
        Ok(true)
    }

    async fn create_repository(&self, slug: &str, repo: &RepositoryDescriptor) -> Result<()> {
        let body = json!({
            "name": repo.name,
            "description": repo.description,
            "is_private": repo.private,
            "scm": "git",
        });

        let response = self
            .request(reqwest::Method::POST, self.repository_url(slug))
            .json(&body)
            .send()
            .await
            .context("Bitbucket repository creation request failed")?;

        ensure_success(response, "Bitbucket repository creation").await?;
        info!("Created Bitbucket repository: {}", repo.name);
        Ok(())
    }

    async fn clone_and_push(&self, slug: &str, repo: &RepositoryDescriptor) -> Result<String> {
        let scratch = self.git.scratch_dir(&repo.name)?;
        let mirror = scratch.path().join("mirror.git");

        self.git.mirror_clone(repo.source_url(), &mirror).await?;

        let web_url = format!(
            "{}/{}/{}",
            self.config.git_url.trim_end_matches('/'),
            self.config.workspace,
            slug
        );
        let remote = with_credentials(&format!("{}.git", web_url), &self.username, &self.app_password)?;
        self.git.push_all(&mirror, &remote).await?;

        info!("Successfully pushed {} to Bitbucket", repo.name);
        Ok(web_url)
    }
}

#[async_trait]
impl BackupTarget for BitbucketTarget {
    fn name(&self) -> &str {
        "bitbucket"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn test_connection(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.username.is_empty() || self.app_password.is_empty() {
            error!("Bitbucket username or app password is not configured");
            return false;
        }

        let url = format!("{}/2.0/user", self.config.url.trim_end_matches('/'));
        let result = async {
            let response = self.request(reqwest::Method::GET, url).send().await?;
            let user: User = ensure_success(response, "Bitbucket user lookup")
                .await?
                .json()
                .await?;
            Ok::<_, anyhow::Error>(user)
        }
        .await;

        match result {
            Ok(user) => {
                let who = user
                    .username
                    .or(user.display_name)
                    .unwrap_or_else(|| self.username.clone());
                info!("Connected to Bitbucket as: {}", who);
                true
            }
            Err(e) => {
                error!("Bitbucket connection failed: {}", e);
                false
            }
        }
    }

    async fn backup_repository(&self, repo: &RepositoryDescriptor) -> Result<BackupResult> {
        if self.username.is_empty() || self.app_password.is_empty() {
            return Err(anyhow!("Bitbucket credentials are not configured"));
        }
        if self.config.workspace.is_empty() {
            return Err(anyhow!("Bitbucket workspace is not configured"));
        }

        info!("Backing up {} to Bitbucket", repo.name);

        let slug = repository_slug(&repo.name);
        let reused = self.repository_exists(&slug).await?;
        if reused {
            info!("Repository {} already exists in Bitbucket", repo.name);
        } else {
            self.create_repository(&slug, repo).await?;
        }

        let web_url = self.clone_and_push(&slug, repo).await?;

        Ok(BackupResult::new(SyncMethod::ClonePush)
            .with_remote_id(format!("{}/{}", self.config.workspace, slug))
            .with_location(web_url)
            .reused(reused))
    }
}
