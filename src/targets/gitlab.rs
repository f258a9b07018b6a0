use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{default_true, ensure_success, http_client, BackupResult, BackupTarget, SyncMethod};
use crate::config::resolve_credential;
use crate::discovery::RepositoryDescriptor;
use crate::git::{with_credentials, GitClient};

/// `backup_targets.gitlab` settings
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_url")]
    pub url: String,

    /// Personal access token, literal or `${VAR}`
    #[serde(default)]
    pub token: String,

    /// Namespace new projects are created in; the token owner's namespace when unset
    #[serde(default)]
    pub group_id: Option<u64>,

    /// Pull mirror instead of clone-and-push
    #[serde(default = "default_true")]
    pub create_mirrors: bool,
}

fn default_url() -> String {
    "https://gitlab.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct Project {
    id: u64,
    name: String,
    web_url: String,
    http_url_to_repo: String,
}

#[derive(Debug, Deserialize)]
struct User {
    username: String,
}

pub struct GitLabTarget {
    config: GitLabConfig,
    token: String,
    api: String,
    client: reqwest::Client,
    git: GitClient,
}

impl GitLabTarget {
    pub fn new(config: GitLabConfig, timeout: Duration) -> Result<Self> {
        let token = resolve_credential(&config.token);
        let api = format!("{}/api/v4", config.url.trim_end_matches('/'));

        Ok(Self {
            config,
            token,
            api,
            client: http_client(timeout)?,
            git: GitClient::new(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.api, path))
            .header("PRIVATE-TOKEN", &self.token)
    }

    fn send_json(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api, path))
            .header("PRIVATE-TOKEN", &self.token)
    }

    /// Look up a project with exactly this name in the configured namespace
    async fn find_project(&self, name: &str) -> Result<Option<Project>> {
        let request = match self.config.group_id {
            Some(group) => self.get(&format!("/groups/{}/projects", group)),
            None => self.get("/projects").query(&[("owned", "true")]),
        };

        let response = request
            .query(&[("search", name), ("per_page", "100")])
            .send()
            .await
            .context("GitLab project search request failed")?;

        let projects: Vec<Project> = ensure_success(response, "GitLab project search")
            .await?
            .json()
            .await
            .context("Invalid GitLab project search response")?;

        Ok(projects.into_iter().find(|p| p.name == name))
    }

    async fn create_project(&self, repo: &RepositoryDescriptor, mirror: bool) -> Result<Project> {
        let mut body = json!({
            "name": repo.name,
            "description": repo.description,
            "visibility": repo.visibility(),
        });

        if let Some(group) = self.config.group_id {
            body["namespace_id"] = json!(group);
        }

        if mirror {
            body["import_url"] = json!(repo.clone_url);
            body["mirror"] = json!(true);
        }

        let response = self
            .send_json(reqwest::Method::POST, "/projects")
            .json(&body)
            .send()
            .await
            .context("GitLab project creation request failed")?;

        let project: Project = ensure_success(response, "GitLab project creation")
            .await?
            .json()
            .await
            .context("Invalid GitLab project creation response")?;

        info!("Created new GitLab project: {}", project.name);
        Ok(project)
    }

    /// Point an existing project at the source and ask GitLab to pull now.
    /// Both steps are best effort.
    async fn refresh_mirror(&self, project: &Project, repo: &RepositoryDescriptor) {
        let update = self
            .send_json(reqwest::Method::PUT, &format!("/projects/{}", project.id))
            .json(&json!({ "import_url": repo.clone_url, "mirror": true }))
            .send()
            .await;

        match update {
            Ok(response) => {
                if let Err(e) = ensure_success(response, "GitLab mirror update").await {
                    warn!("Failed to update mirror settings for {}: {}", repo.name, e);
                }
            }
            Err(e) => warn!("Failed to update mirror settings for {}: {}", repo.name, e),
        }

        let trigger = self
            .send_json(
                reqwest::Method::POST,
                &format!("/projects/{}/mirror/pull", project.id),
            )
            .send()
            .await;

        match trigger {
            Ok(response) => match ensure_success(response, "GitLab mirror pull").await {
                Ok(_) => info!("Mirror pull triggered for {}", repo.name),
                Err(e) => warn!("Failed to trigger mirror pull for {}: {}", repo.name, e),
            },
            Err(e) => warn!("Failed to trigger mirror pull for {}: {}", repo.name, e),
        }
    }

    async fn clone_and_push(&self, project: &Project, repo: &RepositoryDescriptor) -> Result<()> {
        let scratch = self.git.scratch_dir(&repo.name)?;
        let mirror = scratch.path().join("mirror.git");

        self.git.mirror_clone(repo.source_url(), &mirror).await?;

        let remote = with_credentials(&project.http_url_to_repo, "oauth2", &self.token)?;
        self.git.push_all(&mirror, &remote).await?;

        info!("Successfully pushed {} to GitLab", repo.name);
        Ok(())
    }
}

#[async_trait]
impl BackupTarget for GitLabTarget {
    fn name(&self) -> &str {
        "gitlab"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn test_connection(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.token.is_empty() {
            error!("GitLab token is not configured");
            return false;
        }

        let result = async {
            let response = self.get("/user").send().await?;
            let user: User = ensure_success(response, "GitLab user lookup")
                .await?
                .json()
                .await?;
            Ok::<_, anyhow::Error>(user)
        }
        .await;

        match result {
            Ok(user) => {
                info!("Connected to GitLab as: {}", user.username);
                true
            }
            Err(e) => {
                error!("GitLab connection failed: {}", e);
                false
            }
        }
    }

    async fn backup_repository(&self, repo: &RepositoryDescriptor) -> Result<BackupResult> {
        if self.token.is_empty() {
            return Err(anyhow!("GitLab token is not configured"));
        }

        info!("Backing up {} to GitLab", repo.name);

        // Private repositories are pushed, never pull-mirrored
        let mirror = self.config.create_mirrors && !repo.private;
        if self.config.create_mirrors && repo.private {
            info!("{} is private, pushing instead of mirroring", repo.name);
        }

        let existing = self.find_project(&repo.name).await?;
        let reused = existing.is_some();

        let project = match existing {
            Some(project) => {
                info!("Found existing GitLab project: {}", project.name);
                if mirror {
                    self.refresh_mirror(&project, repo).await;
                }
                project
            }
            None => self.create_project(repo, mirror).await?,
        };

        let method = if mirror {
            SyncMethod::Mirror
        } else {
            self.clone_and_push(&project, repo).await?;
            SyncMethod::ClonePush
        };

        Ok(BackupResult::new(method)
            .with_remote_id(project.id.to_string())
            .with_location(project.web_url)
            .reused(reused))
    }
}
