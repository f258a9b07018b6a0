use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, error, info};

use super::{default_true, BackupResult, BackupTarget, SyncMethod};
use crate::discovery::RepositoryDescriptor;
use crate::git::GitClient;

/// `backup_targets.radicle` settings
#[derive(Debug, Clone, Deserialize)]
pub struct RadicleConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Node identifier reported in results
    #[serde(default)]
    pub node_id: Option<String>,

    /// Initialize projects that do not exist on the network yet
    #[serde(default = "default_true")]
    pub create_project: bool,

    /// `rad` executable
    #[serde(default = "default_binary")]
    pub binary: String,
}

fn default_binary() -> String {
    "rad".to_string()
}

/// Radicle network, driven through the `rad` CLI
pub struct RadicleTarget {
    config: RadicleConfig,
    git: GitClient,
}

impl RadicleTarget {
    pub fn new(config: RadicleConfig) -> Self {
        Self {
            config,
            git: GitClient::new(),
        }
    }

    async fn rad(&self, args: &[&str], cwd: Option<&Path>) -> Result<String> {
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
                "rad {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn find_project(&self, name: &str) -> Result<Option<String>> {
        let listing = self.rad(&["ls"], None).await?;
        Ok(find_project_id(&listing, name))
    }

    async fn init_project(&self, work_tree: &Path, repo: &RepositoryDescriptor) -> Result<()> {
        let branch = repo.default_branch.as_deref().unwrap_or("main");
        let description = repo.description.as_str();
        let visibility = if repo.private { "--private" } else { "--public" };

        self.rad(
            &[
                "init",
                "--name",
                &repo.name,
                "--description",
                description,
                "--default-branch",
                branch,
                visibility,
                "--no-confirm",
            ],
            Some(work_tree),
        )
        .await?;

        info!("Created Radicle project: {}", repo.name);
        Ok(())
    }
}

/// Find the repository id of `name` in `rad ls` output.
///
/// The name has to appear as a whole column; the id is the column that
/// starts with `rad:`.
pub fn find_project_id(listing: &str, name: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let columns: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == '│' || c == '|')
            .filter(|c| !c.is_empty())
            .collect();

        if !columns.iter().any(|c| *c == name) {
            return None;
        }

        columns
            .iter()
            .find(|c| c.starts_with("rad:"))
            .map(|id| id.to_string())
    })
}

#[async_trait]
impl BackupTarget for RadicleTarget {
    fn name(&self) -> &str {
        "radicle"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn test_connection(&self) -> bool {
        if !self.config.enabled {
            return false;
        }

        match self.rad(&["--version"], None).await {
            Ok(version) => info!("Radicle CLI found: {}", version),
            Err(e) => {
                error!("Radicle connection failed: {}", e);
                return false;
            }
        }

        match self.rad(&["node", "status"], None).await {
            Ok(_) => {
                info!("Radicle node is running");
                true
            }
            Err(e) => {
                error!("Radicle connection failed: {}", e);
                false
            }
        }
    }

    async fn backup_repository(&self, repo: &RepositoryDescriptor) -> Result<BackupResult> {
        info!("Backing up {} to Radicle", repo.name);

        let existing = self.find_project(&repo.name).await?;
        if existing.is_none() && !self.config.create_project {
            return Err(anyhow!(
                "Radicle project {} not found and project creation is disabled",
                repo.name
            ));
        }

        let scratch = self.git.scratch_dir(&repo.name)?;
        let work_tree = scratch.path().join(&repo.name);
        self.git.clone_repository(repo.source_url(), &work_tree).await?;
        self.git.track_all_branches(&work_tree).await?;

        let project_id = match &existing {
            Some(id) => {
                debug!("Found Radicle project {} for {}", id, repo.name);
                let remote = format!("rad://{}", id.trim_start_matches("rad:"));
                self.git.push_all(&work_tree, &remote).await?;
                id.clone()
            }
            None => {
                self.init_project(&work_tree, repo).await?;
                self.git.push_all(&work_tree, "rad").await?;
                self.find_project(&repo.name)
                    .await?
                    .ok_or_else(|| anyhow!("Radicle project {} missing after init", repo.name))?
            }
        };

        let mut result = BackupResult::new(SyncMethod::RadiclePush)
            .with_remote_id(project_id)
            .reused(existing.is_some());
        if let Some(node) = &self.config.node_id {
            result = result.with_location(node.clone());
        }
        Ok(result)
    }
}
