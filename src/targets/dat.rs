use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command as AsyncCommand;
use tracing::{error, info};

use super::{BackupResult, BackupTarget, SyncMethod};
use crate::discovery::RepositoryDescriptor;
use crate::git::GitClient;

/// `backup_targets.dat` settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `dat` executable
    #[serde(default = "default_binary")]
    pub binary: String,
}

fn default_binary() -> String {
    "dat".to_string()
}

/// Working trees shared as Dat archives
pub struct DatTarget {
    config: DatConfig,
    git: GitClient,
}

impl DatTarget {
    pub fn new(config: DatConfig) -> Self {
        Self {
            config,
            git: GitClient::new(),
        }
    }

    async fn dat(&self, args: &[&str], cwd: Option<&Path>) -> Result<String> {
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
                "dat {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn create_archive(&self, work_tree: &Path, repo: &RepositoryDescriptor) -> Result<String> {
        self.dat(&["init"], Some(work_tree)).await?;
        self.dat(&["add", "."], Some(work_tree)).await?;

        let message = format!("Backup of {}", repo.name);
        self.dat(&["commit", "-m", &message], Some(work_tree)).await?;

        let keys = self.dat(&["keys"], Some(work_tree)).await?;
        parse_dat_key(&keys).ok_or_else(|| anyhow!("Could not read Dat archive key for {}", repo.name))
    }
}

/// Extract the archive key from the first `dat://<key>` in CLI output
pub fn parse_dat_key(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once("dat://")?;
        let key: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        (!key.is_empty()).then_some(key)
    })
}

#[async_trait]
impl BackupTarget for DatTarget {
    fn name(&self) -> &str {
        "dat"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn test_connection(&self) -> bool {
        if !self.config.enabled {
            return false;
        }

        match self.dat(&["--version"], None).await {
            Ok(version) => {
                info!("Dat CLI found: {}", version);
                true
            }
            Err(e) => {
                error!("Dat connection failed: {}", e);
                false
            }
        }
    }

    async fn backup_repository(&self, repo: &RepositoryDescriptor) -> Result<BackupResult> {
        info!("Backing up {} using Dat", repo.name);

        let scratch = self.git.scratch_dir(&repo.name)?;
        let work_tree = scratch.path().join("tree");
        self.git.clone_repository(repo.source_url(), &work_tree).await?;

        let key = self.create_archive(&work_tree, repo).await?;
        info!("Created Dat archive for {}: {}", repo.name, key);

        let location = format!("dat://{}", key);
        Ok(BackupResult::new(SyncMethod::DatArchive)
            .with_remote_id(key)
            .with_location(location))
    }
}
