use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::{default_true, BackupResult, BackupTarget, SyncMethod};
use crate::config::expand_path;
use crate::discovery::RepositoryDescriptor;
use crate::git::{sanitize_component, GitClient};

const ARCHIVE_SUFFIX: &str = ".tar.gz";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `backup_targets.local_backup` settings
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_path")]
    pub path: String,

    /// Snapshots kept per repository, the newest one always survives
    #[serde(default = "default_keep_versions")]
    pub keep_versions: usize,

    /// Store each snapshot as a single .tar.gz
    #[serde(default = "default_true")]
    pub compress: bool,
}

fn default_path() -> String {
    "./backups".to_string()
}

fn default_keep_versions() -> usize {
    5
}

/// Versioned snapshots on the local filesystem.
///
/// A snapshot is built in a hidden staging directory inside the backup root
/// and renamed into place only once complete, so retention never sees a
/// partially written snapshot.
pub struct LocalTarget {
    config: LocalConfig,
    root: PathBuf,
    git: GitClient,
}

impl LocalTarget {
    pub fn new(config: LocalConfig) -> Result<Self> {
        let root = PathBuf::from(expand_path(&config.path)?);

        if config.enabled {
            fs::create_dir_all(&root)
                .with_context(|| format!("Failed to create backup directory: {}", root.display()))?;
        }

        Ok(Self {
            config,
            root,
            git: GitClient::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn create_snapshot(&self, repo: &RepositoryDescriptor) -> Result<PathBuf> {
        let prefix = sanitize_component(&repo.name);
        let snapshot = format!("{}_{}", prefix, snapshot_timestamp());

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)
            .with_context(|| format!("Failed to create staging directory in {}", self.root.display()))?;

        let clone_dir = staging.path().join(&snapshot);
        self.git.mirror_clone(repo.source_url(), &clone_dir).await?;

        let (staged, final_path) = if self.config.compress {
            let archive = staging.path().join(format!("{}{}", snapshot, ARCHIVE_SUFFIX));
            let (source, name, target) = (clone_dir.clone(), snapshot.clone(), archive.clone());
            tokio::task::spawn_blocking(move || write_archive(&source, &name, &target))
                .await
                .context("Archive task failed")??;
            (archive, self.root.join(format!("{}{}", snapshot, ARCHIVE_SUFFIX)))
        } else {
            (clone_dir, self.root.join(&snapshot))
        };

        if final_path.exists() {
            return Err(anyhow!("Snapshot already exists: {}", final_path.display()));
        }

        fs::rename(&staged, &final_path)
            .with_context(|| format!("Failed to move snapshot into {}", final_path.display()))?;

        Ok(final_path)
    }
}

#[async_trait]
impl BackupTarget for LocalTarget {
    fn name(&self) -> &str {
        "local"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn test_connection(&self) -> bool {
        if !self.config.enabled {
            return false;
        }

        let marker = self.root.join(".orgbackup-write-check");
        let result = fs::write(&marker, b"ok").and_then(|_| fs::remove_file(&marker));

        match result {
            Ok(()) => {
                info!("Local backup directory accessible: {}", self.root.display());
                true
            }
            Err(e) => {
                error!(
                    "Local backup directory not accessible: {}: {}",
                    self.root.display(),
                    e
                );
                false
            }
        }
    }

    async fn backup_repository(&self, repo: &RepositoryDescriptor) -> Result<BackupResult> {
        info!("Creating local backup of {}", repo.name);

        let path = self.create_snapshot(repo).await?;
        let snapshot = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let root = self.root.clone();
        let prefix = sanitize_component(&repo.name);
        let keep = self.config.keep_versions;
        match tokio::task::spawn_blocking(move || prune_snapshots(&root, &prefix, keep)).await {
            Ok(removed) if removed > 0 => {
                info!("Removed {} old backup(s) of {}", removed, repo.name)
            }
            Ok(_) => {}
            Err(e) => warn!("Retention cleanup for {} did not complete: {}", repo.name, e),
        }

        Ok(BackupResult::new(SyncMethod::LocalSnapshot)
            .with_remote_id(snapshot)
            .with_location(path.display().to_string()))
    }
}

/// UTC timestamp embedded in snapshot names, millisecond resolution
fn snapshot_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Parse the timestamp of a snapshot belonging to `prefix`.
///
/// Accepts `<prefix>_<YYYYmmdd_HHMMSS>[_mmm]` as a directory name or with a
/// `.tar.gz` suffix. Anything else is not one of this repository's snapshots.
pub fn parse_snapshot_name(file_name: &str, prefix: &str) -> Option<NaiveDateTime> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('_')?;
    let rest = rest.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(rest);

    // "YYYYmmdd_HHMMSS" is 15 characters, an optional "_mmm" follows
    if !rest.is_ascii() || rest.len() < 15 {
        return None;
    }
    let (base, millis) = rest.split_at(15);
    let base = NaiveDateTime::parse_from_str(base, TIMESTAMP_FORMAT).ok()?;

    match millis {
        "" => Some(base),
        m if m.len() == 4 && m.starts_with('_') => {
            let ms: i64 = m[1..].parse().ok()?;
            Some(base + chrono::Duration::milliseconds(ms))
        }
        _ => None,
    }
}

/// Delete all but the newest `keep_versions` snapshots of one repository.
///
/// Ranked by the embedded timestamp. A failed deletion is logged and the
/// remaining candidates are still processed. Returns the number removed.
pub fn prune_snapshots(root: &Path, prefix: &str, keep_versions: usize) -> usize {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {} for cleanup: {}", root.display(), e);
            return 0;
        }
    };

    let mut snapshots: Vec<(NaiveDateTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            parse_snapshot_name(&name, prefix).map(|ts| (ts, entry.path()))
        })
        .collect();

    // Newest first
    snapshots.sort_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for (_, path) in snapshots.into_iter().skip(keep_versions.max(1)) {
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };

        match result {
            Ok(()) => {
                debug!("Removed old backup: {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove old backup {}: {}", path.display(), e),
        }
    }

    removed
}

fn write_archive(source: &Path, name: &str, archive: &Path) -> Result<()> {
    let file = File::create(archive)
        .with_context(|| format!("Failed to create archive: {}", archive.display()))?;

    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder
        .append_dir_all(name, source)
        .with_context(|| format!("Failed to archive {}", source.display()))?;

    builder
        .into_inner()
        .context("Failed to finish tar stream")?
        .finish()
        .context("Failed to finish gzip stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use predicates::prelude::*;
    use std::process::Command;

    fn snapshot_names(root: &Path, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(root)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| parse_snapshot_name(n, prefix).is_some())
            .collect();
        names.sort();
        names
    }

    fn source_repository(dir: &Path) -> PathBuf {
        let source = dir.join("source");
        fs::create_dir_all(&source).unwrap();
        let git = |args: &[&str]| {
            let out = Command::new("git")
                .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
                .args(args)
                .current_dir(&source)
                .output()
                .unwrap();
            assert!(out.status.success());
        };
        git(&["init", "--quiet"]);
        fs::write(source.join("README"), "hello").unwrap();
        git(&["add", "README"]);
        git(&["commit", "--quiet", "-m", "initial"]);
        source
    }

    #[test]
    fn test_parse_snapshot_name() {
        let ts = parse_snapshot_name("svc_20240131_235959_123", "svc").unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string(), "2024-01-31 23:59:59.123");

        assert!(parse_snapshot_name("svc_20240131_235959.tar.gz", "svc").is_some());
        // Other repositories sharing a prefix are not ours
        assert!(parse_snapshot_name("svc_extra_20240131_235959", "svc").is_none());
        assert!(parse_snapshot_name("svc-api_20240131_235959", "svc").is_none());
        assert!(parse_snapshot_name("svc_20241399_000000", "svc").is_none());
        assert!(parse_snapshot_name("svc_20240131_235959_12", "svc").is_none());
        assert!(parse_snapshot_name(".staging-abc", "svc").is_none());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let root = TempDir::new().unwrap();
        for day in 1..=5 {
            root.child(format!("svc_2024010{}_120000_000", day))
                .create_dir_all()
                .unwrap();
        }
        root.child("svc_20240106_120000_000.tar.gz").write_str("x").unwrap();
        root.child("other_20200101_000000_000").create_dir_all().unwrap();

        let removed = prune_snapshots(root.path(), "svc", 3);
        assert_eq!(removed, 3);
        assert_eq!(
            snapshot_names(root.path(), "svc"),
            vec![
                "svc_20240104_120000_000",
                "svc_20240105_120000_000",
                "svc_20240106_120000_000.tar.gz",
            ]
        );
        root.child("other_20200101_000000_000")
            .assert(predicate::path::is_dir());
    }

    #[test]
    fn test_prune_never_removes_last_snapshot() {
        let root = TempDir::new().unwrap();
        root.child("svc_20240101_120000").create_dir_all().unwrap();
        root.child("svc_20240102_120000").create_dir_all().unwrap();

        assert_eq!(prune_snapshots(root.path(), "svc", 0), 1);
        assert_eq!(snapshot_names(root.path(), "svc"), vec!["svc_20240102_120000"]);
    }

    #[tokio::test]
    async fn test_backup_applies_retention() {
        let workspace = TempDir::new().unwrap();
        let source = source_repository(workspace.path());
        let backups = workspace.child("backups");
        backups.create_dir_all().unwrap();
        for day in 1..=5 {
            backups
                .child(format!("svc_2020010{}_000000_000.tar.gz", day))
                .write_str("old")
                .unwrap();
        }

        let target = LocalTarget::new(LocalConfig {
            enabled: true,
            path: backups.path().display().to_string(),
            keep_versions: 3,
            compress: true,
        })
        .unwrap();
        let repo = RepositoryDescriptor::new("svc", source.display().to_string());

        let result = target.backup_repository(&repo).await.unwrap();
        assert_eq!(result.method, SyncMethod::LocalSnapshot);

        let remaining = snapshot_names(backups.path(), "svc");
        assert_eq!(remaining.len(), 3);
        assert!(remaining.contains(result.remote_id.as_ref().unwrap()));
        assert!(remaining.contains(&"svc_20200105_000000_000.tar.gz".to_string()));
        assert!(remaining.contains(&"svc_20200104_000000_000.tar.gz".to_string()));

        // Staging directories are gone after the snapshot lands
        let leftovers = fs::read_dir(backups.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_uncompressed_snapshot_is_directory() {
        let workspace = TempDir::new().unwrap();
        let source = source_repository(workspace.path());
        let backups = workspace.child("plain");

        let target = LocalTarget::new(LocalConfig {
            enabled: true,
            path: backups.path().display().to_string(),
            keep_versions: 5,
            compress: false,
        })
        .unwrap();
        assert!(target.test_connection().await);

        let repo = RepositoryDescriptor::new("svc", source.display().to_string());
        let result = target.backup_repository(&repo).await.unwrap();
        let location = PathBuf::from(result.location.unwrap());
        assert!(location.is_dir());
        assert!(location.join("HEAD").exists());
    }

    #[tokio::test]
    async fn test_failed_clone_leaves_no_residue() {
        let workspace = TempDir::new().unwrap();
        let target = LocalTarget::new(LocalConfig {
            enabled: true,
            path: workspace.path().display().to_string(),
            keep_versions: 5,
            compress: true,
        })
        .unwrap();

        let repo = RepositoryDescriptor::new("ghost", "/nonexistent/orgbackup/ghost.git");
        assert!(target.backup_repository(&repo).await.is_err());
        assert_eq!(fs::read_dir(workspace.path()).unwrap().count(), 0);
    }
}
