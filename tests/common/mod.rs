//! Common test utilities and helpers for orgbackup tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use orgbackup::{
    BackupResult, BackupTarget, DescriptorSource, RepoFilters, RepositoryDescriptor, RunSummary,
    SummaryReporter, SyncMethod, TargetMap,
};

/// Temporary directory plus environment variables restored on drop
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub original_env: Vec<(String, Option<String>)>,
}

impl TestEnvironment {
    pub fn new(env_vars: &[&str]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let original_env = env_vars
            .iter()
            .map(|var| (var.to_string(), env::var(var).ok()))
            .collect();

        Self {
            temp_dir,
            original_env,
        }
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }
}

impl Drop for TestEnvironment {
    fn drop(&mut self) {
        for (key, value) in &self.original_env {
            match value {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

pub fn repository(name: &str) -> RepositoryDescriptor {
    RepositoryDescriptor::new(name, format!("https://github.com/acme/{}.git", name))
}

pub fn repositories(names: &[&str]) -> Vec<RepositoryDescriptor> {
    names.iter().map(|n| repository(n)).collect()
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should be installed");
    assert!(output.status.success(), "git {:?} failed", args);
}

/// Working repository with one commit, a `feature` branch and a `v1.0` tag
pub fn create_source_repository(path: &Path) {
    std::fs::create_dir_all(path).expect("Failed to create source dir");
    git(path, &["init", "--quiet"]);
    std::fs::write(path.join("README"), "hello").expect("Failed to write README");
    git(path, &["add", "README"]);
    git(path, &["commit", "--quiet", "-m", "initial"]);
    git(path, &["branch", "feature"]);
    git(path, &["tag", "v1.0"]);
}

/// Empty bare repository standing in for a destination remote
pub fn create_bare_repository(path: &Path) {
    std::fs::create_dir_all(path).expect("Failed to create bare dir");
    git(path, &["init", "--quiet", "--bare"]);
}

/// Every ref name of a repository
pub fn refs(path: &Path) -> Vec<String> {
    let output = Command::new("git")
        .args(["for-each-ref", "--format=%(refname)"])
        .current_dir(path)
        .output()
        .expect("git should be installed");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

/// `file://` URL of a local path
pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Descriptor whose source is a local repository
pub fn local_repository(name: &str, source: &Path, private: bool) -> RepositoryDescriptor {
    let mut repo = RepositoryDescriptor::new(name, source.display().to_string());
    repo.private = private;
    repo
}

/// Descriptor source backed by a fixed list, counting how often it is asked
pub struct InMemorySource {
    repos: Vec<RepositoryDescriptor>,
    pub calls: AtomicUsize,
}

impl InMemorySource {
    pub fn new(repos: Vec<RepositoryDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            repos,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DescriptorSource for InMemorySource {
    async fn list_repositories(&self, filters: &RepoFilters) -> Result<Vec<RepositoryDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(filters.apply(self.repos.clone()))
    }

    fn provider_name(&self) -> &'static str {
        "in-memory"
    }
}

/// Source whose listing always fails
pub struct UnreachableSource;

#[async_trait]
impl DescriptorSource for UnreachableSource {
    async fn list_repositories(&self, _: &RepoFilters) -> Result<Vec<RepositoryDescriptor>> {
        Err(anyhow!("connection refused"))
    }

    fn provider_name(&self) -> &'static str {
        "unreachable"
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    Fail,
    Panic,
    Hang,
}

/// Target with scripted behavior that records every repository it was given
pub struct MockTarget {
    name: String,
    enabled: bool,
    behavior: Behavior,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<String>>,
}

impl MockTarget {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Self::with_enabled(name, behavior, true)
    }

    pub fn with_enabled(name: &str, behavior: Behavior, enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            enabled,
            behavior,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackupTarget for MockTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn test_connection(&self) -> bool {
        self.enabled
    }

    async fn backup_repository(&self, repo: &RepositoryDescriptor) -> Result<BackupResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(repo.name.clone());

        match self.behavior {
            Behavior::Succeed => Ok(BackupResult::new(SyncMethod::Mirror)
                .with_remote_id(format!("{}/{}", self.name, repo.name))),
            Behavior::Fail => Err(anyhow!("{} rejected {}", self.name, repo.name)),
            Behavior::Panic => panic!("adapter bug while handling {}", repo.name),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(BackupResult::new(SyncMethod::Mirror))
            }
        }
    }
}

pub fn target_map(targets: &[Arc<MockTarget>]) -> TargetMap {
    let mut map = TargetMap::new();
    for target in targets {
        map.insert(target.name().to_string(), target.clone() as Arc<dyn BackupTarget>);
    }
    map
}

/// Reporter that keeps everything it receives
#[derive(Default)]
pub struct RecordingReporter {
    pub summaries: Mutex<Vec<RunSummary>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn summary_count(&self) -> usize {
        self.summaries.lock().unwrap().len()
    }
}

#[async_trait]
impl SummaryReporter for RecordingReporter {
    async fn send_backup_summary(&self, summary: &RunSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
    }

    async fn send_error_notification(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}
