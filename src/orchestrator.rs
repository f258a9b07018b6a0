//! Backup orchestrator - drives one complete backup run
//!
//! A run discovers repositories, crosses them with the enabled targets,
//! executes every (repository, target) task under a bounded worker pool and
//! folds the outcomes into a [`RunSummary`]. Individual task failures never
//! fail the run; only discovery errors do.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::discovery::{DescriptorSource, GitHubDiscovery, RepoFilters, RepositoryDescriptor};
use crate::notify::{NotificationManager, SummaryReporter};
use crate::summary::{RunSummary, TaskOutcome};
use crate::targets::{build_targets, BackupTarget, TargetMap};
use crate::{Config, GitHubClient};

const DEFAULT_MAX_CONCURRENT: usize = 5;
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(3600);

/// How a run ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Discovery returned nothing; no task ran, nothing was reported
    NoRepositories,
    /// No target is enabled; no task ran, nothing was reported
    NoTargets,
    Completed(RunSummary),
}

impl RunOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            RunOutcome::NoRepositories => "no_repositories",
            RunOutcome::NoTargets => "no_targets",
            RunOutcome::Completed(_) => "completed",
        }
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::Completed(summary) => Some(summary),
            _ => None,
        }
    }
}

/// One unit of work: a repository paired with a target
#[derive(Clone)]
pub struct BackupTask {
    pub repository: Arc<RepositoryDescriptor>,
    pub target: Arc<dyn BackupTarget>,
}

impl BackupTask {
    pub fn key(&self) -> (String, String) {
        (self.repository.name.clone(), self.target.name().to_string())
    }
}

pub struct BackupOrchestrator {
    source: Arc<dyn DescriptorSource>,
    targets: TargetMap,
    reporter: Arc<dyn SummaryReporter>,
    filters: RepoFilters,
    max_concurrent: usize,
    task_timeout: Duration,
}

impl BackupOrchestrator {
    pub fn new(
        source: Arc<dyn DescriptorSource>,
        targets: TargetMap,
        reporter: Arc<dyn SummaryReporter>,
    ) -> Self {
        Self {
            source,
            targets,
            reporter,
            filters: RepoFilters::allow_all(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }

    /// Wire the GitHub source, the configured targets and the notification sinks
    pub fn from_config(config: &Config) -> Result<Self> {
        let github = GitHubClient::new(config)?;
        let source = Arc::new(GitHubDiscovery::new(github));
        let targets = build_targets(config)?;
        let reporter = Arc::new(NotificationManager::new(
            &config.notifications,
            config.http_timeout(),
        )?);

        Ok(Self::new(source, targets, reporter)
            .with_filters(config.repo_filters()?)
            .with_max_concurrent(config.max_concurrent_backups())
            .with_task_timeout(config.task_timeout()))
    }

    pub fn with_filters(mut self, filters: RepoFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Worker count, clamped to at least one
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    pub fn targets(&self) -> &TargetMap {
        &self.targets
    }

    pub fn reporter(&self) -> Arc<dyn SummaryReporter> {
        self.reporter.clone()
    }

    /// Filtered repository list, as a run would see it
    pub async fn list_repositories(&self) -> Result<Vec<RepositoryDescriptor>> {
        self.source
            .list_repositories(&self.filters)
            .await
            .with_context(|| format!("Failed to discover repositories from {}", self.source.provider_name()))
    }

    /// Run one complete backup pass.
    ///
    /// Returns an error only when discovery fails. In dry-run mode every task
    /// is reported as `dry_run`, no target is called and nothing is sent to
    /// the reporter.
    pub async fn run(&self, dry_run: bool) -> Result<RunOutcome> {
        let started_at = Utc::now();
        info!(
            "Starting backup run{}",
            if dry_run { " (dry run)" } else { "" }
        );

        let repositories = self.list_repositories().await?;
        if repositories.is_empty() {
            warn!("No repositories found to backup");
            return Ok(RunOutcome::NoRepositories);
        }

        let tasks = self.plan_tasks(repositories);
        if tasks.is_empty() {
            error!("No backup targets enabled");
            return Ok(RunOutcome::NoTargets);
        }

        info!("Planned {} backup tasks", tasks.len());

        let results = if dry_run {
            tasks
                .iter()
                .map(|task| {
                    info!(
                        "[dry run] Would backup {} to {}",
                        task.repository.name,
                        task.target.name()
                    );
                    TaskOutcome::dry_run(&task.repository.name, task.target.name())
                })
                .collect()
        } else {
            self.execute(tasks).await
        };

        let summary = RunSummary::build(started_at, Utc::now(), results);

        info!(
            "Backup run completed in {:.2}s: {} successful, {} failed, {} dry run",
            summary.duration_seconds, summary.successful, summary.failed, summary.dry_run
        );

        if !dry_run {
            self.reporter.send_backup_summary(&summary).await;
        }

        Ok(RunOutcome::Completed(summary))
    }

    /// Cross product of repositories and enabled targets
    pub fn plan_tasks(&self, repositories: Vec<RepositoryDescriptor>) -> Vec<BackupTask> {
        let enabled: Vec<Arc<dyn BackupTarget>> = self
            .targets
            .values()
            .filter(|target| target.is_enabled())
            .cloned()
            .collect();

        if enabled.is_empty() {
            return Vec::new();
        }

        repositories
            .into_iter()
            .map(Arc::new)
            .flat_map(|repository| {
                enabled.iter().map(move |target| BackupTask {
                    repository: repository.clone(),
                    target: target.clone(),
                })
            })
            .collect()
    }

    /// Execute every task and collect exactly one outcome per task
    async fn execute(&self, tasks: Vec<BackupTask>) -> Vec<TaskOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let task_timeout = self.task_timeout;

        debug!(
            "Executing {} tasks with {} workers",
            tasks.len(),
            self.max_concurrent
        );

        let mut running = FuturesUnordered::new();

        for task in tasks {
            let (repository, target) = task.key();
            let semaphore = semaphore.clone();

            // Spawned so a panicking adapter surfaces as a JoinError
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| anyhow!("Worker pool closed: {}", e))?;

                match timeout(task_timeout, task.target.backup_repository(&task.repository)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!(
                        "Backup timed out after {}s",
                        task_timeout.as_secs()
                    )),
                }
            });

            running.push(async move { (repository, target, handle.await) });
        }

        let mut outcomes = Vec::with_capacity(running.len());

        while let Some((repository, target, joined)) = running.next().await {
            let outcome = match joined {
                Ok(Ok(result)) => {
                    info!("Backed up {} to {}", repository, target);
                    TaskOutcome::success(&repository, &target, result)
                }
                Ok(Err(e)) => {
                    error!("Failed to backup {} to {}: {:#}", repository, target, e);
                    TaskOutcome::error(&repository, &target, format!("{:#}", e))
                }
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        format!("Task panicked: {}", panic_message(join_error.into_panic()))
                    } else {
                        "Task was cancelled".to_string()
                    };
                    error!("Failed to backup {} to {}: {}", repository, target, message);
                    TaskOutcome::error(&repository, &target, message)
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
