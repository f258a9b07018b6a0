//! Per-task outcomes and the aggregate run summary

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::targets::BackupResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Error,
    /// Task enumerated by a dry run, never executed
    DryRun,
}

/// Result of one (repository, target) task
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub repository: String,
    pub target: String,
    pub status: TaskStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BackupResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success(repository: &str, target: &str, result: BackupResult) -> Self {
        Self {
            repository: repository.to_string(),
            target: target.to_string(),
            status: TaskStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(repository: &str, target: &str, error: impl Into<String>) -> Self {
        Self {
            repository: repository.to_string(),
            target: target.to_string(),
            status: TaskStatus::Error,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn dry_run(repository: &str, target: &str) -> Self {
        Self {
            repository: repository.to_string(),
            target: target.to_string(),
            status: TaskStatus::DryRun,
            result: None,
            error: None,
        }
    }
}

/// Counts for one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetStats {
    pub success: usize,
    pub failed: usize,
    pub dry_run: usize,
}

impl TargetStats {
    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Success => self.success += 1,
            TaskStatus::Error => self.failed += 1,
            TaskStatus::DryRun => self.dry_run += 1,
        }
    }
}

/// Aggregate over every outcome of one run, built once all tasks have joined
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub dry_run: usize,
    pub per_target: BTreeMap<String, TargetStats>,
    pub results: Vec<TaskOutcome>,
}

impl RunSummary {
    pub fn build(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        results: Vec<TaskOutcome>,
    ) -> Self {
        let mut totals = TargetStats::default();
        let mut per_target: BTreeMap<String, TargetStats> = BTreeMap::new();

        for outcome in &results {
            totals.record(outcome.status);
            per_target
                .entry(outcome.target.clone())
                .or_default()
                .record(outcome.status);
        }

        let duration_seconds = (finished_at - started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            started_at,
            finished_at,
            duration_seconds,
            total: results.len(),
            successful: totals.success,
            failed: totals.failed,
            dry_run: totals.dry_run,
            per_target,
            results,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.results
            .iter()
            .filter(|o| o.status == TaskStatus::Error)
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
