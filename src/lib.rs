//! orgbackup - Organization-wide git repository backup
//!
//! orgbackup discovers every repository of a GitHub organization and backs it
//! up to several destinations at once, tolerating the failure of any single
//! repository/destination pair.
//!
//! ## Core Features
//!
//! - **Discovery**: Organization listing via the GitHub API with include/exclude filters
//! - **Destinations**: GitLab, Gitea, Bitbucket, local versioned snapshots, Radicle, GitTorrent, IPFS and Dat
//! - **Bounded Concurrency**: A fixed worker pool with per-task timeouts and isolation
//! - **Reporting**: Console and JSON summaries, Slack, signed webhook and email notifications
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`discovery`]: Repository descriptors, filters and the descriptor source seam
//! - [`targets`]: The backup target contract and its variants
//! - [`orchestrator`]: Runs every repository/target task and builds the summary

pub mod config;
pub mod discovery;
pub mod git;
pub mod github;
pub mod health;
pub mod notify;
pub mod orchestrator;
pub mod report;
pub mod scheduler;
pub mod summary;
pub mod targets;

pub use config::Config;
pub use discovery::{DescriptorSource, GitHubDiscovery, RepoFilters, RepositoryDescriptor};
pub use git::GitClient;
pub use github::GitHubClient;
pub use health::HealthCheck;
pub use notify::{NotificationManager, SummaryReporter};
pub use orchestrator::{BackupOrchestrator, BackupTask, RunOutcome};
pub use scheduler::Scheduler;
pub use summary::{RunSummary, TargetStats, TaskOutcome, TaskStatus};
pub use targets::{build_targets, BackupResult, BackupTarget, SyncMethod, TargetMap};
