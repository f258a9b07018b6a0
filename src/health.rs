//! Diagnostics for `orgbackup doctor`
//!
//! Checks the local git installation, the GitHub source and every registered
//! backup target. The report is informational: a failing destination does
//! not prevent a backup run from attempting it.

use crate::git::GitClient;
use crate::targets::TargetMap;
use crate::{Config, GitHubClient};

/// Result of all diagnostics
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// GitHub authentication and organization access
    pub github_auth: CheckResult,
    /// One entry per registered target, in registry order
    pub targets: Vec<(String, CheckResult)>,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn new(passed: bool, is_warning: bool, message: impl Into<String>) -> Self {
        Self {
            passed,
            message: message.into(),
            details: None,
            is_warning,
        }
    }

    fn ok(message: impl Into<String>) -> Self {
        Self::new(true, false, message)
    }

    fn error(message: impl Into<String>) -> Self {
        Self::new(false, false, message)
    }

    /// Passes, but is shown as a warning
    fn warning(message: impl Into<String>) -> Self {
        Self::new(true, true, message)
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(config: &Config, targets: &TargetMap) -> Self {
        Self {
            git: Self::check_git().await,
            github_auth: Self::check_github_auth(config).await,
            targets: Self::check_targets(targets).await,
        }
    }

    /// Git and GitHub must pass, and so must every enabled target
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, r)| r.passed)
    }

    /// Failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_warning)
            .collect()
    }

    async fn check_git() -> CheckResult {
        match GitClient::new().version().await {
            Ok(version) => CheckResult::ok("Git installed").with_details(version),
            Err(e) => CheckResult::error("Git not found in PATH")
                .with_details(format!("{}\nInstall git: https://git-scm.com/downloads", e)),
        }
    }

    async fn check_github_auth(config: &Config) -> CheckResult {
        let client = match GitHubClient::new(config) {
            Ok(client) => client,
            Err(e) => {
                return CheckResult::error("GitHub authentication failed")
                    .with_details(format!("{:#}\nRun: gh auth login", e))
            }
        };

        match client.test_connection().await {
            Ok(display) => CheckResult::ok("GitHub organization accessible")
                .with_details(format!("Organization: {}", display)),
            Err(e) => CheckResult::error(format!("Cannot access organization {}", client.organization()))
                .with_details(format!("{:#}", e)),
        }
    }

    async fn check_targets(targets: &TargetMap) -> Vec<(String, CheckResult)> {
        let mut results = Vec::with_capacity(targets.len());

        for (name, target) in targets {
            let result = if !target.is_enabled() {
                CheckResult::warning("Disabled, skipped")
            } else if target.test_connection().await {
                CheckResult::ok("Connection successful")
            } else {
                CheckResult::error("Connection failed (see log for details)")
            };
            results.push((name.clone(), result));
        }

        results
    }

    /// All checks with display labels
    pub fn all_checks(&self) -> Vec<(String, &CheckResult)> {
        let mut checks = vec![
            ("Git Installation".to_string(), &self.git),
            ("GitHub Authentication".to_string(), &self.github_auth),
        ];
        checks.extend(
            self.targets
                .iter()
                .map(|(name, result)| (format!("Target: {}", name), result)),
        );
        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::RepositoryDescriptor;
    use crate::targets::{BackupResult, BackupTarget};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StubTarget {
        name: &'static str,
        enabled: bool,
        reachable: bool,
    }

    #[async_trait]
    impl BackupTarget for StubTarget {
        fn name(&self) -> &str {
            self.name
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn test_connection(&self) -> bool {
            self.reachable
        }

        async fn backup_repository(&self, _: &RepositoryDescriptor) -> Result<BackupResult> {
            Err(anyhow!("not used"))
        }
    }

    fn stub_targets() -> TargetMap {
        let mut targets = TargetMap::new();
        for (name, enabled, reachable) in [("gitea", true, true), ("gitlab", true, false), ("ipfs", false, false)] {
            targets.insert(
                name.to_string(),
                Arc::new(StubTarget { name, enabled, reachable }),
            );
        }
        targets
    }

    #[test]
    fn test_check_result_constructors() {
        let result = CheckResult::ok("Test passed").with_details("Some details");
        assert!(result.passed);
        assert!(!result.is_warning);
        assert_eq!(result.details, Some("Some details".to_string()));

        let result = CheckResult::error("Test failed");
        assert!(!result.passed);
        assert!(!result.is_warning);

        let result = CheckResult::warning("Test warning");
        assert!(result.passed);
        assert!(result.is_warning);
    }

    #[tokio::test]
    async fn test_git_check() {
        let result = HealthCheck::check_git().await;
        // Git should be installed on the test machine
        assert!(result.passed);
        assert!(result.details.unwrap().starts_with("git version"));
    }

    #[tokio::test]
    async fn test_target_checks() {
        let results = HealthCheck::check_targets(&stub_targets()).await;
        assert_eq!(results.len(), 3);

        let (name, gitea) = &results[0];
        assert_eq!(name, "gitea");
        assert!(gitea.passed);

        let (_, gitlab) = &results[1];
        assert!(!gitlab.passed);

        let (_, ipfs) = &results[2];
        assert!(ipfs.passed && ipfs.is_warning);
    }

    #[tokio::test]
    async fn test_errors_and_warnings() {
        let health = HealthCheck {
            git: CheckResult::ok("Git OK"),
            github_auth: CheckResult::ok("Auth OK"),
            targets: HealthCheck::check_targets(&stub_targets()).await,
        };

        assert!(!health.all_passed());
        assert_eq!(health.errors().len(), 1);
        assert_eq!(health.warnings().len(), 1);

        let labels: Vec<String> = health.all_checks().into_iter().map(|(l, _)| l).collect();
        assert_eq!(
            labels,
            vec![
                "Git Installation",
                "GitHub Authentication",
                "Target: gitea",
                "Target: gitlab",
                "Target: ipfs",
            ]
        );
    }

    #[test]
    fn test_disabled_targets_do_not_fail_health() {
        let health = HealthCheck {
            git: CheckResult::ok("Git OK"),
            github_auth: CheckResult::ok("Auth OK"),
            targets: vec![("radicle".to_string(), CheckResult::warning("Disabled, skipped"))],
        };
        assert!(health.all_passed());
        assert!(health.errors().is_empty());
    }
}
