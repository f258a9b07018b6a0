//! Repository discovery abstraction layer
//!
//! This module provides the provider-agnostic descriptor that every backup
//! target consumes, the filters applied while listing, and the
//! [`DescriptorSource`] trait the orchestrator pulls repositories from.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Immutable snapshot of one source repository for the duration of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryDescriptor {
    /// Repository name, unique within a run (e.g., "orgbackup")
    pub name: String,

    /// Owner/name form (e.g., "acme/orgbackup")
    pub full_name: String,

    /// Free-text description, empty when the source has none
    pub description: String,

    /// Whether the repository is private
    pub private: bool,

    /// Whether the repository is archived
    pub archived: bool,

    /// Whether the repository is a fork
    pub fork: bool,

    /// HTTPS clone URL
    pub clone_url: String,

    /// Alternate (credentialed) transport, usually SSH
    pub ssh_url: Option<String>,

    /// Default branch name
    pub default_branch: Option<String>,
}

impl RepositoryDescriptor {
    /// Minimal public descriptor, mostly useful for tests and dry runs
    pub fn new(name: impl Into<String>, clone_url: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            full_name: name.clone(),
            name,
            description: String::new(),
            private: false,
            archived: false,
            fork: false,
            clone_url: clone_url.into(),
            ssh_url: None,
            default_branch: None,
        }
    }

    /// URL to fetch from: private repositories use the alternate transport when present
    pub fn source_url(&self) -> &str {
        match (&self.ssh_url, self.private) {
            (Some(ssh), true) => ssh,
            _ => &self.clone_url,
        }
    }

    pub fn visibility(&self) -> &'static str {
        if self.private {
            "private"
        } else {
            "public"
        }
    }
}

/// Inclusion and exclusion rules applied by a descriptor source
#[derive(Debug, Clone)]
pub struct RepoFilters {
    pub include_private: bool,
    pub include_archived: bool,
    pub include_forks: bool,
    exclude: Vec<Regex>,
    include: Vec<Regex>,
}

impl RepoFilters {
    /// Compile the filter patterns.
    ///
    /// Patterns match from the start of the repository name, so `a-.*`
    /// matches `a-lib` but not `data-lib`.
    pub fn new(
        include_private: bool,
        include_archived: bool,
        include_forks: bool,
        exclude_patterns: &[String],
        include_patterns: &[String],
    ) -> Result<Self> {
        Ok(Self {
            include_private,
            include_archived,
            include_forks,
            exclude: compile_patterns(exclude_patterns)?,
            include: compile_patterns(include_patterns)?,
        })
    }

    /// Filters that let every repository through
    pub fn allow_all() -> Self {
        Self {
            include_private: true,
            include_archived: true,
            include_forks: true,
            exclude: Vec::new(),
            include: Vec::new(),
        }
    }

    /// Decide whether a repository takes part in the run.
    /// Exclude patterns are checked before include patterns and always win.
    pub fn should_include(&self, repo: &RepositoryDescriptor) -> bool {
        if repo.private && !self.include_private {
            return false;
        }

        if repo.archived && !self.include_archived {
            return false;
        }

        if repo.fork && !self.include_forks {
            return false;
        }

        if let Some(pattern) = self.exclude.iter().find(|re| re.is_match(&repo.name)) {
            debug!("Excluding {} due to pattern: {}", repo.name, pattern);
            return false;
        }

        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(&repo.name)) {
            debug!("Excluding {} - no include pattern matched", repo.name);
            return false;
        }

        true
    }

    pub fn apply(&self, repos: Vec<RepositoryDescriptor>) -> Vec<RepositoryDescriptor> {
        repos.into_iter().filter(|r| self.should_include(r)).collect()
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("^(?:{})", p))
                .with_context(|| format!("Invalid repository pattern: {}", p))
        })
        .collect()
}

/// Trait for repository discovery
///
/// A source yields the filtered descriptor list for one run. Errors returned
/// here are discovery errors and abort the run before any task starts.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    async fn list_repositories(&self, filters: &RepoFilters) -> Result<Vec<RepositoryDescriptor>>;

    /// Provider name for display/logging
    fn provider_name(&self) -> &'static str;
}

// =============================================================================
// GitHub Discovery Implementation
// =============================================================================

use crate::GitHubClient;

/// GitHub organization discovery
pub struct GitHubDiscovery {
    client: GitHubClient,
}

impl GitHubDiscovery {
    pub fn new(client: GitHubClient) -> Self {
        Self { client }
    }

    /// Convert octocrab Repository to our descriptor
    pub fn to_descriptor(repo: &octocrab::models::Repository) -> RepositoryDescriptor {
        let clone_url = repo
            .clone_url
            .as_ref()
            .map(|u| u.to_string())
            .or_else(|| repo.html_url.as_ref().map(|u| format!("{}.git", u)))
            .unwrap_or_default();

        RepositoryDescriptor {
            name: repo.name.clone(),
            full_name: repo.full_name.clone().unwrap_or_else(|| repo.name.clone()),
            description: repo.description.clone().unwrap_or_default(),
            private: repo.private.unwrap_or(false),
            archived: repo.archived.unwrap_or(false),
            fork: repo.fork.unwrap_or(false),
            clone_url,
            ssh_url: repo.ssh_url.clone(),
            default_branch: repo.default_branch.clone(),
        }
    }
}

#[async_trait]
impl DescriptorSource for GitHubDiscovery {
    async fn list_repositories(&self, filters: &RepoFilters) -> Result<Vec<RepositoryDescriptor>> {
        let repositories = self.client.list_organization_repositories().await?;
        let total = repositories.len();

        let descriptors = filters.apply(repositories.iter().map(Self::to_descriptor).collect());

        tracing::info!(
            "Found {} repositories matching criteria ({} listed)",
            descriptors.len(),
            total
        );
        Ok(descriptors)
    }

    fn provider_name(&self) -> &'static str {
        "GitHub"
    }
}
