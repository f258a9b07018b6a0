use anyhow::{anyhow, Context, Result};
use octocrab::models::Repository;
use octocrab::Octocrab;
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::{resolve_credential, Config};

const PUBLIC_API: &str = "https://api.github.com";

/// GitHub client wrapper bound to one organization
#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
    organization: String,
}

/// Where the GitHub token came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// `github.token` in the configuration (literal or resolved placeholder)
    Configured,
    /// Token from the GitHub CLI
    GitHubCLI,
    /// `GITHUB_TOKEN` environment variable
    EnvironmentToken,
}

impl GitHubClient {
    /// Create a new GitHub client for the configured organization
    pub fn new(config: &Config) -> Result<Self> {
        let (auth_strategy, token) = Self::detect_authentication(&config.github.token)?;

        info!("Using authentication strategy: {:?}", auth_strategy);

        let mut builder = Octocrab::builder().personal_token(token);

        let api_url = config.github.api_url.trim_end_matches('/');
        if api_url != PUBLIC_API {
            info!("Using GitHub Enterprise API at {}", api_url);
            builder = builder
                .base_uri(api_url)
                .with_context(|| format!("Invalid GitHub API URL: {}", api_url))?;
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        Ok(Self {
            client,
            organization: config.github.organization.clone(),
        })
    }

    /// Pick a token: configured value first, then GitHub CLI, then `GITHUB_TOKEN`
    fn detect_authentication(configured: &str) -> Result<(AuthStrategy, String)> {
        let token = resolve_credential(configured);
        if !token.is_empty() {
            return Ok((AuthStrategy::Configured, token));
        }

        if let Ok(token) = Self::try_github_cli() {
            Ok((AuthStrategy::GitHubCLI, token))
        } else if let Ok(token) = Self::try_environment_token() {
            Ok((AuthStrategy::EnvironmentToken, token))
        } else {
            Err(anyhow!(
                "GitHub token not found. Either:\n\
                 1. Set github.token in the configuration (e.g. \"${{GITHUB_TOKEN}}\")\n\
                 2. Set the GITHUB_TOKEN environment variable\n\
                 3. Authenticate the GitHub CLI: gh auth login"
            ))
        }
    }

    /// Ask the GitHub CLI for its token. A missing `gh` binary is just
    /// another failure here.
    fn try_github_cli() -> Result<String> {
        debug!("Asking gh for a token");

        let output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("GitHub CLI (gh) is not available")?;

        if !output.status.success() {
            return Err(anyhow!(
                "gh auth token failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        non_empty(String::from_utf8_lossy(&output.stdout).trim(), "gh auth token")
    }

    fn try_environment_token() -> Result<String> {
        let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN is not set")?;
        let token = non_empty(token.trim(), "GITHUB_TOKEN")?;

        const PREFIXES: [&str; 4] = ["ghp_", "gho_", "ghs_", "github_pat_"];
        if !PREFIXES.iter().any(|p| token.starts_with(p)) {
            warn!("GITHUB_TOKEN has an unexpected format, trying it anyway");
        }

        Ok(token)
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Check that the organization is reachable with the current token
    pub async fn test_connection(&self) -> Result<String> {
        let org = self
            .client
            .orgs(&self.organization)
            .get()
            .await
            .with_context(|| format!("Failed to access GitHub organization {}", self.organization))?;

        let org_name = org.name.unwrap_or(org.login);
        info!("Successfully connected to GitHub organization: {}", org_name);
        Ok(org_name)
    }

    /// List every repository of the organization
    pub async fn list_organization_repositories(&self) -> Result<Vec<Repository>> {
        let org = &self.organization;
        info!("Fetching repositories from organization: {}", org);

        let mut repositories = Vec::new();
        let mut page = 1u32;

        loop {
            let page_repos = self
                .client
                .orgs(org)
                .list_repos()
                .per_page(100)
                .page(page)
                .send()
                .await
                .with_context(|| {
                    format!("Failed to fetch repositories for organization {} page {}", org, page)
                })?;

            let has_next = page_repos.next.is_some();
            let items = page_repos.items;
            if items.is_empty() {
                break;
            }

            repositories.extend(items);

            if !has_next {
                break;
            }
            page += 1;
        }

        info!(
            "Found {} repositories for organization: {}",
            repositories.len(),
            org
        );
        Ok(repositories)
    }
}

fn non_empty(token: &str, origin: &str) -> Result<String> {
    if token.is_empty() {
        Err(anyhow!("{} returned an empty token", origin))
    } else {
        Ok(token.to_string())
    }
}
