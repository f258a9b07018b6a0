use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use std::path::Path;
use tempfile::TempDir;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

/// Git operations used by the backup targets.
///
/// Every command runs with prompts disabled and is killed if the calling
/// future is dropped, so a task timeout also stops the underlying `git`.
#[derive(Debug, Clone, Default)]
pub struct GitClient;

impl GitClient {
    pub fn new() -> Self {
        Self
    }

    /// Scratch directory for one task, removed when the returned guard drops
    pub fn scratch_dir(&self, label: &str) -> Result<TempDir> {
        tempfile::Builder::new()
            .prefix(&format!("orgbackup-{}-", sanitize_component(label)))
            .tempdir()
            .context("Failed to create temporary clone directory")
    }

    /// Bare mirror clone: all branches, tags and other refs
    pub async fn mirror_clone(&self, url: &str, target: &Path) -> Result<()> {
        info!("Mirror cloning {} -> {}", redact_url(url), target.display());

        let target = target.to_string_lossy();
        self.run_git(&["clone", "--mirror", "--quiet", url, target.as_ref()], None)
            .await
            .with_context(|| format!("Git clone failed for {}", redact_url(url)))?;
        Ok(())
    }

    /// Working-tree clone, for tools that need a checkout
    pub async fn clone_repository(&self, url: &str, target: &Path) -> Result<()> {
        info!("Cloning {} -> {}", redact_url(url), target.display());

        let target = target.to_string_lossy();
        self.run_git(&["clone", "--quiet", url, target.as_ref()], None)
            .await
            .with_context(|| format!("Git clone failed for {}", redact_url(url)))?;
        Ok(())
    }

    /// Fetch every remote branch into local branches of a working clone so
    /// a later `push --all` carries them too
    pub async fn track_all_branches(&self, repo_dir: &Path) -> Result<()> {
        self.run_git(
            &["fetch", "--quiet", "origin", "+refs/heads/*:refs/heads/*", "--update-head-ok"],
            Some(repo_dir),
        )
        .await
        .context("Failed to fetch all branches")?;
        Ok(())
    }

    /// Push all branches, then all tags, to `remote_url`
    pub async fn push_all(&self, repo_dir: &Path, remote_url: &str) -> Result<()> {
        debug!("Pushing {} to {}", repo_dir.display(), redact_url(remote_url));

        self.run_git(&["push", "--all", remote_url], Some(repo_dir))
            .await
            .with_context(|| format!("Failed to push branches to {}", redact_url(remote_url)))?;

        self.run_git(&["push", "--tags", remote_url], Some(repo_dir))
            .await
            .with_context(|| format!("Failed to push tags to {}", redact_url(remote_url)))?;

        Ok(())
    }

    /// Write a bundle containing every ref of the repository
    pub async fn create_bundle(&self, repo_dir: &Path, bundle_path: &Path) -> Result<()> {
        let bundle = bundle_path.to_string_lossy();
        self.run_git(&["bundle", "create", "--quiet", bundle.as_ref(), "--all"], Some(repo_dir))
            .await
            .context("Failed to create git bundle")?;
        Ok(())
    }

    /// Installed git version string
    pub async fn version(&self) -> Result<String> {
        self.run_git(&["--version"], None).await
    }

    async fn run_git(&self, args: &[&str], cwd: Option<&Path>) -> Result<String> {
        let mut command = AsyncCommand::new("git");
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .context("Failed to execute git (is it installed?)")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.first().unwrap_or(&""), stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Embed credentials into an HTTP(S) remote URL
pub fn with_credentials(url: &str, username: &str, secret: &str) -> Result<String> {
    let mut parsed = Url::parse(url).with_context(|| format!("Invalid remote URL: {}", url))?;

    // Local remotes carry no credentials
    if !matches!(parsed.scheme(), "http" | "https") {
        return Ok(url.to_string());
    }

    parsed
        .set_username(username)
        .map_err(|_| anyhow!("Cannot set credentials on URL: {}", url))?;
    parsed
        .set_password(Some(secret))
        .map_err(|_| anyhow!("Cannot set credentials on URL: {}", url))?;

    Ok(parsed.to_string())
}

/// Strip any password from a URL before it reaches logs or outcomes
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

/// Make a name safe to use as a single path component
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim_matches(|c| c == ' ' || c == '.');
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}
