use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use flate2::{Compression, GzBuilder};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{default_true, ensure_success, http_client, BackupResult, BackupTarget, SyncMethod};
use crate::discovery::RepositoryDescriptor;
use crate::git::{sanitize_component, GitClient};

/// `backup_targets.ipfs` settings
#[derive(Debug, Clone, Deserialize)]
pub struct IpfsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Kubo RPC endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Gateway used to build result links
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_true")]
    pub pin_on_upload: bool,

    /// gzip the bundle before upload
    #[serde(default = "default_true")]
    pub compression: bool,
}

fn default_api_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_gateway_url() -> String {
    "https://ipfs.io".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinListing {
    #[serde(default)]
    keys: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionResponse {
    version: String,
}

/// Git bundles stored on IPFS.
///
/// The CID is computed before uploading, so a bundle that is already pinned
/// is reused instead of being added again.
pub struct IpfsTarget {
    config: IpfsConfig,
    api: String,
    client: reqwest::Client,
    git: GitClient,
}

impl IpfsTarget {
    pub fn new(config: IpfsConfig, timeout: Duration) -> Result<Self> {
        let api = format!("{}/api/v0", config.api_url.trim_end_matches('/'));
        Ok(Self {
            config,
            api,
            client: http_client(timeout)?,
            git: GitClient::new(),
        })
    }

    async fn add(&self, file_name: &str, data: Vec<u8>, only_hash: bool) -> Result<String> {
        let form = Form::new().part("file", Part::bytes(data).file_name(file_name.to_string()));

        let response = self
            .client
            .post(format!("{}/add", self.api))
            .query(&[
                ("only-hash", only_hash.to_string()),
                ("pin", "false".to_string()),
                ("cid-version", "1".to_string()),
            ])
            .multipart(form)
            .send()
            .await
            .context("IPFS add request failed")?;

        let added: AddResponse = ensure_success(response, "IPFS add")
            .await?
            .json()
            .await
            .context("Invalid IPFS add response")?;
        Ok(added.hash)
    }

    async fn is_pinned(&self, cid: &str) -> bool {
        let response = self
            .client
            .post(format!("{}/pin/ls", self.api))
            .query(&[("arg", cid), ("type", "recursive")])
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => response
                .json::<PinListing>()
                .await
                .map(|listing| listing.keys.contains_key(cid))
                .unwrap_or(false),
            // Kubo answers with an error status when the CID is not pinned
            _ => false,
        }
    }

    async fn pin(&self, cid: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/pin/add", self.api))
            .query(&[("arg", cid)])
            .send()
            .await
            .context("IPFS pin request failed")?;
        ensure_success(response, "IPFS pin").await?;
        Ok(())
    }

    /// Bundle every ref of the repository, optionally gzip-compressed
    async fn build_archive(&self, repo: &RepositoryDescriptor) -> Result<(String, Vec<u8>)> {
        let scratch = self.git.scratch_dir(&repo.name)?;
        let mirror = scratch.path().join("mirror.git");
        let base = sanitize_component(&repo.name);
        let bundle_path = scratch.path().join(format!("{}.bundle", base));

        self.git.mirror_clone(repo.source_url(), &mirror).await?;
        self.git.create_bundle(&mirror, &bundle_path).await?;

        let bundle = tokio::fs::read(&bundle_path)
            .await
            .with_context(|| format!("Failed to read bundle {}", bundle_path.display()))?;

        if self.config.compression {
            let name = format!("{}.bundle", base);
            let compressed = tokio::task::spawn_blocking(move || gzip(&name, &bundle))
                .await
                .context("Compression task failed")??;
            Ok((format!("{}.bundle.gz", base), compressed))
        } else {
            Ok((format!("{}.bundle", base), bundle))
        }
    }
}

/// gzip with a fixed header so identical input yields an identical CID
pub fn gzip(name: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzBuilder::new()
        .filename(name)
        .mtime(0)
        .write(Vec::new(), Compression::default());
    encoder.write_all(data).context("Failed to compress bundle")?;
    encoder.finish().context("Failed to compress bundle")
}

#[async_trait]
impl BackupTarget for IpfsTarget {
    fn name(&self) -> &str {
        "ipfs"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn test_connection(&self) -> bool {
        if !self.config.enabled {
            return false;
        }

        let result = async {
            let response = self.client.post(format!("{}/version", self.api)).send().await?;
            let version: VersionResponse = ensure_success(response, "IPFS version")
                .await?
                .json()
                .await?;
            Ok::<_, anyhow::Error>(version)
        }
        .await;

        match result {
            Ok(version) => {
                info!("Connected to IPFS node version: {}", version.version);
                true
            }
            Err(e) => {
                error!("IPFS connection failed: {}", e);
                false
            }
        }
    }

    async fn backup_repository(&self, repo: &RepositoryDescriptor) -> Result<BackupResult> {
        info!("Backing up {} to IPFS", repo.name);

        let (file_name, data) = self.build_archive(repo).await?;

        let cid = self.add(&file_name, data.clone(), true).await?;
        let reused = self.is_pinned(&cid).await;

        if reused {
            info!("{} already pinned as {}", repo.name, cid);
        } else {
            let uploaded = self.add(&file_name, data, false).await?;
            if uploaded != cid {
                return Err(anyhow!(
                    "IPFS returned CID {} after upload, expected {}",
                    uploaded,
                    cid
                ));
            }

            if self.config.pin_on_upload {
                match self.pin(&cid).await {
                    Ok(()) => info!("Pinned {} as {}", repo.name, cid),
                    Err(e) => warn!("Failed to pin {} ({}): {}", repo.name, cid, e),
                }
            }
        }

        let location = format!("{}/ipfs/{}", self.config.gateway_url.trim_end_matches('/'), cid);
        Ok(BackupResult::new(SyncMethod::IpfsArchive)
            .with_remote_id(cid)
            .with_location(location)
            .reused(reused))
    }
}
