use crate::config::Config;
use crate::error::{CommunityError, HubError, ProvisionError, Result};
use crate::models::community::CommunityDownloader;
use crate::models::manifest::{CommunityModel, HubModel, HubRepoType, Manifest};
use async_trait::async_trait;
use hf_hub::api::tokio::{Api, ApiBuilder};
use hf_hub::{Cache, Repo, RepoType};
use std::fs;
use std::path::{Path, PathBuf};

/// Result of a fetch: where the artifact lives on the durable volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub path: PathBuf,
    /// Already present, nothing was downloaded
    pub cached: bool,
}

/// Fetches artifacts from both registries into the durable volume
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Resolve a hub artifact, downloading it unless the cache already holds it
    async fn fetch_hub(&self, model: &HubModel) -> Result<Fetched>;

    /// Download a community artifact, authenticating with `token`
    ///
    /// The returned path is where the artifact is expected to land; callers
    /// check it before trusting it. `refresh` replaces a file left by a
    /// different descriptor with the same file name.
    async fn fetch_community(
        &self,
        model: &CommunityModel,
        token: &str,
        refresh: bool,
    ) -> Result<Fetched>;
}

/// Hub downloader backed by the `hf-hub` content-addressed cache
pub struct HubDownloader {
    api: Api,
    cache: Cache,
    cache_dir: PathBuf,
}

impl std::fmt::Debug for HubDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubDownloader")
            .field("api", &"Api { ... }")
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

impl HubDownloader {
    /// Create new downloader caching into `config.hub_cache_dir()`
    pub fn new(config: &Config, token: Option<&str>) -> Result<Self> {
        let cache_dir = config.hub_cache_dir();
        fs::create_dir_all(&cache_dir)?;

        let mut builder = ApiBuilder::new()
            .with_cache_dir(cache_dir.clone())
            .with_progress(config.hub.progress);

        if let Some(endpoint) = &config.hub.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }
        if let Some(token) = token {
            builder = builder.with_token(Some(token.to_string()));
        }

        let api = builder.build().map_err(|e| HubError::Init(e.to_string()))?;

        Ok(Self {
            api,
            cache: Cache::new(cache_dir.clone()),
            cache_dir,
        })
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Download a model file from `HuggingFace` Hub
    pub async fn download(&self, model: &HubModel) -> Result<Fetched> {
        let repo = hub_repo(model);

        if let Some(path) = self.cache.repo(repo.clone()).get(&model.filename) {
            tracing::info!(
                "{}/{} already cached at {}",
                model.repo_id,
                model.filename,
                path.display()
            );
            return Ok(Fetched { path, cached: true });
        }

        tracing::info!(
            "Downloading {}/{} (revision {}) from HuggingFace...",
            model.repo_id,
            model.filename,
            model.revision()
        );

        let path = self
            .api
            .repo(repo)
            .get(&model.filename)
            .await
            .map_err(|e| HubError::Resolve {
                repo_id: model.repo_id.clone(),
                filename: model.filename.clone(),
                reason: e.to_string(),
            })?;

        let size = fs::metadata(&path).map_or(0, |m| m.len());
        tracing::info!(
            "Downloaded {}/{} ({})",
            model.repo_id,
            model.filename,
            format_bytes(size)
        );

        Ok(Fetched {
            path,
            cached: false,
        })
    }
}

fn hub_repo(model: &HubModel) -> Repo {
    let repo_type = match model.repo_type {
        HubRepoType::Model => RepoType::Model,
        HubRepoType::Dataset => RepoType::Dataset,
        HubRepoType::Space => RepoType::Space,
    };
    Repo::with_revision(model.repo_id.clone(), repo_type, model.revision().to_string())
}

/// Production client: `hf-hub` for the hub, HTTP or external tool for the community registry
#[derive(Debug)]
pub struct RegistryClient {
    hub: HubDownloader,
    community: CommunityDownloader,
}

impl RegistryClient {
    /// Create client from config, taking the hub credential from the manifest
    pub fn new(config: &Config, manifest: &Manifest) -> Result<Self> {
        let hub = HubDownloader::new(config, manifest.hf_token())?;
        tracing::debug!("Hub cache at {}", hub.cache_dir().display());

        Ok(Self {
            hub,
            community: CommunityDownloader::from_config(config)?,
        })
    }
}

#[async_trait]
impl DownloadClient for RegistryClient {
    async fn fetch_hub(&self, model: &HubModel) -> Result<Fetched> {
        self.hub.download(model).await
    }

    async fn fetch_community(
        &self,
        model: &CommunityModel,
        token: &str,
        refresh: bool,
    ) -> Result<Fetched> {
        self.community.download(model, token, refresh).await
    }
}

/// Check if enough disk space is available under `dir`
pub fn check_disk_space(dir: &Path, required_bytes: u64) -> Result<()> {
    // Get filesystem stats for the volume
    let stats = nix::sys::statvfs::statvfs(dir)
        .map_err(|e| ProvisionError::Other(format!("Failed to check disk space: {e}")))?;

    #[allow(clippy::useless_conversion)]
    let available_bytes = u64::from(stats.blocks_available()) * u64::from(stats.fragment_size());

    // Add 100MB buffer for safety; the size comes from the server
    let required_with_buffer = required_bytes.saturating_add(100 * 1_024 * 1_024);

    if available_bytes < required_with_buffer {
        return Err(CommunityError::DiskSpace {
            required_mb: required_with_buffer / (1_024 * 1_024),
            available_mb: available_bytes / (1_024 * 1_024),
        }
        .into());
    }

    Ok(())
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hub_model(repo_id: &str, filename: &str) -> HubModel {
        HubModel {
            repo_type: HubRepoType::Model,
            repo_id: repo_id.to_string(),
            filename: filename.to_string(),
            revision: None,
            kind: None,
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
        assert_eq!(format_bytes(1_610_612_736), "1.50 GB");
    }

    #[test]
    fn test_check_disk_space() {
        let temp_dir = TempDir::new().unwrap();
        assert!(check_disk_space(temp_dir.path(), 0).is_ok());

        let err = check_disk_space(temp_dir.path(), u64::MAX / 2).unwrap_err();
        assert!(err.to_string().contains("Not enough disk space"));

        // Bogus Content-Length must not wrap around the margin
        let err = check_disk_space(temp_dir.path(), u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Community(CommunityError::DiskSpace { .. })
        ));
    }

    #[test]
    fn test_hub_repo_revision() {
        let mut model = hub_model("stabilityai/sdxl-vae", "sdxl_vae.safetensors");
        assert_eq!(hub_repo(&model).revision(), "main");

        model.revision = Some("refs/pr/3".to_string());
        assert_eq!(hub_repo(&model).revision(), "refs/pr/3");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = temp_dir.path().to_path_buf();
        config.hub.progress = false;
        // Unroutable endpoint: any network access would fail the test
        config.hub.endpoint = Some("http://127.0.0.1:9".to_string());

        // Lay out the hub cache the way a previous run would have
        let repo_dir = temp_dir.path().join("models--acme--tiny-sd");
        let snapshot = repo_dir.join("snapshots").join("abc123");
        fs::create_dir_all(&snapshot).unwrap();
        fs::create_dir_all(repo_dir.join("refs")).unwrap();
        fs::write(repo_dir.join("refs").join("main"), "abc123").unwrap();
        fs::write(snapshot.join("tiny.safetensors"), "weights").unwrap();

        let downloader = HubDownloader::new(&config, None).unwrap();
        let fetched = downloader
            .download(&hub_model("acme/tiny-sd", "tiny.safetensors"))
            .await
            .unwrap();

        assert!(fetched.cached);
        assert_eq!(fetched.path, snapshot.join("tiny.safetensors"));
    }

    #[tokio::test]
    async fn test_unresolvable_repo_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = temp_dir.path().to_path_buf();
        config.hub.progress = false;
        config.hub.endpoint = Some("http://127.0.0.1:9".to_string());

        let downloader = HubDownloader::new(&config, None).unwrap();
        let err = downloader
            .download(&hub_model("nobody/missing", "none.safetensors"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Hub(HubError::Resolve { .. })));
    }
}
