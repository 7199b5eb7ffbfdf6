use crate::config::{CommunityMethod, Config};
use crate::error::{CommunityError, ProvisionError, Result};
use crate::models::download::{check_disk_space, format_bytes, Fetched};
use crate::models::manifest::CommunityModel;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Community registry downloader, selected by `community.method`
#[derive(Debug)]
pub enum CommunityDownloader {
    Http(HttpDownloader),
    Tool(ToolDownloader),
}

impl CommunityDownloader {
    /// Create downloader from config
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.community.method {
            CommunityMethod::Http => Ok(Self::Http(HttpDownloader::new(config)?)),
            CommunityMethod::Tool => Ok(Self::Tool(ToolDownloader::new(config))),
        }
    }

    /// Download a model into the data volume
    ///
    /// With `refresh` set, an existing file of the same name is replaced
    /// instead of being treated as a cache hit.
    pub async fn download(
        &self,
        model: &CommunityModel,
        token: &str,
        refresh: bool,
    ) -> Result<Fetched> {
        match self {
            Self::Http(d) => d.download(model, token, refresh).await,
            Self::Tool(d) => d.download(model, token, refresh).await,
        }
    }
}

/// Where a community artifact lands: `<data_dir>/<filename>`
#[must_use]
pub fn community_path(data_dir: &Path, model: &CommunityModel) -> PathBuf {
    data_dir.join(&model.filename)
}

/// URL without its query string, safe to log
fn display_url(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

fn cached(data_dir: &Path, model: &CommunityModel, refresh: bool) -> Option<Fetched> {
    let path = community_path(data_dir, model);
    if !path.is_file() {
        return None;
    }
    if refresh {
        tracing::info!("Replacing {} from {}", model.filename, display_url(&model.url));
        return None;
    }
    tracing::info!("{} already present at {}", model.filename, path.display());
    Some(Fetched { path, cached: true })
}

/// Streams artifacts over HTTP with bearer authentication
pub struct HttpDownloader {
    client: reqwest::Client,
    data_dir: PathBuf,
    progress: bool,
}

impl std::fmt::Debug for HttpDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDownloader")
            .field("client", &"Client { ... }")
            .field("data_dir", &self.data_dir)
            .field("progress", &self.progress)
            .finish()
    }
}

impl HttpDownloader {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.community.user_agent.clone())
            .build()
            .map_err(|e| ProvisionError::Other(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            data_dir: config.storage.data_dir.clone(),
            progress: config.community.progress,
        })
    }

    /// Download `model.url` to `<data_dir>/<filename>` via a `.part` file
    pub async fn download(
        &self,
        model: &CommunityModel,
        token: &str,
        refresh: bool,
    ) -> Result<Fetched> {
        if let Some(hit) = cached(&self.data_dir, model, refresh) {
            return Ok(hit);
        }

        let url = display_url(&model.url).to_string();
        let network = |e: reqwest::Error| CommunityError::Network {
            url: url.clone(),
            reason: e.to_string(),
        };

        tracing::info!("Downloading {} from {url}", model.filename);

        let response = self
            .client
            .get(&model.url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CommunityError::Status {
                url: url.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        tokio::fs::create_dir_all(&self.data_dir).await?;

        let total = response.content_length();
        if let Some(total) = total {
            check_disk_space(&self.data_dir, total)?;
        }

        let dest = community_path(&self.data_dir, model);
        let part = self.data_dir.join(format!("{}.part", model.filename));
        let mut file = tokio::fs::File::create(&part).await?;

        let bar = self.progress_bar(total, &model.filename);
        let mut written = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(network)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            bar.set_position(written);
        }

        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part, &dest).await?;
        bar.finish_and_clear();

        tracing::info!(
            "Downloaded {} ({})",
            model.filename,
            format_bytes(written)
        );

        Ok(Fetched {
            path: dest,
            cached: false,
        })
    }

    fn progress_bar(&self, total: Option<u64>, name: &str) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }

        let bar = total.map_or_else(ProgressBar::new_spinner, ProgressBar::new);
        let style = ProgressStyle::with_template(
            "{msg} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(name.to_string());
        bar
    }
}

/// Delegates downloads to an external command-line tool (comfy-cli)
///
/// The tool is invoked as
/// `<tool> --skip-prompt model download --url <url> --set-civitai-api-token=<token> --relative-path <data_dir>`
/// and is trusted to name the file after the registry's own file name.
#[derive(Debug)]
pub struct ToolDownloader {
    tool: String,
    data_dir: PathBuf,
}

impl ToolDownloader {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            tool: config.community.tool.clone(),
            data_dir: config.storage.data_dir.clone(),
        }
    }

    pub async fn download(
        &self,
        model: &CommunityModel,
        token: &str,
        refresh: bool,
    ) -> Result<Fetched> {
        if let Some(hit) = cached(&self.data_dir, model, refresh) {
            return Ok(hit);
        }

        let program = which::which(&self.tool)
            .map_err(|_| CommunityError::ToolNotFound(self.tool.clone()))?;

        // The tool skips files that already exist
        let dest = community_path(&self.data_dir, model);
        if refresh && dest.is_file() {
            tokio::fs::remove_file(&dest).await?;
        }

        let url = display_url(&model.url).to_string();
        tracing::info!("Downloading {} from {url} with {}", model.filename, self.tool);

        let status = tokio::process::Command::new(program)
            .args(["--skip-prompt", "model", "download", "--url"])
            .arg(&model.url)
            .arg(format!("--set-civitai-api-token={token}"))
            .arg("--relative-path")
            .arg(&self.data_dir)
            .status()
            .await?;

        if !status.success() {
            return Err(CommunityError::ToolFailed {
                url,
                status: status.to_string(),
            }
            .into());
        }

        Ok(Fetched {
            path: dest,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn model(url: &str, filename: &str) -> CommunityModel {
        CommunityModel {
            url: url.to_string(),
            filename: filename.to_string(),
            kind: Some("checkpoints".to_string()),
        }
    }

    fn config(data_dir: &Path, method: CommunityMethod, tool: &str) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = data_dir.to_path_buf();
        config.community.method = method;
        config.community.tool = tool.to_string();
        config.community.progress = false;
        config
    }

    /// Serve a single canned HTTP response, returning the raw request
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{addr}"), handle)
    }

    #[test]
    fn test_display_url_strips_query() {
        assert_eq!(
            display_url("https://civitai.com/api/download/models/1?token=abc"),
            "https://civitai.com/api/download/models/1"
        );
        assert_eq!(display_url("https://x/1"), "https://x/1");
    }

    #[tokio::test]
    async fn test_http_download_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let (base, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\nweights",
        )
        .await;

        let downloader = CommunityDownloader::from_config(&config(
            temp_dir.path(),
            CommunityMethod::Http,
            "comfy",
        ))
        .unwrap();
        let fetched = downloader
            .download(&model(&format!("{base}/api/download/models/1"), "a.safetensors"), "tok", false)
            .await
            .unwrap();

        assert!(!fetched.cached);
        assert_eq!(fetched.path, temp_dir.path().join("a.safetensors"));
        assert_eq!(fs::read_to_string(&fetched.path).unwrap(), "weights");
        assert!(!temp_dir.path().join("a.safetensors.part").exists());

        let request = server.await.unwrap();
        assert!(request.contains("GET /api/download/models/1"));
        assert!(request.to_lowercase().contains("authorization: bearer tok"));
    }

    #[tokio::test]
    async fn test_http_status_error() {
        let temp_dir = TempDir::new().unwrap();
        let (base, _server) = serve_once(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let downloader = HttpDownloader::new(&config(
            temp_dir.path(),
            CommunityMethod::Http,
            "comfy",
        ))
        .unwrap();
        let err = downloader
            .download(&model(&format!("{base}/m/1"), "a.safetensors"), "bad", false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Community(CommunityError::Status { status: 401, .. })
        ));
        assert!(!temp_dir.path().join("a.safetensors").exists());
    }

    #[tokio::test]
    async fn test_http_cache_hit_skips_request() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.safetensors"), "old").unwrap();

        let downloader = HttpDownloader::new(&config(
            temp_dir.path(),
            CommunityMethod::Http,
            "comfy",
        ))
        .unwrap();
        // Nothing listens here; a request would fail
        let fetched = downloader
            .download(&model("http://127.0.0.1:9/m/1", "a.safetensors"), "tok", false)
            .await
            .unwrap();

        assert!(fetched.cached);
        assert_eq!(fs::read_to_string(&fetched.path).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_tool_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let downloader = ToolDownloader::new(&config(
            temp_dir.path(),
            CommunityMethod::Tool,
            "sdprovision-no-such-tool",
        ));

        let err = downloader
            .download(&model("https://x/1", "a.safetensors"), "tok", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Community(CommunityError::ToolNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_nonzero_exit_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let downloader = ToolDownloader::new(&config(temp_dir.path(), CommunityMethod::Tool, "false"));

        let err = downloader
            .download(&model("https://x/1?token=secret", "a.safetensors"), "secret", false)
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("Download tool exited"), "{msg}");
        assert!(!msg.contains("secret"), "{msg}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_success_returns_expected_path() {
        let temp_dir = TempDir::new().unwrap();
        let downloader = ToolDownloader::new(&config(temp_dir.path(), CommunityMethod::Tool, "true"));

        let fetched = downloader
            .download(&model("https://x/1", "a.safetensors"), "tok", false)
            .await
            .unwrap();

        assert!(!fetched.cached);
        assert_eq!(fetched.path, temp_dir.path().join("a.safetensors"));
    }

    #[tokio::test]
    async fn test_tool_cache_hit_skips_invocation() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.safetensors"), "old").unwrap();

        // A missing tool proves it was never looked up
        let downloader = ToolDownloader::new(&config(
            temp_dir.path(),
            CommunityMethod::Tool,
            "sdprovision-no-such-tool",
        ));
        let fetched = downloader
            .download(&model("https://x/1", "a.safetensors"), "tok", false)
            .await
            .unwrap();
        assert!(fetched.cached);
    }

    #[tokio::test]
    async fn test_http_refresh_replaces_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.safetensors"), "first").unwrap();
        let (base, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 6\r\nConnection: close\r\n\r\nsecond",
        )
        .await;

        let downloader = HttpDownloader::new(&config(
            temp_dir.path(),
            CommunityMethod::Http,
            "comfy",
        ))
        .unwrap();
        let fetched = downloader
            .download(&model(&format!("{base}/m/2"), "a.safetensors"), "tok", true)
            .await
            .unwrap();

        assert!(!fetched.cached);
        assert_eq!(fs::read_to_string(&fetched.path).unwrap(), "second");
        assert!(server.await.unwrap().contains("GET /m/2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_refresh_removes_stale_file() {
        let temp_dir = TempDir::new().unwrap();
        let stale = temp_dir.path().join("a.safetensors");
        fs::write(&stale, "first").unwrap();

        let downloader = ToolDownloader::new(&config(temp_dir.path(), CommunityMethod::Tool, "true"));
        let fetched = downloader
            .download(&model("https://x/2", "a.safetensors"), "tok", true)
            .await
            .unwrap();

        assert!(!fetched.cached);
        // `true` writes nothing, so only the stale file could be here
        assert!(!stale.exists());
    }
}
