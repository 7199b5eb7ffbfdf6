use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sdprovision
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Manifest error: {0}\n\nTroubleshooting:\n- Check the manifest JSON (default: ./config.json)\n- Expected shape: {{\"models\": {{\"hf\": [...], \"civitai\": [...]}}, \"tokens\": {{...}}}}\n- Run with RUST_LOG=debug for more details")]
    Manifest(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/sdprovision/config.toml\n- Pass an explicit file with --config\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("Hub download error: {0}")]
    Hub(#[from] HubError),

    #[error("Community download error: {0}")]
    Community(#[from] CommunityError),

    #[error("Refusing to create dangling link {link} -> {target}\n\nTroubleshooting:\n- The download finished but no file exists at the expected path\n- Check that the manifest `filename` matches the name the registry serves\n- Set link.verify_target = false to link without checking")]
    DanglingLink { link: PathBuf, target: PathBuf },

    #[error("Link error: {0}\n\nTroubleshooting:\n- Check write permissions on the application model directory\n- Make sure the path is not an existing directory")]
    Link(String),

    #[error("Layout error: {0}")]
    Layout(String),

    #[error("Verification failed: {0} broken model link(s)")]
    Verify(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Hub-hosted (Hugging Face) resolution errors
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Failed to initialize HuggingFace API: {0}")]
    Init(String),

    #[error("Failed to download {filename} from {repo_id}: {reason}\n\nTroubleshooting:\n- Verify repo_id and filename exist on the hub\n- Gated repositories need tokens.hf in the manifest\n- Check internet connection and hub.endpoint in config")]
    Resolve {
        repo_id: String,
        filename: String,
        reason: String,
    },
}

/// Community-hosted (Civitai) download errors
#[derive(Error, Debug)]
pub enum CommunityError {
    #[error("Missing access token `tokens.{0}` in manifest")]
    MissingToken(String),

    #[error("Request to {url} failed with HTTP {status}\n\nTroubleshooting:\n- 401/403: check tokens.civitai in the manifest\n- 404: check the model url\n- Try the same url in a browser while logged in")]
    Status { url: String, status: u16 },

    #[error("Network error downloading {url}: {reason}\n\nTroubleshooting:\n- Check internet connection\n- Verify firewall settings\n- Re-run the build step; partial downloads are restarted")]
    Network { url: String, reason: String },

    #[error("Download tool `{0}` not found in PATH\n\nTroubleshooting:\n- Install comfy-cli: pip install comfy-cli\n- Or set community.method = \"http\" in config")]
    ToolNotFound(String),

    #[error("Download tool exited with {status} for {url}")]
    ToolFailed { url: String, status: String },

    #[error("Not enough disk space: {required_mb} MB required, {available_mb} MB available")]
    DiskSpace { required_mb: u64, available_mb: u64 },
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
