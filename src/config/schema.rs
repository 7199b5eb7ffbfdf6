use crate::error::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub community: CommunityConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
}

/// Durable volume locations
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct HubConfig {
    pub endpoint: Option<String>,
    /// Overrides `storage.data_dir` as the hub cache root
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub progress: bool,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommunityMethod {
    /// Stream the file with the built-in HTTP client
    #[default]
    Http,
    /// Delegate to an external download tool (comfy-cli)
    Tool,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct CommunityConfig {
    #[serde(default)]
    pub method: CommunityMethod,
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_true")]
    pub progress: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct LinkConfig {
    #[serde(default = "default_true")]
    pub verify_target: bool,
}

/// Install roots of the wrapped applications
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TargetsConfig {
    #[serde(default = "default_a1111_root")]
    pub a1111_root: PathBuf,
    #[serde(default = "default_comfyui_root")]
    pub comfyui_root: PathBuf,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}
fn default_tool() -> String {
    "comfy".to_string()
}
fn default_user_agent() -> String {
    format!("sdprovision/{}", env!("CARGO_PKG_VERSION"))
}
fn default_a1111_root() -> PathBuf {
    PathBuf::from("/webui")
}
fn default_comfyui_root() -> PathBuf {
    PathBuf::from("/root/comfy/ComfyUI")
}
fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            cache_dir: None,
            progress: default_true(),
        }
    }
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            method: CommunityMethod::default(),
            tool: default_tool(),
            user_agent: default_user_agent(),
            progress: default_true(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            verify_target: default_true(),
        }
    }
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            a1111_root: default_a1111_root(),
            comfyui_root: default_comfyui_root(),
        }
    }
}

impl Config {
    /// Load config from an explicit path, the user config file, or defaults
    ///
    /// An explicit path must exist. The user config file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ProvisionError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            ProvisionError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/sdprovision/config.toml`, falling back to the platform config dir
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        let config_dir = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(dirs::config_dir)?;

        Some(config_dir.join("sdprovision").join("config.toml"))
    }

    /// Root of the hub's content-addressed cache
    #[must_use]
    pub fn hub_cache_dir(&self) -> PathBuf {
        self.hub
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.clone())
    }
}
