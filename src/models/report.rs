use crate::error::{ProvisionError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Registry a model came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModelSource {
    #[serde(rename = "hf")]
    Hub,
    #[serde(rename = "civitai")]
    Community,
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hub => f.write_str("hf"),
            Self::Community => f.write_str("civitai"),
        }
    }
}

/// Progress of one descriptor through a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Fetched,
    Linked,
}

/// Outcome for a single manifest entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelRecord {
    pub source: ModelSource,
    /// `repo_id/filename` for hub models, the file name for community models
    pub name: String,
    pub local_path: Option<PathBuf>,
    pub link: Option<PathBuf>,
    pub cached: bool,
    pub state: ModelState,
    pub provisioned_at: String,
}

/// Record of a provisioning run
///
/// Holds paths and names only, never credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionReport {
    /// Target application, or `warm` for cache-only runs
    pub mode: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub models: Vec<ModelRecord>,
}

impl ProvisionReport {
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            started_at: chrono::Utc::now().to_rfc3339(),
            finished_at: None,
            models: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ModelRecord) {
        self.models.push(record);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(chrono::Utc::now().to_rfc3339());
    }

    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.models.iter().filter(|m| !m.cached).count()
    }

    #[must_use]
    pub fn cached(&self) -> usize {
        self.models.iter().filter(|m| m.cached).count()
    }

    #[must_use]
    pub fn linked(&self) -> usize {
        self.models
            .iter()
            .filter(|m| m.state == ModelState::Linked)
            .count()
    }

    /// Load report from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;

        serde_json::from_str(&content)
            .map_err(|e| ProvisionError::Other(format!("Failed to parse report: {e}")))
    }

    /// Save report to file atomically (tmp + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to temporary file
        let tmp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProvisionError::Other(format!("Failed to serialize report: {e}")))?;

        fs::write(&tmp_path, content)?;

        // Atomic rename
        fs::rename(&tmp_path, path)?;

        Ok(())
    }
}
