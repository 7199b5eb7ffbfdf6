use crate::error::{CommunityError, ProvisionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Repository category on the hub
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HubRepoType {
    #[default]
    Model,
    Dataset,
    Space,
}

/// Hub-hosted artifact, addressed by repository and path within it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubModel {
    #[serde(default)]
    pub repo_type: HubRepoType,
    pub repo_id: String,
    pub filename: String,
    pub revision: Option<String>,
    /// Destination subdirectory for layouts that sort models by kind
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl HubModel {
    /// Name of the link created in the application model directory
    #[must_use]
    pub fn link_name(&self) -> &str {
        self.filename.rsplit('/').next().unwrap_or(&self.filename)
    }

    #[must_use]
    pub fn revision(&self) -> &str {
        self.revision.as_deref().unwrap_or("main")
    }
}

/// Community-hosted artifact, addressed by direct download URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommunityModel {
    pub url: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Ordered model lists keyed by source
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelSources {
    #[serde(default)]
    pub hf: Vec<HubModel>,
    #[serde(default)]
    pub civitai: Vec<CommunityModel>,
}

/// Access credentials keyed by service name
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Tokens(HashMap<String, String>);

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut services: Vec<&str> = self.0.keys().map(String::as_str).collect();
        services.sort_unstable();
        f.debug_map()
            .entries(services.into_iter().map(|s| (s, "***")))
            .finish()
    }
}

impl Tokens {
    #[must_use]
    pub fn get(&self, service: &str) -> Option<&str> {
        self.0
            .get(service)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }
}

/// Manifest describing the models to provision
///
/// Read once, then shared by reference for the rest of the run.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Manifest {
    pub models: ModelSources,
    #[serde(default)]
    pub tokens: Tokens,
}

impl Manifest {
    /// Load and validate a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ProvisionError::Manifest(format!("Failed to read {}: {e}", path.display()))
        })?;

        let manifest = Self::from_json(&content)?;
        tracing::debug!(
            "Loaded manifest {} ({} hub, {} community models)",
            path.display(),
            manifest.models.hf.len(),
            manifest.models.civitai.len()
        );
        Ok(manifest)
    }

    /// Parse and validate manifest JSON
    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(content)
            .map_err(|e| ProvisionError::Manifest(format!("Failed to parse manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject descriptors that cannot name a file
    pub fn validate(&self) -> Result<()> {
        for (i, model) in self.models.hf.iter().enumerate() {
            if model.repo_id.trim().is_empty() {
                return Err(ProvisionError::Manifest(format!(
                    "models.hf[{i}]: repo_id is empty"
                )));
            }
            if !is_plain_file_name(model.link_name()) {
                return Err(ProvisionError::Manifest(format!(
                    "models.hf[{i}]: filename '{}' has no file name",
                    model.filename
                )));
            }
        }

        for (i, model) in self.models.civitai.iter().enumerate() {
            if model.url.trim().is_empty() {
                return Err(ProvisionError::Manifest(format!(
                    "models.civitai[{i}]: url is empty"
                )));
            }
            if !is_plain_file_name(&model.filename) {
                return Err(ProvisionError::Manifest(format!(
                    "models.civitai[{i}]: filename '{}' must be a plain file name",
                    model.filename
                )));
            }
        }

        Ok(())
    }

    /// Community registry credential, required only once a community model is fetched
    pub fn civitai_token(&self) -> Result<&str> {
        self.tokens
            .get("civitai")
            .ok_or_else(|| CommunityError::MissingToken("civitai".to_string()).into())
    }

    /// Optional hub credential for gated repositories
    #[must_use]
    pub fn hf_token(&self) -> Option<&str> {
        self.tokens.get("hf")
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.hf.is_empty() && self.models.civitai.is_empty()
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(|c: char| c == '/' || c == '\\')
}
