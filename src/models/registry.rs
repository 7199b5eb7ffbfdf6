use crate::config::Config;
use crate::error::{ProvisionError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Application whose model directory receives the links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// AUTOMATIC1111 Stable Diffusion web UI: one flat checkpoint folder
    A1111,
    /// ComfyUI: one folder per model kind, chosen by the descriptor's `type`
    ComfyUi,
}

/// Information about a supported target application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub target: Target,
    pub name: &'static str,
    pub description: &'static str,
    /// Fixed subdirectory under `models/`, or `None` when chosen per descriptor
    pub fixed_subdir: Option<&'static str>,
}

/// Registry of supported targets
pub const TARGETS: &[TargetInfo] = &[
    TargetInfo {
        target: Target::A1111,
        name: "a1111",
        description: "Stable Diffusion web UI (AUTOMATIC1111)",
        fixed_subdir: Some("Stable-diffusion"),
    },
    TargetInfo {
        target: Target::ComfyUi,
        name: "comfyui",
        description: "ComfyUI node-based UI",
        fixed_subdir: None,
    },
];

/// Model folders a stock ComfyUI install creates under `models/`
pub const COMFYUI_MODEL_FOLDERS: &[&str] = &[
    "animatediff_models",
    "animatediff_motion_lora",
    "checkpoints",
    "clip",
    "clip_vision",
    "configs",
    "controlnet",
    "diffusers",
    "diffusion_models",
    "embeddings",
    "gligen",
    "hypernetworks",
    "loras",
    "photomaker",
    "style_models",
    "text_encoders",
    "unet",
    "upscale_models",
    "vae",
    "vae_approx",
];

impl Target {
    #[must_use]
    pub fn info(self) -> &'static TargetInfo {
        TARGETS
            .iter()
            .find(|t| t.target == self)
            .unwrap_or(&TARGETS[0])
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Find target by name
    #[must_use]
    pub fn find(name: &str) -> Option<Self> {
        TARGETS
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(|t| t.target)
    }

    /// Get all target names
    #[must_use]
    pub fn all_names() -> Vec<&'static str> {
        TARGETS.iter().map(|t| t.name).collect()
    }

    /// Default install root from config
    #[must_use]
    pub fn default_root(self, config: &Config) -> PathBuf {
        match self {
            Self::A1111 => config.targets.a1111_root.clone(),
            Self::ComfyUi => config.targets.comfyui_root.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::find(s).ok_or_else(|| {
            let names = TARGETS.iter().map(|t| t.name);
            match suggest(s, names) {
                Some(name) => format!("unknown target '{s}'. Did you mean '{name}'?"),
                None => format!(
                    "unknown target '{s}'. Must be one of: {}",
                    Self::all_names().join(", ")
                ),
            }
        })
    }
}

/// Directory convention of an installed application
#[derive(Debug, Clone)]
pub struct AppLayout {
    target: Target,
    root: PathBuf,
}

impl AppLayout {
    #[must_use]
    pub fn new(target: Target, root: impl Into<PathBuf>) -> Self {
        Self {
            target,
            root: root.into(),
        }
    }

    /// Layout rooted at the configured install directory
    #[must_use]
    pub fn from_config(target: Target, config: &Config) -> Self {
        Self::new(target, target.default_root(config))
    }

    #[must_use]
    pub const fn target(&self) -> Target {
        self.target
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// Directory a model of the given kind is linked into
    pub fn destination_dir(&self, kind: Option<&str>) -> Result<PathBuf> {
        if let Some(subdir) = self.target.info().fixed_subdir {
            return Ok(self.models_dir().join(subdir));
        }

        let kind = kind.map(str::trim).filter(|k| !k.is_empty()).ok_or_else(|| {
            ProvisionError::Layout(format!(
                "{} models need a `type` naming the folder under models/ (e.g. checkpoints, loras)",
                self.target
            ))
        })?;

        if kind.contains(|c: char| c == '/' || c == '\\') || kind == "." || kind == ".." {
            return Err(ProvisionError::Layout(format!(
                "model type '{kind}' must be a single folder name"
            )));
        }

        if !COMFYUI_MODEL_FOLDERS.contains(&kind) {
            match suggest(kind, COMFYUI_MODEL_FOLDERS.iter().copied()) {
                Some(folder) => tracing::warn!(
                    "Model type '{kind}' is not a standard {} folder. Did you mean '{folder}'?",
                    self.target
                ),
                None => tracing::warn!(
                    "Model type '{kind}' is not a standard {} folder; creating it",
                    self.target
                ),
            }
        }

        Ok(self.models_dir().join(kind))
    }
}

/// Find closest match using Levenshtein distance
#[must_use]
pub fn suggest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    if name.is_empty() {
        return None;
    }

    candidates
        .into_iter()
        .map(|c| (c, levenshtein_distance(name, c)))
        .min_by_key(|(_, dist)| *dist)
        .filter(|(_, dist)| *dist <= 2) // Only suggest if within 2 edits
        .map(|(candidate, _)| candidate)
}

/// Calculate Levenshtein distance between two strings
#[allow(clippy::needless_range_loop)]
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let len1 = s1.chars().count();
    let len2 = s2.chars().count();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];

    for i in 0..=len1 {
        matrix[i][0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    for (i, c1) in s1.chars().enumerate() {
        for (j, c2) in s2.chars().enumerate() {
            let cost = usize::from(c1 != c2);
            matrix[i + 1][j + 1] = (matrix[i][j + 1] + 1)
                .min(matrix[i + 1][j] + 1)
                .min(matrix[i][j] + cost);
        }
    }

    matrix[len1][len2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_target() {
        assert_eq!(Target::find("a1111"), Some(Target::A1111));
        assert_eq!(Target::find("ComfyUI"), Some(Target::ComfyUi));
        assert_eq!(Target::find("invokeai"), None);
    }

    #[test]
    fn test_all_names() {
        assert_eq!(Target::all_names(), vec!["a1111", "comfyui"]);
    }

    #[test]
    fn test_parse_suggests() {
        let err = "comfyiu".parse::<Target>().unwrap_err();
        assert!(err.contains("Did you mean 'comfyui'"), "{err}");

        let err = "invalid123".parse::<Target>().unwrap_err();
        assert!(err.contains("a1111, comfyui"), "{err}");
    }

    #[test]
    fn test_a1111_ignores_type() {
        let layout = AppLayout::new(Target::A1111, "/webui");
        assert_eq!(
            layout.destination_dir(None).unwrap(),
            PathBuf::from("/webui/models/Stable-diffusion")
        );
        assert_eq!(
            layout.destination_dir(Some("loras")).unwrap(),
            PathBuf::from("/webui/models/Stable-diffusion")
        );
    }

    #[test]
    fn test_comfyui_uses_type() {
        let layout = AppLayout::new(Target::ComfyUi, "/root/comfy/ComfyUI");
        assert_eq!(
            layout.destination_dir(Some("checkpoints")).unwrap(),
            PathBuf::from("/root/comfy/ComfyUI/models/checkpoints")
        );
    }

    #[test]
    fn test_comfyui_requires_type() {
        let layout = AppLayout::new(Target::ComfyUi, "/root/comfy/ComfyUI");
        assert!(matches!(
            layout.destination_dir(None),
            Err(ProvisionError::Layout(_))
        ));
        assert!(layout.destination_dir(Some("  ")).is_err());
    }

    #[test]
    fn test_comfyui_rejects_nested_type() {
        let layout = AppLayout::new(Target::ComfyUi, "/c");
        assert!(layout.destination_dir(Some("../etc")).is_err());
        assert!(layout.destination_dir(Some("..")).is_err());
    }

    #[test]
    fn test_comfyui_allows_custom_folder() {
        let layout = AppLayout::new(Target::ComfyUi, "/c");
        assert_eq!(
            layout.destination_dir(Some("ipadapter")).unwrap(),
            PathBuf::from("/c/models/ipadapter")
        );
    }

    #[test]
    fn test_default_root_from_config() {
        let config = Config::default();
        let layout = AppLayout::from_config(Target::A1111, &config);
        assert_eq!(layout.root(), Path::new("/webui"));
    }

    #[test]
    fn test_suggest() {
        let folders = COMFYUI_MODEL_FOLDERS.iter().copied();
        assert_eq!(suggest("lora", folders.clone()), Some("loras"));
        assert_eq!(suggest("checkpoint", folders.clone()), Some("checkpoints"));
        assert_eq!(suggest("nothing-like-it", folders.clone()), None);
        assert_eq!(suggest("", folders), None);
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("vae", "vae"), 0);
        assert_eq!(levenshtein_distance("lora", "loras"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }
}
