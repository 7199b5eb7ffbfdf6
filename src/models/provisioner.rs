//! Provisioning policy
//!
//! Walks the manifest in order (hub models first, then community models),
//! fetches each artifact into the durable volume and links it into the
//! target application's model directory. Everything is sequential and the
//! first error ends the run: a build step either provisions every model or
//! fails.

use crate::error::{ProvisionError, Result};
use crate::models::download::DownloadClient;
use crate::models::link::{resolves_to_file, LinkCreator};
use crate::models::manifest::{CommunityModel, HubModel, Manifest};
use crate::models::registry::AppLayout;
use crate::models::report::{ModelRecord, ModelSource, ModelState, ProvisionReport};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// What a run does with fetched artifacts
#[derive(Debug, Clone)]
pub enum Mode {
    /// Fetch and link into the application layout
    Link(AppLayout),
    /// Fetch only, warming the durable volume for later builds
    Warm,
}

impl Mode {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Link(layout) => layout.target().name(),
            Self::Warm => "warm",
        }
    }
}

/// A manifest entry of either source
#[derive(Debug, Clone, Copy)]
pub enum ModelRef<'m> {
    Hub(&'m HubModel),
    Community(&'m CommunityModel),
}

impl ModelRef<'_> {
    #[must_use]
    pub const fn source(&self) -> ModelSource {
        match self {
            Self::Hub(_) => ModelSource::Hub,
            Self::Community(_) => ModelSource::Community,
        }
    }

    /// Human-readable name, free of credentials
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Hub(m) => format!("{}/{}", m.repo_id, m.filename),
            Self::Community(m) => m.filename.clone(),
        }
    }

    /// File name of the link in the application directory
    #[must_use]
    pub fn link_name(&self) -> &str {
        match self {
            Self::Hub(m) => m.link_name(),
            Self::Community(m) => &m.filename,
        }
    }

    fn kind(&self) -> Option<&str> {
        match self {
            Self::Hub(m) => m.kind.as_deref(),
            Self::Community(m) => m.kind.as_deref(),
        }
    }
}

/// One ordered step of a run
#[derive(Debug, Clone)]
pub struct PlannedStep<'m> {
    pub model: ModelRef<'m>,
    /// Full link path, `None` in warm mode
    pub link: Option<PathBuf>,
}

/// Resolve every step of a run without touching the network or filesystem
///
/// Layout problems (such as a missing `type` for ComfyUI) surface here,
/// before anything is downloaded.
pub fn plan<'m>(manifest: &'m Manifest, mode: &Mode) -> Result<Vec<PlannedStep<'m>>> {
    let models = manifest
        .models
        .hf
        .iter()
        .map(ModelRef::Hub)
        .chain(manifest.models.civitai.iter().map(ModelRef::Community));

    models
        .map(|model| -> Result<PlannedStep<'m>> {
            let link = match mode {
                Mode::Link(layout) => Some(
                    layout
                        .destination_dir(model.kind())
                        .map_err(|e| with_model(e, &model))?
                        .join(model.link_name()),
                ),
                Mode::Warm => None,
            };
            Ok(PlannedStep { model, link })
        })
        .collect()
}

fn with_model(err: ProvisionError, model: &ModelRef<'_>) -> ProvisionError {
    match err {
        ProvisionError::Layout(msg) => {
            ProvisionError::Layout(format!("{} '{}': {msg}", model.source(), model.name()))
        }
        other => other,
    }
}

/// A link that does not lead to a usable model file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkProblem {
    pub link: PathBuf,
    pub reason: String,
}

/// Check that every expected link exists and resolves to a regular file
pub fn verify(manifest: &Manifest, layout: &AppLayout) -> Result<Vec<LinkProblem>> {
    let mode = Mode::Link(layout.clone());
    let mut problems = Vec::new();

    for step in plan(manifest, &mode)? {
        let Some(link) = step.link else { continue };

        let reason = if std::fs::symlink_metadata(&link).is_err() {
            Some("missing".to_string())
        } else if !resolves_to_file(&link) {
            Some(match std::fs::read_link(&link) {
                Ok(target) => format!("dangling, points at {}", target.display()),
                Err(_) => "not a regular file".to_string(),
            })
        } else {
            None
        };

        if let Some(reason) = reason {
            tracing::warn!("{}: {reason}", link.display());
            problems.push(LinkProblem { link, reason });
        }
    }

    Ok(problems)
}

/// Runs the manifest against a download client and a link creator
pub struct Provisioner<'m, D, L> {
    manifest: &'m Manifest,
    client: D,
    linker: L,
    verify_target: bool,
}

impl<'m, D: DownloadClient, L: LinkCreator> Provisioner<'m, D, L> {
    #[must_use]
    pub fn new(manifest: &'m Manifest, client: D, linker: L) -> Self {
        Self {
            manifest,
            client,
            linker,
            verify_target: true,
        }
    }

    /// Check that the fetched artifact exists before linking to it
    #[must_use]
    pub fn with_verify_target(mut self, verify_target: bool) -> Self {
        self.verify_target = verify_target;
        self
    }

    /// Provision every manifest entry, in order
    pub async fn run(&self, mode: &Mode) -> Result<ProvisionReport> {
        let steps = plan(self.manifest, mode)?;
        let mut report = ProvisionReport::new(mode.name());
        let mut written: HashMap<PathBuf, String> = HashMap::new();
        // Community file name -> URL that produced it in this run
        let mut sources: HashMap<&str, &str> = HashMap::new();

        tracing::info!(
            "Provisioning {} model(s) ({})",
            steps.len(),
            mode.name()
        );

        for step in steps {
            let fetched = match step.model {
                ModelRef::Hub(model) => self.client.fetch_hub(model).await?,
                ModelRef::Community(model) => {
                    let token = self.manifest.civitai_token()?;
                    let refresh = sources
                        .insert(&model.filename, &model.url)
                        .is_some_and(|url| url != model.url);
                    if refresh {
                        tracing::warn!(
                            "{} is also produced by an earlier entry, downloading again",
                            model.filename
                        );
                    }
                    self.client.fetch_community(model, token, refresh).await?
                }
            };

            let mut record = ModelRecord {
                source: step.model.source(),
                name: step.model.name(),
                local_path: Some(fetched.path.clone()),
                link: None,
                cached: fetched.cached,
                state: ModelState::Fetched,
                provisioned_at: chrono::Utc::now().to_rfc3339(),
            };

            if let Some(link) = step.link {
                self.link(&fetched.path, &link)?;

                if let Some(previous) = written.insert(link.clone(), record.name.clone()) {
                    tracing::warn!(
                        "{} from '{previous}' replaced by '{}'",
                        link.display(),
                        record.name
                    );
                }

                record.link = Some(link);
                record.state = ModelState::Linked;
            }

            report.push(record);
        }

        report.finish();
        tracing::info!(
            "Provisioned {} model(s): {} downloaded, {} cached, {} linked",
            report.models.len(),
            report.downloaded(),
            report.cached(),
            report.linked()
        );

        Ok(report)
    }

    fn link(&self, target: &Path, link: &Path) -> Result<()> {
        if self.verify_target && !resolves_to_file(target) {
            return Err(ProvisionError::DanglingLink {
                link: link.to_path_buf(),
                target: target.to_path_buf(),
            });
        }

        let (Some(dir), Some(name)) = (link.parent(), link.file_name()) else {
            return Err(ProvisionError::Link(format!(
                "Invalid link path {}",
                link.display()
            )));
        };

        self.linker.link(target, dir, &name.to_string_lossy())?;
        tracing::info!("Linked {} -> {}", link.display(), target.display());
        Ok(())
    }
}
