use crate::error::{ProvisionError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Creates the alias an application sees for a provisioned artifact
pub trait LinkCreator: Send + Sync {
    /// Create `dest_dir/filename` pointing at `target`
    ///
    /// `dest_dir` is created if missing. An existing file or link of the same
    /// name is replaced; an existing directory is an error.
    fn link(&self, target: &Path, dest_dir: &Path, filename: &str) -> Result<PathBuf>;
}

/// Filesystem symlinks
#[derive(Debug, Default, Clone, Copy)]
pub struct SymlinkCreator;

impl LinkCreator for SymlinkCreator {
    fn link(&self, target: &Path, dest_dir: &Path, filename: &str) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir)?;
        let link = dest_dir.join(filename);

        match fs::symlink_metadata(&link) {
            Ok(meta) if meta.is_dir() => {
                return Err(ProvisionError::Link(format!(
                    "{} is a directory",
                    link.display()
                )));
            }
            Ok(_) => {
                tracing::debug!("Replacing existing {}", link.display());
                fs::remove_file(&link)?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        symlink(target, &link).map_err(|e| {
            ProvisionError::Link(format!(
                "Failed to link {} -> {}: {e}",
                link.display(),
                target.display()
            ))
        })?;

        tracing::debug!("Linked {} -> {}", link.display(), target.display());
        Ok(link)
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        ErrorKind::Unsupported,
        "symbolic links are only supported on unix",
    ))
}

/// True if `path` exists and resolves, through any links, to a regular file
#[must_use]
pub fn resolves_to_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file())
}
