//! Staging directories that replace their final directory in one move.
//!
//! An install builds into `<parent>/.<name>.staging` and only touches the
//! final directory at [`Containment::commit`], which removes the previous
//! directory and renames the staging one into its place. A failed run
//! leaves the staging directory behind and the final directory intact.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A staging directory paired with the final directory it will replace.
#[derive(Debug, Clone)]
pub struct Containment {
    final_dir: PathBuf,
    staging_dir: PathBuf,
}

impl Containment {
    pub fn new(final_dir: impl Into<PathBuf>) -> Self {
        let final_dir = final_dir.into();
        let name = final_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "install".to_string());
        let staging_dir = final_dir.with_file_name(format!(".{name}.staging"));
        Self {
            final_dir,
            staging_dir,
        }
    }

    pub fn final_dir(&self) -> &Path {
        &self.final_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Create an empty staging directory, removing one left by a failed run.
    pub async fn prepare(&self) -> io::Result<()> {
        if tokio::fs::try_exists(&self.staging_dir).await? {
            warn!(
                "removing stale staging directory {}",
                self.staging_dir.display()
            );
            tokio::fs::remove_dir_all(&self.staging_dir).await?;
        }
        tokio::fs::create_dir_all(&self.staging_dir).await
    }

    /// Replace the final directory with the staging directory.
    pub async fn commit(&self) -> io::Result<PathBuf> {
        if tokio::fs::try_exists(&self.final_dir).await? {
            debug!("removing previous {}", self.final_dir.display());
            tokio::fs::remove_dir_all(&self.final_dir).await?;
        }
        tokio::fs::rename(&self.staging_dir, &self.final_dir).await?;
        debug!(
            "moved {} to {}",
            self.staging_dir.display(),
            self.final_dir.display()
        );
        Ok(self.final_dir.clone())
    }
}

/// Recursively copy `from` into `to`, creating `to` if needed.
pub async fn copy_dir_all(from: &Path, to: &Path) -> io::Result<()> {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    tokio::task::spawn_blocking(move || copy_dir_blocking(&from, &to))
        .await
        .map_err(io::Error::other)?
}

fn copy_dir_blocking(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_blocking(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Move the contents of a lone top-level directory up into `dir`.
///
/// Archives often wrap everything in one folder; callers want the files
/// directly under `dir`. Does nothing unless `dir` holds exactly one
/// entry and that entry is a directory.
pub async fn flatten_single_dir(dir: &Path) -> io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut only: Option<PathBuf> = None;
    while let Some(entry) = entries.next_entry().await? {
        if only.is_some() {
            return Ok(());
        }
        only = Some(entry.path());
    }
    let Some(inner) = only else {
        return Ok(());
    };
    if !tokio::fs::metadata(&inner).await?.is_dir() {
        return Ok(());
    }

    let mut children = tokio::fs::read_dir(&inner).await?;
    while let Some(child) = children.next_entry().await? {
        tokio::fs::rename(child.path(), dir.join(child.file_name())).await?;
    }
    tokio::fs::remove_dir(&inner).await
}
