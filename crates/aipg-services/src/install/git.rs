use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::Installable;
use crate::containment::copy_dir_all;
use crate::error::{Component, InstallError, ServiceCheckError};
use crate::paths::ServicePaths;
use crate::runner::{CommandRunner, CommandSpec, ProcessResult};

/// git, either the bundled portable copy or the one on `PATH`.
#[derive(Clone)]
pub struct GitTool {
    runner: Arc<dyn CommandRunner>,
    paths: ServicePaths,
    source: String,
}

impl GitTool {
    pub fn new(runner: Arc<dyn CommandRunner>, paths: ServicePaths, source: impl Into<String>) -> Self {
        Self {
            runner,
            paths,
            source: source.into(),
        }
    }

    /// Installed portable git if present, else plain `git`.
    pub fn program(&self) -> PathBuf {
        let portable = self.paths.git_executable();
        if portable.exists() {
            portable
        } else {
            PathBuf::from("git")
        }
    }

    /// Directory to add to a child's `PATH` so it finds the same git.
    pub fn path_dir(&self) -> Option<PathBuf> {
        let portable = self.paths.git_executable();
        if portable.exists() {
            portable.parent().map(Path::to_path_buf)
        } else {
            None
        }
    }

    pub async fn run<I, S>(&self, args: I) -> Result<ProcessResult, InstallError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let spec = CommandSpec::new(self.program())
            .args(args)
            .source(&self.source);
        Ok(self.runner.run(&spec).await?)
    }

    /// Clone `url` into `dest` and check out `git_ref`.
    pub async fn clone_at(&self, url: &str, git_ref: &str, dest: &Path) -> Result<(), InstallError> {
        let dest_str = dest.display().to_string();
        info!(source = %self.source, "cloning {} at {} into {}", url, git_ref, dest_str);
        self.run(["clone", url, dest_str.as_str()]).await?;
        self.run(["-C", dest_str.as_str(), "checkout", git_ref]).await?;
        Ok(())
    }

    /// Revision checked out in `repo`, if it is a readable repository.
    pub async fn current_revision(&self, repo: &Path) -> Option<String> {
        let repo = repo.display().to_string();
        match self
            .run(["-C", repo.as_str(), "describe", "--tags", "--always"])
            .await
        {
            Ok(result) => Some(result.stdout.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                warn!(source = %self.source, "failed to read revision of {}: {}", repo, e);
                None
            }
        }
    }
}

#[async_trait]
impl Installable for GitTool {
    fn component(&self) -> Component {
        Component::Git
    }

    async fn check(&self) -> Result<(), InstallError> {
        if let Err(e) = self.run(["--version"]).await {
            warn!(source = %self.source, "git check failed: {}", e);
            return Err(ServiceCheckError::main(Component::Git).into());
        }
        Ok(())
    }

    async fn install(&self) -> Result<(), InstallError> {
        let bundled = self.paths.portable_git();
        if !tokio::fs::try_exists(&bundled).await? {
            return Err(InstallError::Unavailable(format!(
                "git is not installed and no portable git is bundled at {}",
                bundled.display()
            )));
        }
        let target = self.paths.git_dir();
        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_dir_all(&target).await?;
        }
        info!(source = %self.source, "copying portable git to {}", target.display());
        copy_dir_all(&bundled, &target).await?;
        Ok(())
    }

    async fn repair(&self, _error: &ServiceCheckError) -> Result<(), InstallError> {
        self.install().await
    }
}
