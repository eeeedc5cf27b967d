//! Installable components of a service environment.
//!
//! Each component knows how to check, install and repair itself and
//! depends on at most one parent component:
//!
//! ```text
//! PythonEnv <- PipInstaller <- UvInstaller <- DeviceProbeTool
//! GitTool
//! ```
//!
//! A check failure with a known [`ServiceCheckError`] stage is repaired
//! in place; any other failure triggers a fresh install.

mod git;
mod pip;
mod probe;
mod python;
mod uv;

pub use git::GitTool;
pub use pip::PipInstaller;
pub use probe::DeviceProbeTool;
pub use python::PythonEnv;
pub use uv::UvInstaller;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::{Component, InstallError, ServiceCheckError};
use crate::paths::{python_executable, ServicePaths};
use crate::runner::{existing_file, CommandRunner, CommandSpec, ProcessResult};

/// Something that can be verified and brought into a working state.
#[async_trait]
pub trait Installable: Send + Sync {
    fn component(&self) -> Component;

    /// Verify the component; a [`InstallError::Check`] names what broke.
    async fn check(&self) -> Result<(), InstallError>;

    /// Install from scratch.
    async fn install(&self) -> Result<(), InstallError>;

    /// Fix the failure reported by `check`.
    async fn repair(&self, error: &ServiceCheckError) -> Result<(), InstallError>;

    /// One check followed by at most one repair or install.
    async fn ensure_installed(&self) -> Result<(), InstallError> {
        match self.check().await {
            Ok(()) => Ok(()),
            Err(InstallError::Check(error)) => {
                info!(component = %self.component(), "repairing after: {}", error);
                self.repair(&error).await
            }
            Err(error) => {
                info!(component = %self.component(), "installing after: {}", error);
                self.install().await
            }
        }
    }
}

/// An interpreter env directory plus the means to run things in it.
#[derive(Clone)]
pub struct EnvContext {
    pub runner: Arc<dyn CommandRunner>,
    pub paths: ServicePaths,
    pub env_dir: PathBuf,
    /// Log source for command output.
    pub source: String,
}

impl EnvContext {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        paths: ServicePaths,
        env_dir: impl Into<PathBuf>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            paths,
            env_dir: env_dir.into(),
            source: source.into(),
        }
    }

    pub fn env_dir(&self) -> &Path {
        &self.env_dir
    }

    pub fn python(&self) -> PathBuf {
        python_executable(&self.env_dir)
    }

    /// Run the env's interpreter; fails with `MissingFile` if it is absent.
    pub async fn run_python<I, S>(&self, args: I) -> Result<ProcessResult, InstallError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let python = existing_file(self.python())?;
        let spec = CommandSpec::new(python).args(args).source(&self.source);
        Ok(self.runner.run(&spec).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CheckStage;
    use crate::paths::device_probe_executable;
    use crate::runner::scripted::{Outcome, ScriptedRunner};

    struct Fixture {
        _dir: tempfile::TempDir,
        paths: ServicePaths,
        env_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let paths = ServicePaths::new(dir.path());

        let proto = paths.prototype_python_env();
        let python = python_executable(&proto);
        std::fs::create_dir_all(python.parent().unwrap()).unwrap();
        std::fs::write(&python, "").unwrap();
        std::fs::write(proto.join("get-pip.py"), "").unwrap();

        let probe = paths.device_probe_source();
        std::fs::create_dir_all(probe.parent().unwrap()).unwrap();
        std::fs::write(&probe, "probe").unwrap();
        std::fs::write(paths.device_probe_requirements(), "pyyaml\n").unwrap();

        let env_dir = dir.path().join("ai-backend-env");
        Fixture {
            _dir: dir,
            paths,
            env_dir,
        }
    }

    fn ctx(fixture: &Fixture, runner: Arc<ScriptedRunner>) -> EnvContext {
        EnvContext::new(runner, fixture.paths.clone(), &fixture.env_dir, "test")
    }

    async fn installed_env(fixture: &Fixture) {
        crate::containment::copy_dir_all(&fixture.paths.prototype_python_env(), &fixture.env_dir)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_env_is_installed_fresh() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::new());
        let pip = PipInstaller::new(ctx(&fixture, runner.clone()));

        pip.ensure_installed().await.unwrap();

        assert!(python_executable(&fixture.env_dir).exists());
        assert_eq!(runner.count("get-pip.py"), 1);
        assert_eq!(runner.count("pip install setuptools"), 1);
        pip.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_setuptools_stage_repairs_only_setuptools() {
        let fixture = fixture();
        installed_env(&fixture).await;
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("pip show setuptools", vec![Outcome::Fail(1), Outcome::Ok(String::new())]),
        );
        let pip = PipInstaller::new(ctx(&fixture, runner.clone()));

        pip.ensure_installed().await.unwrap();

        assert_eq!(runner.count("pip install setuptools"), 1);
        assert_eq!(runner.count("get-pip.py"), 0);
        pip.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_broken_python_repairs_parent_then_self() {
        let fixture = fixture();
        installed_env(&fixture).await;
        std::fs::write(fixture.env_dir.join("stale"), "x").unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("--version", vec![Outcome::Fail(1), Outcome::Ok(String::new())]),
        );
        let uv = UvInstaller::new(ctx(&fixture, runner.clone()));

        uv.ensure_installed().await.unwrap();

        // python env recloned, so pip and uv are bootstrapped again
        assert!(!fixture.env_dir.join("stale").exists());
        assert_eq!(runner.count("get-pip.py"), 1);
        assert_eq!(runner.count("pip install setuptools"), 1);
        assert_eq!(runner.count("pip install uv"), 1);
    }

    #[tokio::test]
    async fn test_repair_terminates_when_fault_persists() {
        let fixture = fixture();
        installed_env(&fixture).await;
        let runner =
            Arc::new(ScriptedRunner::new().on("pip show setuptools", vec![Outcome::Fail(1)]));
        let pip = PipInstaller::new(ctx(&fixture, runner.clone()));

        pip.ensure_installed().await.unwrap();

        match pip.check().await {
            Err(InstallError::Check(e)) => {
                assert_eq!(e, ServiceCheckError::new(Component::Pip, CheckStage::Setuptools))
            }
            other => panic!("unexpected check result: {other:?}"),
        }
        assert_eq!(runner.count("pip install setuptools"), 1);
    }

    #[tokio::test]
    async fn test_pip_rejects_unknown_stage() {
        let fixture = fixture();
        installed_env(&fixture).await;
        let pip = PipInstaller::new(ctx(&fixture, Arc::new(ScriptedRunner::new())));
        let err = pip
            .repair(&ServiceCheckError::new(Component::Pip, CheckStage::Requirements))
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::UnknownRepairStage { .. }));
    }

    #[tokio::test]
    async fn test_probe_requirements_stage_falls_through_to_copy() {
        let fixture = fixture();
        installed_env(&fixture).await;
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("pkg_resources", vec![Outcome::Fail(1), Outcome::Ok(String::new())]),
        );
        let probe = DeviceProbeTool::new(ctx(&fixture, runner.clone()));

        probe.ensure_installed().await.unwrap();

        assert_eq!(runner.count("uv pip install -r"), 1);
        assert!(device_probe_executable(&fixture.env_dir).exists());
    }

    #[tokio::test]
    async fn test_probe_main_stage_only_copies() {
        let fixture = fixture();
        installed_env(&fixture).await;
        let runner = Arc::new(ScriptedRunner::new());
        let probe = DeviceProbeTool::new(ctx(&fixture, runner.clone()));

        // binary missing: check fails at the main stage
        probe.ensure_installed().await.unwrap();

        assert_eq!(runner.count("uv pip install -r"), 0);
        assert!(device_probe_executable(&fixture.env_dir).exists());
        probe.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_rejects_unknown_own_stage() {
        let fixture = fixture();
        installed_env(&fixture).await;
        let probe = DeviceProbeTool::new(ctx(&fixture, Arc::new(ScriptedRunner::new())));
        let err = probe
            .repair(&ServiceCheckError::new(Component::DeviceProbe, CheckStage::Setuptools))
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::UnknownRepairStage { .. }));
    }

    #[tokio::test]
    async fn test_probe_output_after_install() {
        let fixture = fixture();
        installed_env(&fixture).await;
        let runner = Arc::new(ScriptedRunner::new().on(
            "ls_level_zero",
            vec![Outcome::Ok(r#"[{"id":0,"name":"gpu","device_id":57867}]"#.into())],
        ));
        let probe = DeviceProbeTool::new(ctx(&fixture, runner.clone()));
        probe.ensure_installed().await.unwrap();

        let output = probe.probe_output().await.unwrap();
        assert!(output.contains("57867"));
    }

    #[tokio::test]
    async fn test_git_without_bundle_is_unavailable() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::new().on("git", vec![Outcome::Missing]));
        let git = GitTool::new(runner, fixture.paths.clone(), "test");
        let err = git.ensure_installed().await.unwrap_err();
        assert!(matches!(err, InstallError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_git_present_needs_nothing() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::new());
        let git = GitTool::new(runner.clone(), fixture.paths.clone(), "test");
        git.ensure_installed().await.unwrap();
        assert_eq!(runner.count("--version"), 1);
    }
}
