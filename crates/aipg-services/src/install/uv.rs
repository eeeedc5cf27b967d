use async_trait::async_trait;
use std::path::Path;
use tracing::warn;

use super::{EnvContext, Installable, PipInstaller, PythonEnv};
use crate::error::{Component, InstallError, ServiceCheckError};
use crate::runner::{existing_file, ProcessResult};

/// uv, installed through pip, used for every dependency install.
#[derive(Clone)]
pub struct UvInstaller {
    pip: PipInstaller,
}

impl UvInstaller {
    pub fn new(ctx: EnvContext) -> Self {
        Self {
            pip: PipInstaller::new(ctx),
        }
    }

    pub fn pip(&self) -> &PipInstaller {
        &self.pip
    }

    pub fn python(&self) -> &PythonEnv {
        self.pip.python()
    }

    /// Run `python -m uv pip <args>`.
    pub async fn run<I, S>(&self, args: I) -> Result<ProcessResult, InstallError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let mut full: Vec<String> = vec!["-m".into(), "uv".into(), "pip".into()];
        full.extend(args.into_iter().map(Into::into));
        self.python().ctx().run_python(full).await
    }

    /// Install a requirements file with extra uv arguments.
    pub async fn install_requirements(
        &self,
        requirements: &Path,
        extra_args: &[String],
    ) -> Result<(), InstallError> {
        let requirements = existing_file(requirements)?;
        let mut args = vec![
            "install".to_string(),
            "-r".to_string(),
            requirements.display().to_string(),
        ];
        args.extend(extra_args.iter().cloned());
        self.run(args).await?;
        Ok(())
    }

    pub async fn check_requirements(&self, requirements: &Path) -> Result<(), InstallError> {
        self.pip.check_requirements(requirements).await
    }

    async fn install_uv(&self) -> Result<(), InstallError> {
        self.pip.run(["install", "uv"]).await?;
        Ok(())
    }
}

#[async_trait]
impl Installable for UvInstaller {
    fn component(&self) -> Component {
        Component::Uv
    }

    async fn check(&self) -> Result<(), InstallError> {
        self.pip.check().await?;
        if let Err(e) = self.run(["--version"]).await {
            warn!(source = %self.python().ctx().source, "uv check failed: {}", e);
            return Err(ServiceCheckError::main(Component::Uv).into());
        }
        Ok(())
    }

    async fn install(&self) -> Result<(), InstallError> {
        self.pip.ensure_installed().await?;
        self.install_uv().await
    }

    async fn repair(&self, error: &ServiceCheckError) -> Result<(), InstallError> {
        if error.component != Component::Uv {
            self.pip.repair(error).await?;
        }
        self.install_uv().await
    }
}
