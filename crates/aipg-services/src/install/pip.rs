use async_trait::async_trait;
use std::path::Path;
use tracing::warn;

use super::{EnvContext, Installable, PythonEnv};
use crate::error::{CheckStage, Component, InstallError, ServiceCheckError};
use crate::runner::{existing_file, ProcessResult};

/// pip inside a [`PythonEnv`].
#[derive(Clone)]
pub struct PipInstaller {
    python: PythonEnv,
}

impl PipInstaller {
    pub fn new(ctx: EnvContext) -> Self {
        Self {
            python: PythonEnv::new(ctx),
        }
    }

    pub fn python(&self) -> &PythonEnv {
        &self.python
    }

    fn ctx(&self) -> &EnvContext {
        self.python.ctx()
    }

    /// Run `python -m pip <args>`.
    pub async fn run<I, S>(&self, args: I) -> Result<ProcessResult, InstallError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let mut full: Vec<String> = vec!["-m".into(), "pip".into()];
        full.extend(args.into_iter().map(Into::into));
        self.ctx().run_python(full).await
    }

    /// Verify every requirement listed in `requirements` is importable.
    pub async fn check_requirements(&self, requirements: &Path) -> Result<(), InstallError> {
        let requirements = existing_file(requirements)?;
        let script = format!(
            "import pkg_resources; pkg_resources.require([s for s in open(r'{}') if s and s[0].isalpha()])",
            requirements.display()
        );
        self.ctx().run_python(["-c".to_string(), script]).await?;
        Ok(())
    }

    async fn get_pip(&self) -> Result<(), InstallError> {
        let script = existing_file(self.ctx().env_dir().join("get-pip.py"))?;
        self.ctx()
            .run_python([script.display().to_string()])
            .await?;
        Ok(())
    }

    async fn install_setuptools(&self) -> Result<(), InstallError> {
        self.run(["install", "setuptools"]).await?;
        Ok(())
    }
}

#[async_trait]
impl Installable for PipInstaller {
    fn component(&self) -> Component {
        Component::Pip
    }

    async fn check(&self) -> Result<(), InstallError> {
        self.python.check().await?;
        if let Err(e) = self.run(["--version"]).await {
            warn!(source = %self.ctx().source, "pip check failed: {}", e);
            return Err(ServiceCheckError::main(Component::Pip).into());
        }
        if let Err(e) = self.run(["show", "setuptools"]).await {
            warn!(source = %self.ctx().source, "setuptools check failed: {}", e);
            return Err(ServiceCheckError::new(Component::Pip, CheckStage::Setuptools).into());
        }
        Ok(())
    }

    async fn install(&self) -> Result<(), InstallError> {
        self.python.ensure_installed().await?;
        self.get_pip().await?;
        self.install_setuptools().await
    }

    async fn repair(&self, error: &ServiceCheckError) -> Result<(), InstallError> {
        // a repaired parent leaves a bare env behind
        let stage = if error.component == Component::Pip {
            error.stage
        } else {
            self.python.repair(error).await?;
            CheckStage::Main
        };

        match stage {
            CheckStage::Main => {
                self.get_pip().await?;
                self.install_setuptools().await
            }
            CheckStage::Setuptools => self.install_setuptools().await,
            stage => Err(InstallError::UnknownRepairStage {
                component: Component::Pip,
                stage,
            }),
        }
    }
}
