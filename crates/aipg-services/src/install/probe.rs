use aipg_devices::{LEVEL_ZERO_SELECTOR_VAR, LEVEL_ZERO_WILDCARD};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{EnvContext, Installable, UvInstaller};
use crate::error::{CheckStage, Component, InstallError, ServiceCheckError};
use crate::paths::device_probe_executable;
use crate::runner::{existing_file, CommandSpec};

/// The `ls_level_zero` device probe and its python requirements.
#[derive(Clone)]
pub struct DeviceProbeTool {
    uv: UvInstaller,
}

impl DeviceProbeTool {
    pub fn new(ctx: EnvContext) -> Self {
        Self {
            uv: UvInstaller::new(ctx),
        }
    }

    fn ctx(&self) -> &EnvContext {
        self.uv.python().ctx()
    }

    pub fn executable(&self) -> PathBuf {
        device_probe_executable(self.ctx().env_dir())
    }

    /// Run the probe with every Level Zero device visible.
    pub async fn probe_output(&self) -> Result<String, InstallError> {
        let exe = existing_file(self.executable())?;
        let spec = CommandSpec::new(exe)
            .env(LEVEL_ZERO_SELECTOR_VAR, LEVEL_ZERO_WILDCARD)
            .source(&self.ctx().source);
        Ok(self.ctx().runner.run(&spec).await?.stdout)
    }

    async fn install_requirements(&self) -> Result<(), InstallError> {
        let requirements = self.ctx().paths.device_probe_requirements();
        self.uv.install_requirements(&requirements, &[]).await
    }

    async fn copy_probe(&self) -> Result<(), InstallError> {
        let source = existing_file(self.ctx().paths.device_probe_source())?;
        let target = self.executable();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_file(&target).await?;
        }
        info!(source = %self.ctx().source, "copying ls_level_zero to {}", target.display());
        tokio::fs::copy(&source, &target).await?;
        Ok(())
    }
}

#[async_trait]
impl Installable for DeviceProbeTool {
    fn component(&self) -> Component {
        Component::DeviceProbe
    }

    async fn check(&self) -> Result<(), InstallError> {
        self.uv.check().await?;
        let requirements = self.ctx().paths.device_probe_requirements();
        if let Err(e) = self.uv.check_requirements(&requirements).await {
            warn!(source = %self.ctx().source, "probe requirements check failed: {}", e);
            return Err(ServiceCheckError::new(Component::DeviceProbe, CheckStage::Requirements).into());
        }
        if let Err(e) = self.probe_output().await {
            warn!(source = %self.ctx().source, "probe check failed: {}", e);
            return Err(ServiceCheckError::main(Component::DeviceProbe).into());
        }
        Ok(())
    }

    async fn install(&self) -> Result<(), InstallError> {
        self.uv.ensure_installed().await?;
        self.install_requirements().await?;
        self.copy_probe().await
    }

    async fn repair(&self, error: &ServiceCheckError) -> Result<(), InstallError> {
        let stage = if error.component == Component::DeviceProbe {
            error.stage
        } else {
            self.uv.repair(error).await?;
            CheckStage::Requirements
        };

        match stage {
            CheckStage::Requirements => {
                self.install_requirements().await?;
                self.copy_probe().await
            }
            CheckStage::Main => self.copy_probe().await,
            stage => Err(InstallError::UnknownRepairStage {
                component: Component::DeviceProbe,
                stage,
            }),
        }
    }
}
