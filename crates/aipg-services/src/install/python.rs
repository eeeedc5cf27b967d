use async_trait::async_trait;
use tracing::{info, warn};

use super::{EnvContext, Installable};
use crate::containment::copy_dir_all;
use crate::error::{Component, InstallError, ServiceCheckError};
use crate::runner::existing_file;

/// The interpreter env, cloned from the prototype env.
#[derive(Clone)]
pub struct PythonEnv {
    ctx: EnvContext,
}

impl PythonEnv {
    pub fn new(ctx: EnvContext) -> Self {
        Self { ctx }
    }

    pub fn ctx(&self) -> &EnvContext {
        &self.ctx
    }

    async fn clone_prototype_env(&self) -> Result<(), InstallError> {
        let prototype = existing_file(self.ctx.paths.prototype_python_env())?;
        let target = self.ctx.env_dir();
        if tokio::fs::try_exists(target).await? {
            info!(source = %self.ctx.source, "removing existing python env at {}", target.display());
            tokio::fs::remove_dir_all(target).await?;
        }
        info!(source = %self.ctx.source, "copying prototype python env to {}", target.display());
        copy_dir_all(&prototype, target).await?;
        Ok(())
    }
}

#[async_trait]
impl Installable for PythonEnv {
    fn component(&self) -> Component {
        Component::Python
    }

    async fn check(&self) -> Result<(), InstallError> {
        match self.ctx.run_python(["--version"]).await {
            Ok(_) => Ok(()),
            Err(e @ InstallError::MissingFile(_)) => Err(e),
            Err(e) => {
                warn!(source = %self.ctx.source, "python check failed: {}", e);
                Err(ServiceCheckError::main(Component::Python).into())
            }
        }
    }

    async fn install(&self) -> Result<(), InstallError> {
        self.clone_prototype_env().await
    }

    async fn repair(&self, _error: &ServiceCheckError) -> Result<(), InstallError> {
        self.install().await
    }
}
