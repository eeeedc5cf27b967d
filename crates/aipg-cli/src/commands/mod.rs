//! CLI commands.

use aipg_services::{OrchestrationContext, OrchestratorConfig, ServiceRegistry};
use std::path::PathBuf;
use std::sync::Arc;

pub mod devices;
pub mod info;
pub mod list;
pub mod setup;
pub mod start;
pub mod uninstall;

/// Options shared by every command.
pub(crate) struct Options {
    pub base_dir: Option<PathBuf>,
    pub preview: bool,
}

impl Options {
    pub(crate) fn config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::from_env();
        if let Some(dir) = &self.base_dir {
            config.media_dir = dir.join("media");
            config.base_dir = dir.clone();
        }
        if self.preview {
            config.enable_preview_features = true;
        }
        config
    }

    pub(crate) fn registry(&self) -> miette::Result<ServiceRegistry> {
        let ctx = OrchestrationContext::new(self.config());
        ctx.paths
            .ensure_dirs()
            .map_err(|e| miette::miette!("Failed to create data directories: {}", e))?;
        ServiceRegistry::build(&ctx).map_err(|e| miette::miette!("{}", e))
    }
}

pub(crate) fn lookup<'a>(
    registry: &'a ServiceRegistry,
    name: &str,
) -> miette::Result<&'a Arc<aipg_services::BackendService>> {
    registry.get(name).map_err(|e| {
        let known: Vec<_> = registry.registered().map(|s| s.name()).collect();
        miette::miette!("{} (known services: {})", e, known.join(", "))
    })
}
