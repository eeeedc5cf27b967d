//! Shared orchestration context.

use std::path::Path;
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::devices::DeviceSelector;
use crate::download::Downloader;
use crate::install::{EnvContext, GitTool};
use crate::paths::ServicePaths;
use crate::readiness::ReadinessProber;
use crate::runner::{CommandRunner, SystemRunner};
use crate::sink::{LogSink, TracingSink};
use crate::status::StatusBus;
use crate::versions::VersionCatalog;

/// Everything a backend service needs from its surroundings.
///
/// Built once at startup and handed to every service as an `Arc`.
pub struct OrchestrationContext {
    pub config: OrchestratorConfig,
    pub paths: ServicePaths,
    pub runner: Arc<dyn CommandRunner>,
    pub sink: Arc<dyn LogSink>,
    pub bus: StatusBus,
    pub prober: ReadinessProber,
    pub versions: VersionCatalog,
    pub downloader: Downloader,
}

impl OrchestrationContext {
    /// Context that runs real commands and logs through `tracing`.
    pub fn new(config: OrchestratorConfig) -> Arc<Self> {
        let sink: Arc<dyn LogSink> = Arc::new(TracingSink);
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(sink.clone()));
        Arc::new(Self::with_parts(config, runner, sink))
    }

    /// Context with a custom runner and sink.
    pub fn with_parts(
        config: OrchestratorConfig,
        runner: Arc<dyn CommandRunner>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let paths = ServicePaths::new(&config.base_dir);
        let prober = ReadinessProber::new(config.poll_interval, config.health_request_timeout);
        let versions = VersionCatalog::new(paths.versions_file(), config.remote_versions_url.clone());
        Self {
            paths,
            runner,
            sink,
            bus: StatusBus::default(),
            prober,
            versions,
            downloader: Downloader::new(),
            config,
        }
    }

    pub fn device_selector(&self) -> DeviceSelector {
        DeviceSelector::new(
            self.runner.clone(),
            self.paths.clone(),
            self.sink.clone(),
            self.config.device_arch_override,
        )
    }

    pub fn env(&self, env_dir: &Path, source: &str) -> EnvContext {
        EnvContext::new(self.runner.clone(), self.paths.clone(), env_dir, source)
    }

    pub fn git(&self, source: &str) -> GitTool {
        GitTool::new(self.runner.clone(), self.paths.clone(), source)
    }
}
