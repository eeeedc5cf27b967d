//! Orchestrator configuration.

use aipg_devices::Arch;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every orchestrated service.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root directory holding interpreter envs, service dirs and resources
    pub base_dir: PathBuf,
    /// Directory where image backends write their output
    pub media_dir: PathBuf,
    /// Whether preview-only services (ollama) are registered
    pub enable_preview_features: bool,
    /// Delay between health polls
    pub poll_interval: Duration,
    /// Delay between killing a service and reporting it stopped
    pub stop_grace: Duration,
    /// Delay between SIGTERM and a forced kill
    pub kill_grace: Duration,
    /// Per-request timeout of a health poll
    pub health_request_timeout: Duration,
    /// Remote `backend-versions.json` consulted before the local copy
    pub remote_versions_url: Option<String>,
    /// Skip device probing for installs and assume this architecture
    pub device_arch_override: Option<Arch>,
    /// Replaces the default ComfyUI launch flags
    pub comfyui_parameters: Option<Vec<String>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let base_dir = default_base_dir();
        Self {
            media_dir: base_dir.join("media"),
            base_dir,
            enable_preview_features: false,
            poll_interval: Duration::from_millis(250),
            stop_grace: Duration::from_secs(1),
            kill_grace: Duration::from_millis(500),
            health_request_timeout: Duration::from_secs(5),
            remote_versions_url: None,
            device_arch_override: None,
            comfyui_parameters: None,
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aipg")
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .map(Duration::from_millis)
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("AIPG_BASE_DIR") {
            config.base_dir = PathBuf::from(dir);
            config.media_dir = config.base_dir.join("media");
        }
        if let Ok(dir) = std::env::var("AIPG_MEDIA_DIR") {
            config.media_dir = PathBuf::from(dir);
        }
        if let Some(enabled) = env_flag("AIPG_ENABLE_PREVIEW") {
            config.enable_preview_features = enabled;
        }
        if let Some(interval) = env_millis("AIPG_POLL_INTERVAL_MS") {
            config.poll_interval = interval;
        }
        if let Some(grace) = env_millis("AIPG_STOP_GRACE_MS") {
            config.stop_grace = grace;
        }
        config.remote_versions_url = std::env::var("AIPG_REMOTE_VERSIONS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        config.device_arch_override = std::env::var("AIPG_DEVICE_ARCH")
            .ok()
            .and_then(|tag| Arch::from_tag(&tag));

        config
    }

    /// Create a builder for configuration.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }
}

/// Builder for orchestrator configuration.
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Sets the base directory; the media directory follows unless set later.
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_dir = path.into();
        self.config.media_dir = self.config.base_dir.join("media");
        self
    }

    pub fn media_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.media_dir = path.into();
        self
    }

    pub fn enable_preview_features(mut self, enabled: bool) -> Self {
        self.config.enable_preview_features = enabled;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.config.stop_grace = grace;
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.config.kill_grace = grace;
        self
    }

    pub fn health_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.health_request_timeout = timeout;
        self
    }

    pub fn remote_versions_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote_versions_url = Some(url.into());
        self
    }

    pub fn device_arch_override(mut self, arch: Arch) -> Self {
        self.config.device_arch_override = Some(arch);
        self
    }

    pub fn comfyui_parameters(mut self, params: Vec<String>) -> Self {
        self.config.comfyui_parameters = Some(params);
        self
    }

    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}
