//! Per-backend capability records.
//!
//! Every backend is the same [`BackendService`](crate::BackendService)
//! driven by a different [`ServiceProfile`]: where it lives on disk, how
//! it is launched and health-checked, and which steps install it.

use aipg_devices::{Device, DeviceSelectorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::paths::{python_executable, ServicePaths};
use crate::ports::free_port;
use crate::setup::{InstallStep, Root};
use crate::supervisor::LaunchCommand;

pub const AI_BACKEND: &str = "ai-backend";
pub const COMFYUI_BACKEND: &str = "comfyui-backend";
pub const LLAMACPP_BACKEND: &str = "llamacpp-backend";
pub const OPENVINO_BACKEND: &str = "openvino-backend";
pub const OLLAMA_BACKEND: &str = "ollama-backend";

/// Env of the default backend; its device probe serves the native backends.
pub const AI_BACKEND_ENV: &str = "ai-backend-env";
/// Service directory of the default backend, also holding the shared
/// device-specific requirement files.
pub const AI_BACKEND_SERVICE_DIR: &str = "service";

pub const DEFAULT_COMFYUI_PARAMETERS: [&str; 5] = [
    "--lowvram",
    "--disable-ipex-optimize",
    "--bf16-unet",
    "--reserve-vram",
    "6.0",
];

const COMFYUI_REPOSITORY: &str = "https://github.com/comfyanonymous/ComfyUI.git";
const LLAMACPP_ARCHIVE_URL: &str =
    "https://github.com/ipex-llm/ipex-llm/releases/download/v2.2.0/llama-cpp-ipex-llm-2.2.0-win.zip";
const OLLAMA_ARCHIVE_URL: &str =
    "https://github.com/ipex-llm/ipex-llm/releases/download/{release_tag}/ollama-ipex-llm-{version}-win.zip";
const OVMS_ARCHIVE_URL: &str =
    "https://github.com/openvinotoolkit/model_server/releases/download/v{version}/ovms_windows_python_on.zip";

/// User-adjustable settings of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSettings {
    /// Version pin used by installs, overriding the version catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_tag: Option<String>,
    /// Model served by backends that load one at launch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Resolved on-disk locations of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub env_dir: Option<PathBuf>,
    pub service_dir: PathBuf,
}

impl Layout {
    pub fn root(&self, root: Root) -> Option<&Path> {
        match root {
            Root::Env => self.env_dir.as_deref(),
            Root::Service => Some(&self.service_dir),
        }
    }

    /// Interpreter of the service env.
    pub fn python(&self) -> Option<PathBuf> {
        self.env_dir.as_deref().map(python_executable)
    }
}

/// Inputs to a profile's launch function.
pub struct LaunchContext<'a> {
    pub layout: &'a Layout,
    pub port: u16,
    pub devices: &'a [Device],
    pub config: &'a OrchestratorConfig,
    pub settings: &'a ServiceSettings,
    /// Directory of the portable git, if installed.
    pub git_dir: Option<PathBuf>,
}

impl LaunchContext<'_> {
    fn selected_device(&self) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.selected)
            .map(|d| d.id.as_str())
    }

    fn python_command(&self, script: &str) -> LaunchCommand {
        let python = self
            .layout
            .python()
            .unwrap_or_else(|| PathBuf::from("python"));
        LaunchCommand::new(python, &self.layout.service_dir)
            .args([script.to_string(), "--port".to_string(), self.port.to_string()])
    }

    fn with_git_path(&self, command: LaunchCommand) -> LaunchCommand {
        match &self.git_dir {
            Some(dir) => {
                let mut paths: Vec<PathBuf> = std::env::var_os("PATH")
                    .map(|p| std::env::split_paths(&p).collect())
                    .unwrap_or_default();
                paths.push(dir.clone());
                match std::env::join_paths(paths) {
                    Ok(joined) => command.env("PATH", joined.to_string_lossy()),
                    Err(_) => command,
                }
            }
            None => command,
        }
    }
}

/// Everything that differs between backends.
#[derive(Clone)]
pub struct ServiceProfile {
    pub name: &'static str,
    /// Interpreter env directory name, for python backends.
    pub env_dir: Option<&'static str>,
    pub service_dir: &'static str,
    /// Whether setup builds the service directory; otherwise it ships with
    /// the application.
    pub installs_service_dir: bool,
    /// Env whose device probe lists devices; `None` uses the selector's
    /// static device list.
    pub probe_env: Option<&'static str>,
    pub health_path: &'static str,
    /// Suffix of the advertised base URL.
    pub base_path: &'static str,
    pub is_required: bool,
    pub preview_only: bool,
    pub port_range: RangeInclusive<u16>,
    pub startup_timeout: Duration,
    pub device_selector: DeviceSelectorKind,
    pub default_version: Option<&'static str>,
    pub default_release_tag: Option<&'static str>,
    pub is_set_up: fn(&Layout) -> bool,
    pub launch: fn(&LaunchContext<'_>) -> LaunchCommand,
    pub install_plan: fn() -> Vec<InstallStep>,
}

impl fmt::Debug for ServiceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProfile")
            .field("name", &self.name)
            .field("env_dir", &self.env_dir)
            .field("service_dir", &self.service_dir)
            .field("health_path", &self.health_path)
            .field("port_range", &self.port_range)
            .finish_non_exhaustive()
    }
}

impl ServiceProfile {
    pub fn layout(&self, paths: &ServicePaths) -> Layout {
        Layout {
            env_dir: self.env_dir.map(|dir| paths.env_dir(dir)),
            service_dir: paths.service_dir(self.service_dir),
        }
    }

    pub fn base_url(&self, port: u16) -> String {
        format!("http://127.0.0.1:{}{}", port, self.base_path)
    }

    pub fn health_url(&self, port: u16) -> String {
        format!("http://127.0.0.1:{}{}", port, self.health_path)
    }

    pub fn default_settings(&self) -> ServiceSettings {
        ServiceSettings {
            version: self.default_version.map(str::to_string),
            release_tag: self.default_release_tag.map(str::to_string),
            model: None,
        }
    }
}

/// Every known backend, in registration order.
pub fn all() -> Vec<ServiceProfile> {
    vec![ai_backend(), openvino(), comfyui(), llamacpp(), ollama()]
}

/// Profile by service name.
pub fn by_name(name: &str) -> Option<ServiceProfile> {
    all().into_iter().find(|p| p.name == name)
}

fn exe(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

pub fn ai_backend() -> ServiceProfile {
    ServiceProfile {
        name: AI_BACKEND,
        env_dir: Some(AI_BACKEND_ENV),
        service_dir: AI_BACKEND_SERVICE_DIR,
        installs_service_dir: false,
        probe_env: Some(AI_BACKEND_ENV),
        health_path: "/healthy",
        base_path: "",
        is_required: true,
        preview_only: false,
        port_range: 59000..=59999,
        startup_timeout: Duration::from_secs(120),
        device_selector: DeviceSelectorKind::LevelZero,
        default_version: None,
        default_release_tag: None,
        is_set_up: |layout| layout.python().is_some_and(|p| p.exists()),
        launch: |ctx| {
            let command = ctx.python_command("web_api.py");
            ctx.with_git_path(command)
        },
        install_plan: || {
            vec![
                InstallStep::PrepareEnvironment,
                InstallStep::EnsureGit,
                InstallStep::EnsureDeviceProbe,
                InstallStep::DetectDevice,
                InstallStep::InstallRequirements {
                    file: "requirements.txt",
                    extra_args: &["--index-strategy", "unsafe-best-match"],
                },
                InstallStep::InstallWheel {
                    file: "requirements-ipex-llm.txt",
                    extra_args: &["--index-strategy", "unsafe-best-match", "--prerelease=allow"],
                },
                InstallStep::InstallDeviceRequirements {
                    extra_args: &["--index-strategy", "unsafe-best-match", "--prerelease=allow"],
                },
            ]
        },
    }
}

pub fn comfyui() -> ServiceProfile {
    ServiceProfile {
        name: COMFYUI_BACKEND,
        env_dir: Some("comfyui-backend-env"),
        service_dir: "ComfyUI",
        installs_service_dir: true,
        probe_env: Some("comfyui-backend-env"),
        health_path: "/queue",
        base_path: "",
        is_required: false,
        preview_only: false,
        port_range: 49000..=49999,
        startup_timeout: Duration::from_secs(120),
        device_selector: DeviceSelectorKind::LevelZero,
        default_version: Some("v0.3.44"),
        default_release_tag: None,
        is_set_up: |layout| {
            layout.env_dir.as_deref().is_some_and(Path::exists)
                && layout.service_dir.join("extra_model_paths.yaml").exists()
        },
        launch: |ctx| {
            let mut command = ctx.python_command("main.py").args([
                "--preview-method".to_string(),
                "auto".to_string(),
                "--output-directory".to_string(),
                ctx.config.media_dir.display().to_string(),
            ]);
            command = match &ctx.config.comfyui_parameters {
                Some(params) => command.args(params.iter().cloned()),
                None => command.args(DEFAULT_COMFYUI_PARAMETERS),
            };
            ctx.with_git_path(command).env("PYTHONNOUSERSITE", "true")
        },
        install_plan: || {
            vec![
                InstallStep::PrepareEnvironment,
                InstallStep::EnsureGit,
                InstallStep::EnsureDeviceProbe,
                InstallStep::DetectDevice,
                InstallStep::InstallDeviceRequirements { extra_args: &[] },
                InstallStep::CloneRepository {
                    url: COMFYUI_REPOSITORY,
                },
                InstallStep::InstallRequirements {
                    file: "requirements.txt",
                    extra_args: &[],
                },
                InstallStep::ConfigureComfyUi,
            ]
        },
    }
}

pub fn llamacpp() -> ServiceProfile {
    ServiceProfile {
        name: LLAMACPP_BACKEND,
        env_dir: Some("llama-cpp-env"),
        service_dir: "LlamaCPP",
        installs_service_dir: false,
        probe_env: Some(AI_BACKEND_ENV),
        health_path: "/health",
        base_path: "",
        is_required: false,
        preview_only: false,
        port_range: 39000..=39999,
        startup_timeout: Duration::from_secs(60),
        device_selector: DeviceSelectorKind::LevelZero,
        default_version: None,
        default_release_tag: None,
        is_set_up: |layout| {
            let Some(env) = layout.env_dir.as_deref() else {
                return false;
            };
            python_executable(env).exists()
                && env.join("llama-cpp-rest").join(exe("llama-server")).exists()
        },
        launch: |ctx| {
            let llm_port = free_port(39100..=39199).unwrap_or(39100);
            let embedding_port = free_port(39200..=39299).unwrap_or(39200);
            ctx.python_command("llama_web_api.py")
                .env("PYTHONNOUSERSITE", "true")
                .env("LLAMA_LLM_PORT", llm_port.to_string())
                .env("LLAMA_EMBEDDING_PORT", embedding_port.to_string())
        },
        install_plan: || {
            vec![
                InstallStep::PrepareEnvironment,
                InstallStep::InstallRequirements {
                    file: "requirements.txt",
                    extra_args: &[],
                },
                InstallStep::DownloadArchive {
                    url: LLAMACPP_ARCHIVE_URL,
                    root: Root::Env,
                    file: "llama-cpp-ipex-llm.zip",
                },
                InstallStep::ExtractArchive {
                    into: "llama-cpp-rest",
                    flatten: true,
                },
            ]
        },
    }
}

pub fn openvino() -> ServiceProfile {
    ServiceProfile {
        name: OPENVINO_BACKEND,
        env_dir: None,
        service_dir: "OpenVINO",
        installs_service_dir: true,
        probe_env: None,
        health_path: "/v2/health/ready",
        base_path: "/v3",
        is_required: false,
        preview_only: false,
        port_range: 29000..=29999,
        startup_timeout: Duration::from_secs(300),
        device_selector: DeviceSelectorKind::OpenVino,
        default_version: Some("2025.3"),
        default_release_tag: None,
        is_set_up: |layout| layout.service_dir.join("ovms").join(exe("ovms")).exists(),
        launch: |ctx| {
            let ovms_dir = ctx.layout.service_dir.join("ovms");
            let mut command = LaunchCommand::new(ovms_dir.join(exe("ovms")), &ctx.layout.service_dir)
                .args([
                    "--rest_bind_address".to_string(),
                    "127.0.0.1".to_string(),
                    "--rest_port".to_string(),
                    ctx.port.to_string(),
                    "--rest_workers".to_string(),
                    "4".to_string(),
                    "--model_repository_path".to_string(),
                    "models".to_string(),
                    "--target_device".to_string(),
                    ctx.selected_device().unwrap_or("AUTO").to_string(),
                ]);
            if let Some(model) = &ctx.settings.model {
                command = command.args([
                    "--source_model".to_string(),
                    model.clone(),
                    "--task".to_string(),
                    "text_generation".to_string(),
                ]);
            }
            command
        },
        install_plan: || {
            vec![
                InstallStep::DownloadArchive {
                    url: OVMS_ARCHIVE_URL,
                    root: Root::Service,
                    file: "ovms.zip",
                },
                InstallStep::ExtractArchive {
                    into: "ovms",
                    flatten: true,
                },
            ]
        },
    }
}

pub fn ollama() -> ServiceProfile {
    ServiceProfile {
        name: OLLAMA_BACKEND,
        env_dir: None,
        service_dir: "ollama-service",
        installs_service_dir: true,
        probe_env: Some(AI_BACKEND_ENV),
        health_path: "/api/version",
        base_path: "",
        is_required: false,
        preview_only: true,
        port_range: 40000..=41000,
        startup_timeout: Duration::from_secs(300),
        device_selector: DeviceSelectorKind::LevelZero,
        default_version: Some("2.3.0b20250630"),
        default_release_tag: Some("v2.3.0-nightly"),
        is_set_up: |layout| {
            layout
                .service_dir
                .join("ollama")
                .join(exe("ollama-lib"))
                .exists()
        },
        launch: |ctx| {
            let ollama_dir = ctx.layout.service_dir.join("ollama");
            LaunchCommand::new(ollama_dir.join(exe("ollama-lib")), &ollama_dir)
                .args(["serve"])
                .env("OLLAMA_HOST", format!("127.0.0.1:{}", ctx.port))
                .env("OLLAMA_ORIGINS", "*")
        },
        install_plan: || {
            vec![
                InstallStep::DownloadArchive {
                    url: OLLAMA_ARCHIVE_URL,
                    root: Root::Service,
                    file: "ollama.zip",
                },
                InstallStep::ExtractArchive {
                    into: "ollama",
                    flatten: true,
                },
            ]
        },
    }
}
