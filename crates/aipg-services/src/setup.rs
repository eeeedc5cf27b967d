//! Execution of a service's install plan.
//!
//! Everything a plan builds goes into containment directories first; the
//! final directories are replaced only after the last step succeeded.

use aipg_devices::Arch;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::containment::{flatten_single_dir, Containment};
use crate::context::OrchestrationContext;
use crate::download::DownloadRequest;
use crate::error::InstallError;
use crate::install::{DeviceProbeTool, Installable, UvInstaller};
use crate::profiles::{Layout, ServiceProfile, ServiceSettings, AI_BACKEND_SERVICE_DIR};
use crate::progress::ProgressReporter;
use crate::runner::{existing_file, CommandSpec};

/// Directory an install step writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Env,
    Service,
}

/// One step of an install plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    /// Clone the prototype interpreter env and bootstrap pip and uv in it.
    PrepareEnvironment,
    EnsureGit,
    EnsureDeviceProbe,
    /// Detect the best device architecture for the following steps.
    DetectDevice,
    /// Install a requirements file from the service directory.
    InstallRequirements {
        file: &'static str,
        extra_args: &'static [&'static str],
    },
    /// Install `requirements-<xpu|unknown>.txt` for the detected device.
    InstallDeviceRequirements { extra_args: &'static [&'static str] },
    /// Accelerated packages, skipped without a recognised GPU.
    InstallWheel {
        file: &'static str,
        extra_args: &'static [&'static str],
    },
    /// Clone into the service directory at the pinned version.
    CloneRepository { url: &'static str },
    /// Fetch an archive; `{version}` and `{release_tag}` in the url are
    /// filled from the pinned version.
    DownloadArchive {
        url: &'static str,
        root: Root,
        file: &'static str,
    },
    /// Unpack the last downloaded archive next to it.
    ExtractArchive { into: &'static str, flatten: bool },
    ConfigureComfyUi,
}

impl InstallStep {
    /// Step label reported in progress events.
    pub fn label(&self) -> &'static str {
        match self {
            InstallStep::PrepareEnvironment | InstallStep::EnsureGit => "start",
            InstallStep::EnsureDeviceProbe | InstallStep::DetectDevice => "Detecting intel device",
            InstallStep::InstallRequirements { .. }
            | InstallStep::InstallDeviceRequirements { .. }
            | InstallStep::InstallWheel { .. } => "install dependencies",
            InstallStep::CloneRepository { .. } => "install repository",
            InstallStep::DownloadArchive { .. } => "download",
            InstallStep::ExtractArchive { .. } => "extract",
            InstallStep::ConfigureComfyUi => "configure comfyUI",
        }
    }

    fn describe(&self) -> String {
        match self {
            InstallStep::PrepareEnvironment => "setting up python environment".into(),
            InstallStep::EnsureGit => "checking git".into(),
            InstallStep::EnsureDeviceProbe => "installing device probe".into(),
            InstallStep::DetectDevice => "Trying to identify intel hardware".into(),
            InstallStep::InstallRequirements { file, .. } | InstallStep::InstallWheel { file, .. } => {
                format!("installing dependencies from {file}")
            }
            InstallStep::InstallDeviceRequirements { .. } => {
                "installing device specific dependencies".into()
            }
            InstallStep::CloneRepository { url } => format!("cloning {url}"),
            InstallStep::DownloadArchive { file, .. } => format!("downloading {file}"),
            InstallStep::ExtractArchive { into, .. } => format!("extracting into {into}"),
            InstallStep::ConfigureComfyUi => "configuring comfyUI".into(),
        }
    }
}

/// Progress channel capacity that never blocks a plan of `steps` steps.
pub fn progress_capacity(steps: usize) -> usize {
    2 * steps + 3
}

/// Fill `{version}` and `{release_tag}` in a url template.
pub fn render_url(template: &str, settings: &ServiceSettings) -> Result<String, InstallError> {
    let mut url = template.to_string();
    for (key, value) in [
        ("{version}", settings.version.as_deref()),
        ("{release_tag}", settings.release_tag.as_deref()),
    ] {
        if url.contains(key) {
            let value = value.ok_or_else(|| {
                InstallError::Unavailable(format!("no {} pinned for {}", &key[1..key.len() - 1], template))
            })?;
            url = url.replace(key, value);
        }
    }
    Ok(url)
}

/// A single setup run of one service.
pub struct SetupRun<'a> {
    ctx: &'a OrchestrationContext,
    profile: &'a ServiceProfile,
    settings: ServiceSettings,
    env: Option<Containment>,
    service: Option<Containment>,
    final_layout: Layout,
    arch: Arch,
    archive: Option<PathBuf>,
}

impl<'a> SetupRun<'a> {
    pub fn new(
        ctx: &'a OrchestrationContext,
        profile: &'a ServiceProfile,
        settings: ServiceSettings,
    ) -> Self {
        let final_layout = profile.layout(&ctx.paths);
        let env = final_layout.env_dir.as_ref().map(Containment::new);
        let service = profile
            .installs_service_dir
            .then(|| Containment::new(&final_layout.service_dir));
        Self {
            ctx,
            profile,
            settings,
            env,
            service,
            final_layout,
            arch: Arch::Unknown,
            archive: None,
        }
    }

    /// Directories steps write into: staging where the plan builds them,
    /// final ones otherwise.
    pub fn work_layout(&self) -> Layout {
        Layout {
            env_dir: self.env.as_ref().map(|c| c.staging_dir().to_path_buf()),
            service_dir: match &self.service {
                Some(c) => c.staging_dir().to_path_buf(),
                None => self.final_layout.service_dir.clone(),
            },
        }
    }

    fn work_env(&self) -> Result<PathBuf, InstallError> {
        self.work_layout().env_dir.ok_or_else(|| {
            InstallError::Unavailable(format!("{} has no python environment", self.profile.name))
        })
    }

    fn uv(&self) -> Result<UvInstaller, InstallError> {
        Ok(UvInstaller::new(self.ctx.env(&self.work_env()?, self.profile.name)))
    }

    /// Run every step in order, then move the built directories into place.
    pub async fn execute(
        mut self,
        plan: &[InstallStep],
        progress: &ProgressReporter,
    ) -> Result<Layout, InstallError> {
        for containment in self.env.iter().chain(self.service.iter()) {
            containment.prepare().await?;
        }

        for step in plan {
            progress.executing(step.label(), step.describe()).await;
            self.run_step(step).await?;
            progress
                .executing(step.label(), format!("{} done", step.describe()))
                .await;
        }

        progress
            .executing("end", "moving installation into place")
            .await;
        for containment in self.env.iter().chain(self.service.iter()) {
            let final_dir = containment.commit().await?;
            info!(source = %self.profile.name, "installed {}", final_dir.display());
        }
        Ok(self.final_layout)
    }

    async fn run_step(&mut self, step: &InstallStep) -> Result<(), InstallError> {
        let name = self.profile.name;
        match step {
            InstallStep::PrepareEnvironment => self.uv()?.ensure_installed().await,
            InstallStep::EnsureGit => self.ctx.git(name).ensure_installed().await,
            InstallStep::EnsureDeviceProbe => {
                let env = self.work_env()?;
                DeviceProbeTool::new(self.ctx.env(&env, name))
                    .ensure_installed()
                    .await
            }
            InstallStep::DetectDevice => {
                let env = self.work_env()?;
                self.arch = self.ctx.device_selector().detect_best_arch(&env, name).await;
                info!(source = %name, "installing for device arch {}", self.arch);
                Ok(())
            }
            InstallStep::InstallRequirements { file, extra_args } => {
                let requirements = self.work_layout().service_dir.join(file);
                self.uv()?
                    .install_requirements(&requirements, &owned(extra_args))
                    .await
            }
            InstallStep::InstallDeviceRequirements { extra_args } => {
                let requirements = self
                    .ctx
                    .paths
                    .service_dir(AI_BACKEND_SERVICE_DIR)
                    .join(format!("requirements-{}.txt", self.arch.requirements_flavor()));
                self.uv()?
                    .install_requirements(&requirements, &owned(extra_args))
                    .await
            }
            InstallStep::InstallWheel { file, extra_args } => {
                if !self.arch.is_xpu() {
                    info!(source = %name, "no supported GPU, skipping {}", file);
                    return Ok(());
                }
                let requirements = self.work_layout().service_dir.join(file);
                self.uv()?
                    .install_requirements(&requirements, &owned(extra_args))
                    .await
            }
            InstallStep::CloneRepository { url } => {
                let git_ref = self.settings.version.clone().ok_or_else(|| {
                    InstallError::Unavailable(format!("no version pinned for {url}"))
                })?;
                let dest = self.work_layout().service_dir;
                self.ctx.git(name).clone_at(url, &git_ref, &dest).await
            }
            InstallStep::DownloadArchive { url, root, file } => {
                let url = render_url(url, &self.settings)?;
                let dir = self.work_root(*root)?;
                let dest = self
                    .ctx
                    .downloader
                    .download(&DownloadRequest::new(url), &dir.join(file))
                    .await?;
                self.archive = Some(dest);
                Ok(())
            }
            InstallStep::ExtractArchive { into, flatten } => {
                let archive = self.archive.clone().ok_or_else(|| {
                    InstallError::Unavailable("no archive downloaded before extraction".into())
                })?;
                let archive = existing_file(archive)?;
                let target = archive
                    .parent()
                    .map(|p| p.join(into))
                    .unwrap_or_else(|| PathBuf::from(into));
                self.extract(&archive, &target, *flatten).await
            }
            InstallStep::ConfigureComfyUi => self.configure_comfyui().await,
        }
    }

    fn work_root(&self, root: Root) -> Result<PathBuf, InstallError> {
        self.work_layout()
            .root(root)
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                InstallError::Unavailable(format!("{} has no {:?} directory", self.profile.name, root))
            })
    }

    async fn extract(&self, archive: &Path, target: &Path, flatten: bool) -> Result<(), InstallError> {
        if tokio::fs::try_exists(target).await? {
            warn!(source = %self.profile.name, "removing existing {}", target.display());
            tokio::fs::remove_dir_all(target).await?;
        }
        tokio::fs::create_dir_all(target).await?;

        let spec = CommandSpec::new("tar")
            .args([
                "-xf".to_string(),
                archive.display().to_string(),
                "-C".to_string(),
                target.display().to_string(),
            ])
            .source(self.profile.name);
        self.ctx.runner.run(&spec).await?;

        if flatten {
            flatten_single_dir(target).await?;
        }
        Ok(())
    }

    async fn configure_comfyui(&self) -> Result<(), InstallError> {
        let models = self
            .ctx
            .paths
            .service_dir(AI_BACKEND_SERVICE_DIR)
            .join("models")
            .join("stable_diffusion");
        let yaml = format!(
            "aipg:\n  base_path: {}\n  checkpoints: checkpoints\n  clip: checkpoints\n  vae: checkpoints\n  unet: checkpoints\n  loras: lora\n",
            models.display()
        );
        let target = self.work_layout().service_dir.join("extra_model_paths.yaml");
        tokio::fs::write(&target, yaml).await?;
        info!(source = %self.profile.name, "configured extra model paths at {}", target.display());
        Ok(())
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}
