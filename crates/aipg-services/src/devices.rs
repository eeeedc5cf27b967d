//! Device detection through the probe tool.

use aipg_devices::{devices_from_probe, Arch, Device};
use std::path::Path;
use std::sync::Arc;

use crate::install::{DeviceProbeTool, EnvContext};
use crate::paths::ServicePaths;
use crate::runner::CommandRunner;
use crate::sink::LogSink;

/// Runs the device probe and picks the best device.
///
/// Probing never fails: a missing binary, unreadable output or an empty
/// device list is logged as a warning and yields no devices, which
/// renders as the wildcard selector.
#[derive(Clone)]
pub struct DeviceSelector {
    runner: Arc<dyn CommandRunner>,
    paths: ServicePaths,
    sink: Arc<dyn LogSink>,
    arch_override: Option<Arch>,
}

impl DeviceSelector {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        paths: ServicePaths,
        sink: Arc<dyn LogSink>,
        arch_override: Option<Arch>,
    ) -> Self {
        Self {
            runner,
            paths,
            sink,
            arch_override,
        }
    }

    /// Devices reported by the probe installed in `env_dir`, best one selected.
    pub async fn detect_best_device(&self, env_dir: &Path, source: &str) -> Vec<Device> {
        let ctx = EnvContext::new(self.runner.clone(), self.paths.clone(), env_dir, source);
        let output = match DeviceProbeTool::new(ctx).probe_output().await {
            Ok(output) => output,
            Err(e) => {
                self.sink
                    .warn(&format!("Failed to detect devices: {e}"), source, true);
                return Vec::new();
            }
        };

        match devices_from_probe(&output) {
            Ok(devices) => {
                self.sink.info(
                    &format!("detected devices: {}", describe(&devices)),
                    source,
                    false,
                );
                devices
            }
            Err(e) => {
                self.sink
                    .warn(&format!("Failed to detect devices: {e}"), source, true);
                Vec::new()
            }
        }
    }

    /// Architecture of the best device, honouring a configured override.
    pub async fn detect_best_arch(&self, env_dir: &Path, source: &str) -> Arch {
        if let Some(arch) = self.arch_override {
            self.sink
                .info(&format!("using configured device arch {arch}"), source, false);
            return arch;
        }
        self.detect_best_device(env_dir, source)
            .await
            .into_iter()
            .find(|d| d.selected)
            .map(|d| d.arch)
            .unwrap_or(Arch::Unknown)
    }
}

fn describe(devices: &[Device]) -> String {
    devices
        .iter()
        .map(|d| {
            let mark = if d.selected { "*" } else { "" };
            format!("{}{}:{}({})", mark, d.id, d.name, d.arch)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::device_probe_executable;
    use crate::runner::scripted::{Outcome, ScriptedRunner};
    use crate::sink::memory::{Level, MemorySink};

    const PROBE_JSON: &str = r#"[
        {"id": 0, "name": "Intel(R) Graphics", "device_id": 25632},
        {"id": 1, "name": "Intel(R) Arc(TM) B580 Graphics", "device_id": 57867},
        {"id": 2, "name": "Intel(R) Arc(TM) A770 Graphics", "device_id": 22176}
    ]"#;

    fn selector(
        dir: &Path,
        runner: ScriptedRunner,
        sink: Arc<MemorySink>,
        arch_override: Option<Arch>,
    ) -> DeviceSelector {
        DeviceSelector::new(Arc::new(runner), ServicePaths::new(dir), sink, arch_override)
    }

    fn install_probe(env_dir: &Path) {
        let exe = device_probe_executable(env_dir);
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(exe, "").unwrap();
    }

    #[tokio::test]
    async fn test_detect_selects_bmg() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("ai-backend-env");
        install_probe(&env);
        let runner = ScriptedRunner::new().on("ls_level_zero", vec![Outcome::Ok(PROBE_JSON.into())]);
        let sink = Arc::new(MemorySink::default());

        let devices = selector(dir.path(), runner, sink, None)
            .detect_best_device(&env, "ai-backend")
            .await;
        assert_eq!(devices.len(), 3);
        let selected: Vec<_> = devices.iter().filter(|d| d.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "1");
        assert_eq!(selected[0].arch, Arch::Bmg);
    }

    #[tokio::test]
    async fn test_missing_probe_warns_and_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::default());
        let devices = selector(dir.path(), ScriptedRunner::new(), sink.clone(), None)
            .detect_best_device(&dir.path().join("missing-env"), "ai-backend")
            .await;
        assert!(devices.is_empty());
        assert!(sink.contains(Level::Warn, "Failed to detect devices"));
    }

    #[tokio::test]
    async fn test_garbage_output_warns() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        install_probe(&env);
        let runner = ScriptedRunner::new().on("ls_level_zero", vec![Outcome::Ok("oops".into())]);
        let sink = Arc::new(MemorySink::default());
        let devices = selector(dir.path(), runner, sink.clone(), None)
            .detect_best_device(&env, "x")
            .await;
        assert!(devices.is_empty());
        assert!(sink.contains(Level::Warn, "invalid probe output"));
    }

    #[tokio::test]
    async fn test_failing_probe_is_unknown_arch() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        install_probe(&env);
        let runner = ScriptedRunner::new().on("ls_level_zero", vec![Outcome::Fail(1)]);
        let arch = selector(dir.path(), runner, Arc::new(MemorySink::default()), None)
            .detect_best_arch(&env, "x")
            .await;
        assert_eq!(arch, Arch::Unknown);
    }

    #[tokio::test]
    async fn test_arch_override_skips_probe() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let selector = DeviceSelector::new(
            runner.clone(),
            ServicePaths::new(dir.path()),
            Arc::new(MemorySink::default()),
            Some(Arch::Lnl),
        );
        assert_eq!(selector.detect_best_arch(dir.path(), "x").await, Arch::Lnl);
        assert!(runner.calls().is_empty());
    }
}
