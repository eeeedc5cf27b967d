//! A named, port-bound backend service and its lifecycle.

use aipg_devices::Device;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::OrchestrationContext;
use crate::error::{error_chain, ErrorDetails, ServiceError};
use crate::profiles::{Layout, LaunchContext, ServiceProfile, ServiceSettings};
use crate::progress::{progress_channel, ProgressReporter, SetupProgressStream};
use crate::setup::{progress_capacity, InstallStep, SetupRun};
use crate::status::{BackendStatus, ServiceInfo};
use crate::supervisor::{self, ProcessHandle};

#[derive(Debug)]
struct ServiceState {
    status: BackendStatus,
    /// What the caller last asked for; only `Running` and `Stopped` are used.
    desired_status: BackendStatus,
    is_set_up: bool,
    devices: Vec<Device>,
    last_error: Option<ErrorDetails>,
    settings: ServiceSettings,
    /// Settings came from the user rather than the profile defaults.
    settings_pinned: bool,
}

/// One orchestrated backend.
pub struct BackendService {
    ctx: Arc<OrchestrationContext>,
    profile: ServiceProfile,
    port: u16,
    state: Mutex<ServiceState>,
    process: tokio::sync::Mutex<Option<ProcessHandle>>,
    /// True while a `start()` call is running.
    start_in_flight: watch::Sender<bool>,
    /// Bumped by every `stop()`; a pending start gives up when it changes.
    stop_requests: watch::Sender<u64>,
}

impl BackendService {
    pub fn new(ctx: Arc<OrchestrationContext>, profile: ServiceProfile, port: u16) -> Self {
        let layout = profile.layout(&ctx.paths);
        let is_set_up = (profile.is_set_up)(&layout);
        let settings = profile.default_settings();
        Self {
            ctx,
            profile,
            port,
            state: Mutex::new(ServiceState {
                status: BackendStatus::Uninitialized,
                desired_status: BackendStatus::Uninitialized,
                is_set_up,
                devices: Vec::new(),
                last_error: None,
                settings,
                settings_pinned: false,
            }),
            process: tokio::sync::Mutex::new(None),
            start_in_flight: watch::Sender::new(false),
            stop_requests: watch::Sender::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.profile.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn profile(&self) -> &ServiceProfile {
        &self.profile
    }

    pub fn is_required(&self) -> bool {
        self.profile.is_required
    }

    pub fn base_url(&self) -> String {
        self.profile.base_url(self.port)
    }

    pub fn health_url(&self) -> String {
        self.profile.health_url(self.port)
    }

    pub fn layout(&self) -> Layout {
        self.profile.layout(&self.ctx.paths)
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_status(&self) -> BackendStatus {
        self.lock().status
    }

    /// Re-run the on-disk set-up check.
    pub fn is_set_up(&self) -> bool {
        let is_set_up = (self.profile.is_set_up)(&self.layout());
        self.lock().is_set_up = is_set_up;
        is_set_up
    }

    /// Current status, resolving `Uninitialized` from the on-disk check.
    pub fn status(&self) -> BackendStatus {
        let status = self.current_status();
        if status != BackendStatus::Uninitialized {
            return status;
        }
        let resolved = if self.is_set_up() {
            BackendStatus::NotYetStarted
        } else {
            BackendStatus::NotInstalled
        };
        self.set_status(resolved);
        self.current_status()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.lock().devices.clone()
    }

    pub fn last_error(&self) -> Option<ErrorDetails> {
        self.lock().last_error.clone()
    }

    pub fn settings(&self) -> ServiceSettings {
        self.lock().settings.clone()
    }

    /// Full snapshot as sent to listeners.
    pub fn info(&self) -> ServiceInfo {
        let status = self.status();
        let state = self.lock();
        ServiceInfo {
            service_name: self.name().to_string(),
            status,
            base_url: self.base_url(),
            port: self.port,
            is_set_up: state.is_set_up,
            is_required: self.profile.is_required,
            devices: state.devices.clone(),
            error_details: state.last_error.clone(),
        }
    }

    fn publish(&self) {
        let info = {
            let state = self.lock();
            ServiceInfo {
                service_name: self.name().to_string(),
                status: state.status,
                base_url: self.base_url(),
                port: self.port,
                is_set_up: state.is_set_up,
                is_required: self.profile.is_required,
                devices: state.devices.clone(),
                error_details: state.last_error.clone(),
            }
        };
        self.ctx.bus.publish(info);
    }

    /// Move to `next` if the state machine allows it and notify listeners.
    fn set_status(&self, next: BackendStatus) -> bool {
        {
            let mut state = self.lock();
            let current = state.status;
            if current != next && !current.can_transition_to(next) {
                warn!(source = %self.name(), "refusing status change {} -> {}", current, next);
                return false;
            }
            debug!(source = %self.name(), "status {} -> {}", current, next);
            state.status = next;
        }
        self.publish();
        true
    }

    /// Start the backend and wait until it is healthy.
    ///
    /// Resolves with `Running` or `Failed`; only caller mistakes are errors.
    pub async fn start(&self) -> Result<BackendStatus, ServiceError> {
        let status = self.status();
        let stop_requests = {
            let mut state = self.lock();
            if state.desired_status == BackendStatus::Stopped && status == BackendStatus::Stopping {
                return Err(ServiceError::StopInProgress(self.name().to_string()));
            }
            if status == BackendStatus::Running {
                info!(source = %self.name(), "server already running");
                return Ok(BackendStatus::Running);
            }
            if *self.start_in_flight.borrow() || status == BackendStatus::Starting {
                return Err(ServiceError::StartAlreadyRequested(self.name().to_string()));
            }
            if status == BackendStatus::Installing {
                return Err(ServiceError::SetupInProgress(self.name().to_string()));
            }
            if !status.is_installed() {
                return Err(ServiceError::NotInstalled(self.name().to_string()));
            }
            state.desired_status = BackendStatus::Running;
            self.start_in_flight.send_replace(true);
            self.stop_requests.subscribe()
        };

        self.set_status(BackendStatus::Starting);
        self.ctx
            .sink
            .info(&format!("trying to start {}", self.name()), self.name(), false);

        let outcome = self.launch(stop_requests).await;
        let stop_requested = self.lock().desired_status == BackendStatus::Stopped;

        let final_status = match outcome {
            _ if stop_requested => {
                info!(source = %self.name(), "start abandoned, stop requested");
                self.kill_process().await;
                self.current_status()
            }
            Ok(()) => {
                self.lock().last_error = None;
                self.set_status(BackendStatus::Running);
                self.ctx.sink.info(
                    &format!("started server {} on {}", self.name(), self.base_url()),
                    self.name(),
                    false,
                );
                BackendStatus::Running
            }
            Err(details) => {
                self.kill_process().await;
                self.ctx.sink.error(&details.message, self.name(), true);
                self.lock().last_error = Some(details);
                self.set_status(BackendStatus::Failed);
                BackendStatus::Failed
            }
        };

        self.start_in_flight.send_replace(false);
        Ok(final_status)
    }

    async fn launch(&self, mut stop_requests: watch::Receiver<u64>) -> Result<(), ErrorDetails> {
        let mut devices = self.devices();
        if devices.is_empty() {
            devices = self.detect_devices().await;
        }

        let layout = self.layout();
        let settings = self.settings();
        let git = self.ctx.git(self.name());
        let launch_ctx = LaunchContext {
            layout: &layout,
            port: self.port,
            devices: &devices,
            config: &self.ctx.config,
            settings: &settings,
            git_dir: git.path_dir(),
        };
        let (key, value) = self.profile.device_selector.env_for(&devices);
        let command = (self.profile.launch)(&launch_ctx).env(key, value);

        let process = supervisor::spawn(
            &command,
            self.name(),
            self.ctx.sink.clone(),
            self.ctx.config.kill_grace,
        )
        .map_err(|e| ErrorDetails::from_error(&e))?;
        *self.process.lock().await = Some(process.handle);

        let health_url = self.health_url();
        let ready = tokio::select! {
            ready = self.ctx.prober.await_ready(
                process.exited_early,
                &health_url,
                self.profile.startup_timeout,
            ) => ready,
            _ = stop_requests.changed() => false,
        };
        if ready {
            Ok(())
        } else {
            Err(ErrorDetails::message(format!(
                "Server {} did not become healthy at {}",
                self.name(),
                self.health_url()
            )))
        }
    }

    async fn kill_process(&self) {
        let handle = self.process.lock().await.take();
        if let Some(mut handle) = handle {
            debug!(source = %self.name(), "killing process {:?}", handle.pid());
            handle.kill().await;
        }
    }

    /// Stop the backend. Idempotent and infallible.
    ///
    /// Services without an installation are left as they are.
    pub async fn stop(&self) -> BackendStatus {
        let status = self.status();
        if status == BackendStatus::Stopped || !status.is_installed() {
            return status;
        }
        self.lock().desired_status = BackendStatus::Stopped;
        self.ctx
            .sink
            .info(&format!("stopping {}", self.name()), self.name(), false);
        self.set_status(BackendStatus::Stopping);
        self.stop_requests.send_modify(|n| *n += 1);

        self.kill_process().await;
        // a pending start notices the stop and releases the service
        let mut in_flight = self.start_in_flight.subscribe();
        let _ = in_flight.wait_for(|starting| !*starting).await;
        tokio::time::sleep(self.ctx.config.stop_grace).await;

        self.set_status(BackendStatus::Stopped);
        BackendStatus::Stopped
    }

    /// Install the backend, streaming progress.
    ///
    /// The install runs on its own task to completion whether or not the
    /// returned stream is drained.
    pub fn set_up(self: &Arc<Self>) -> Result<SetupProgressStream, ServiceError> {
        let status = self.status();
        match status {
            BackendStatus::Installing => {
                return Err(ServiceError::SetupInProgress(self.name().to_string()))
            }
            BackendStatus::Starting | BackendStatus::Running | BackendStatus::Stopping => {
                return Err(ServiceError::Busy(self.name().to_string()))
            }
            _ => {}
        }
        if !self.set_status(BackendStatus::Installing) {
            return Err(ServiceError::Busy(self.name().to_string()));
        }
        self.ctx
            .sink
            .info("setting up service", self.name(), false);

        let plan = (self.profile.install_plan)();
        let (reporter, stream) = progress_channel(self.name(), progress_capacity(plan.len()));
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run_setup(plan, reporter).await });
        Ok(stream)
    }

    async fn run_setup(&self, plan: Vec<InstallStep>, reporter: ProgressReporter) {
        reporter
            .executing("start", format!("starting to set up {}", self.name()))
            .await;
        let settings = self.install_settings().await;
        let result = SetupRun::new(&self.ctx, &self.profile, settings.clone())
            .execute(&plan, &reporter)
            .await;

        match result {
            Ok(_) => {
                {
                    let mut state = self.lock();
                    state.devices.clear();
                    state.last_error = None;
                    state.settings = settings;
                }
                self.is_set_up();
                self.set_status(BackendStatus::NotYetStarted);
                reporter
                    .finish("end", Ok("service set up completely".to_string()))
                    .await;
            }
            Err(e) => {
                let chain = error_chain(&e);
                let details = ErrorDetails::from_error(&e);
                self.ctx.sink.warn(
                    &format!("Set up of service failed due to {chain}"),
                    self.name(),
                    true,
                );
                self.ctx.sink.warn(
                    &format!("Aborting set up of {} service environment", self.name()),
                    self.name(),
                    true,
                );
                self.lock().last_error = Some(details.clone());
                self.set_status(BackendStatus::InstallationFailed);
                reporter
                    .finish(
                        "end",
                        Err((format!("Failed to setup {} due to {}", self.name(), chain), details)),
                    )
                    .await;
            }
        }
    }

    /// Settings an install uses: user pins first, then the version
    /// catalog, then the profile defaults.
    async fn install_settings(&self) -> ServiceSettings {
        let (settings, pinned) = {
            let state = self.lock();
            (state.settings.clone(), state.settings_pinned)
        };
        if pinned {
            return settings;
        }
        match self.ctx.versions.resolve(self.name()).await {
            Some(version) => ServiceSettings {
                version: Some(version.version),
                release_tag: version.release_tag.or(settings.release_tag),
                model: settings.model,
            },
            None => settings,
        }
    }

    /// Stop the backend and remove everything its install created.
    pub async fn uninstall(&self) -> Result<BackendStatus, ServiceError> {
        if self.status() == BackendStatus::Installing {
            return Err(ServiceError::SetupInProgress(self.name().to_string()));
        }
        self.stop().await;

        let layout = self.layout();
        let mut dirs = Vec::new();
        dirs.extend(layout.env_dir);
        if self.profile.installs_service_dir {
            dirs.push(layout.service_dir);
        }
        for dir in dirs {
            if tokio::fs::try_exists(&dir).await? {
                info!(source = %self.name(), "removing {}", dir.display());
                tokio::fs::remove_dir_all(&dir).await?;
            }
        }

        {
            let mut state = self.lock();
            state.is_set_up = false;
            state.devices.clear();
            state.last_error = None;
        }
        self.set_status(BackendStatus::NotInstalled);
        Ok(self.status())
    }

    /// Probe devices and select the best one.
    pub async fn detect_devices(&self) -> Vec<Device> {
        let devices = match self.profile.probe_env {
            Some(env) => {
                let env_dir = self.ctx.paths.env_dir(env);
                self.ctx
                    .device_selector()
                    .detect_best_device(&env_dir, self.name())
                    .await
            }
            None => self
                .profile
                .device_selector
                .static_devices()
                .unwrap_or_default(),
        };
        self.lock().devices = devices.clone();
        self.publish();
        devices
    }

    /// Select the device with `id`; unknown ids are ignored.
    pub fn select_device(&self, id: &str) -> bool {
        {
            let mut state = self.lock();
            if !state.devices.iter().any(|d| d.id == id) {
                warn!(source = %self.name(), "ignoring unknown device {}", id);
                return false;
            }
            for device in &mut state.devices {
                device.selected = device.id == id;
            }
        }
        self.publish();
        true
    }

    /// Keep `details` as the last error without touching the status.
    pub fn record_rejection(&self, details: ErrorDetails) {
        self.lock().last_error = Some(details);
        self.publish();
    }

    /// Pin settings for future installs and launches.
    pub async fn update_settings(&self, settings: ServiceSettings) {
        info!(source = %self.name(), "applied new settings {:?}", settings);
        {
            let mut state = self.lock();
            state.settings = settings;
            state.settings_pinned = true;
        }
        self.ctx.versions.invalidate().await;
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, status: BackendStatus, desired: BackendStatus) {
        let mut state = self.lock();
        state.status = status;
        state.desired_status = desired;
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::progress::ProgressStatus;
    use crate::setup::Root;
    use crate::sink::memory::Level;
    use crate::testing::TestServer;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    fn installed(ctx: &OrchestrationContext, profile: &ServiceProfile) {
        std::fs::create_dir_all(profile.layout(&ctx.paths).service_dir).unwrap();
    }

    #[tokio::test]
    async fn test_status_resolves_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let service = BackendService::new(ctx.clone(), profile("svc", sleeper), 1);
        let mut rx = ctx.bus.subscribe();

        assert_eq!(service.status(), BackendStatus::NotInstalled);
        assert_eq!(rx.recv().await.unwrap().status, BackendStatus::NotInstalled);

        let p = profile("svc", sleeper);
        installed(&ctx, &p);
        let service = BackendService::new(ctx, p, 1);
        assert_eq!(service.status(), BackendStatus::NotYetStarted);
    }

    #[tokio::test]
    async fn test_start_rejects_when_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let service = BackendService::new(context(dir.path()), profile("svc", sleeper), 1);
        assert!(matches!(service.start().await, Err(ServiceError::NotInstalled(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_while_starting_or_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let p = profile("svc", sleeper);
        installed(&ctx, &p);
        let service = BackendService::new(ctx, p, 1);

        service.force_state(BackendStatus::Starting, BackendStatus::Running);
        assert!(matches!(
            service.start().await,
            Err(ServiceError::StartAlreadyRequested(_))
        ));

        service.force_state(BackendStatus::Stopping, BackendStatus::Stopped);
        assert!(matches!(service.start().await, Err(ServiceError::StopInProgress(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_during_start_releases_the_service() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, sink) = context_with_sink(dir.path());
        let healthy = Arc::new(AtomicBool::new(false));
        let flag = healthy.clone();
        let server = TestServer::start(move |_, _| {
            if flag.load(Ordering::SeqCst) {
                (200, vec![])
            } else {
                (503, vec![])
            }
        })
        .await;
        let mut p = profile("svc", sleeper);
        p.startup_timeout = Duration::from_secs(30);
        installed(&ctx, &p);
        let service = Arc::new(BackendService::new(ctx, p, server.port()));

        let pending = tokio::spawn({
            let service = service.clone();
            async move { service.start().await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(service.status(), BackendStatus::Starting);

        let stopping = Instant::now();
        assert_eq!(service.stop().await, BackendStatus::Stopped);
        let first = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(stopping.elapsed() < Duration::from_secs(5));
        assert!(matches!(first, BackendStatus::Stopping | BackendStatus::Stopped));
        assert!(service.last_error().is_none());

        // the service is free again
        healthy.store(true, Ordering::SeqCst);
        assert_eq!(service.start().await.unwrap(), BackendStatus::Running);
        service.stop().await;

        assert!(sink.contains(Level::Info, "trying to start svc"));
        assert!(sink.contains(Level::Info, "stopping svc"));
        assert!(sink.lines().iter().all(|(_, line, _)| !line.contains("python API")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_stop_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let server = TestServer::ok("").await;
        let p = profile("svc", sleeper);
        installed(&ctx, &p);
        let service = BackendService::new(ctx.clone(), p, server.port());
        let mut rx = ctx.bus.subscribe();

        assert_eq!(service.start().await.unwrap(), BackendStatus::Running);
        assert_eq!(service.start().await.unwrap(), BackendStatus::Running);
        assert!(service.last_error().is_none());
        // static openvino devices are picked up on first start
        assert!(service.devices().iter().any(|d| d.selected && d.id == "AUTO"));

        assert_eq!(service.stop().await, BackendStatus::Stopped);
        assert_eq!(service.stop().await, BackendStatus::Stopped);

        let mut seen = Vec::new();
        while let Ok(info) = rx.try_recv() {
            seen.push(info.status);
        }
        seen.dedup();
        assert_eq!(
            seen,
            vec![
                BackendStatus::NotYetStarted,
                BackendStatus::Starting,
                BackendStatus::Running,
                BackendStatus::Stopping,
                BackendStatus::Stopped,
            ]
        );

        // restart after a stop is allowed
        assert_eq!(service.start().await.unwrap(), BackendStatus::Running);
        service.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let server = TestServer::start(|_, _| (503, vec![])).await;
        let p = profile("svc", crasher);
        installed(&ctx, &p);
        let service = BackendService::new(ctx, p, server.port());

        let started = Instant::now();
        assert_eq!(service.start().await.unwrap(), BackendStatus::Failed);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(service.last_error().is_some());

        // failed services may be retried
        assert_eq!(service.start().await.unwrap(), BackendStatus::Failed);
    }

    #[tokio::test]
    async fn test_spawn_error_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let p = profile("svc", |ctx| {
            supervisor::LaunchCommand::new("/no/such/backend", &ctx.layout.service_dir)
        });
        installed(&ctx, &p);
        let service = BackendService::new(ctx, p, 1);

        assert_eq!(service.start().await.unwrap(), BackendStatus::Failed);
        let details = service.last_error().unwrap();
        assert_eq!(details.command.as_deref(), Some("/no/such/backend"));
        assert!(service.info().error_details.is_some());
    }

    #[tokio::test]
    async fn test_stop_leaves_uninstalled_service_alone() {
        let dir = tempfile::tempdir().unwrap();
        let service = BackendService::new(context(dir.path()), profile("svc", sleeper), 1);
        assert_eq!(service.stop().await, BackendStatus::NotInstalled);
        assert_eq!(service.status(), BackendStatus::NotInstalled);
    }

    #[tokio::test]
    async fn test_set_up_success_ends_with_single_terminal_event() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let service = Arc::new(BackendService::new(ctx, profile("svc", sleeper), 1));

        let events = service.set_up().unwrap().collect().await;
        let last = events.last().unwrap();
        assert_eq!(last.status, ProgressStatus::Success);
        assert_eq!(last.step, "end");
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(events[0].step, "start");

        assert_eq!(service.status(), BackendStatus::NotYetStarted);
        assert!(service.info().is_set_up);
    }

    #[tokio::test]
    async fn test_set_up_failure_reports_installation_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut p = profile("svc", sleeper);
        p.install_plan = || {
            vec![
                InstallStep::DownloadArchive {
                    url: "http://127.0.0.1:1/{version}.zip",
                    root: Root::Service,
                    file: "a.zip",
                },
                InstallStep::ConfigureComfyUi,
            ]
        };
        let service = Arc::new(BackendService::new(ctx, p, 1));

        let mut stream = service.set_up().unwrap();
        assert!(matches!(service.set_up(), Err(ServiceError::SetupInProgress(_))));

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        let last = events.last().unwrap();
        assert_eq!(last.status, ProgressStatus::Failed);
        assert!(last.debug_message.starts_with("Failed to setup svc due to"));
        assert!(last.error_details.is_some());
        assert!(events.iter().all(|e| e.step != "configure comfyUI"));
        assert!(stream.next().await.is_none());

        assert_eq!(service.status(), BackendStatus::InstallationFailed);
        assert!(!service.info().is_set_up);
    }

    #[tokio::test]
    async fn test_setup_runs_without_consumer() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let mut rx = ctx.bus.subscribe();
        let service = Arc::new(BackendService::new(ctx, profile("svc", sleeper), 1));

        drop(service.set_up().unwrap());
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let info = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if info.status == BackendStatus::NotYetStarted {
                break;
            }
            assert!(Instant::now() < deadline);
        }
    }

    #[tokio::test]
    async fn test_device_selection() {
        let dir = tempfile::tempdir().unwrap();
        let service = BackendService::new(context(dir.path()), profile("svc", sleeper), 1);
        let devices = service.detect_devices().await;
        assert_eq!(devices.iter().filter(|d| d.selected).count(), 1);

        assert!(service.select_device("GPU"));
        assert!(!service.select_device("NPU"));
        let selected: Vec<_> = service
            .devices()
            .into_iter()
            .filter(|d| d.selected)
            .map(|d| d.id)
            .collect();
        assert_eq!(selected, vec!["GPU"]);
    }

    #[tokio::test]
    async fn test_uninstall_removes_built_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let p = profile("svc", sleeper);
        installed(&ctx, &p);
        let service_dir = p.layout(&ctx.paths).service_dir;
        let service = BackendService::new(ctx, p, 1);
        assert_eq!(service.status(), BackendStatus::NotYetStarted);

        assert_eq!(service.uninstall().await.unwrap(), BackendStatus::NotInstalled);
        assert!(!service_dir.exists());
        assert!(!service.info().is_set_up);
    }

    #[tokio::test]
    async fn test_pinned_settings_win_over_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("backend-versions.json"),
            r#"{"svc": {"version": "from-catalog"}}"#,
        )
        .unwrap();
        let service = BackendService::new(context(dir.path()), profile("svc", sleeper), 1);

        assert_eq!(service.install_settings().await.version.as_deref(), Some("from-catalog"));

        service
            .update_settings(ServiceSettings {
                version: Some("pinned".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(service.install_settings().await.version.as_deref(), Some("pinned"));
    }
}
