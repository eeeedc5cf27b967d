//! Named collection of backend services.

use futures_util::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::OrchestrationContext;
use crate::error::{ErrorDetails, RegistryError};
use crate::ports::PortAllocator;
use crate::profiles::{self, AI_BACKEND};
use crate::service::BackendService;
use crate::status::{BackendStatus, BootResult, ServiceInfo};

/// Services keyed by name, in registration order.
#[derive(Default)]
pub struct ServiceRegistry {
    services: IndexMap<String, Arc<BackendService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every known backend, each on its own free port.
    ///
    /// Preview-only backends are skipped unless preview features are enabled.
    pub fn build(ctx: &Arc<OrchestrationContext>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        let mut ports = PortAllocator::new();
        for profile in profiles::all() {
            if profile.preview_only && !ctx.config.enable_preview_features {
                info!("skipping preview service {}", profile.name);
                continue;
            }
            let port = ports.allocate(profile.name, profile.port_range.clone())?;
            info!("registering {} on port {}", profile.name, port);
            registry.register(Arc::new(BackendService::new(ctx.clone(), profile, port)))?;
        }
        Ok(registry)
    }

    /// Register `service`. Registering the same instance again is a no-op.
    pub fn register(&mut self, service: Arc<BackendService>) -> Result<(), RegistryError> {
        match self.services.get(service.name()) {
            Some(existing) if Arc::ptr_eq(existing, &service) => Ok(()),
            Some(_) => Err(RegistryError::DuplicateName(service.name().to_string())),
            None => {
                self.services.insert(service.name().to_string(), service);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<&Arc<BackendService>, RegistryError> {
        self.services
            .get(name)
            .ok_or_else(|| RegistryError::UnknownService(name.to_string()))
    }

    pub fn registered(&self) -> impl Iterator<Item = &Arc<BackendService>> {
        self.services.values()
    }

    /// The backend the application cannot run without.
    pub fn required(&self) -> Result<&Arc<BackendService>, RegistryError> {
        self.services
            .get(AI_BACKEND)
            .ok_or_else(|| RegistryError::RequiredServiceMissing(AI_BACKEND.to_string()))
    }

    pub fn service_information(&self) -> Vec<ServiceInfo> {
        self.services.values().map(|s| s.info()).collect()
    }

    /// Start every service whose installation is on disk, concurrently.
    ///
    /// Never fails as a whole: a rejected start, such as one after a failed
    /// re-install over a working installation, is reported as `Failed`.
    pub async fn boot_up_all_set_up_services(&self) -> Vec<BootResult> {
        let candidates: Vec<_> = self.services.values().filter(|s| s.is_set_up()).collect();
        info!("booting {} set up services", candidates.len());

        join_all(candidates.into_iter().map(|service| async move {
            let state = match service.start().await {
                Ok(state) => state,
                Err(e) => {
                    warn!(source = %service.name(), "start rejected: {}", e);
                    service.record_rejection(ErrorDetails::from_error(&e));
                    BackendStatus::Failed
                }
            };
            BootResult {
                service_name: service.name().to_string(),
                state,
            }
        }))
        .await
    }

    /// Stop every running service concurrently.
    pub async fn stop_all_services(&self) -> Vec<BootResult> {
        let running = self
            .services
            .values()
            .filter(|s| s.status() == BackendStatus::Running);
        join_all(running.map(|service| async move {
            BootResult {
                service_name: service.name().to_string(),
                state: service.stop().await,
            }
        }))
        .await
    }
}
