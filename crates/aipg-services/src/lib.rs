//! Orchestration of local AI backend services.
//!
//! Each backend is a child process with its own interpreter environment,
//! installed through a step plan, started on a local port and watched until
//! its health endpoint answers. The [`ServiceRegistry`] owns all of them.

pub mod config;
pub mod containment;
pub mod context;
pub mod devices;
pub mod download;
pub mod error;
pub mod install;
pub mod paths;
pub mod ports;
pub mod profiles;
pub mod progress;
pub mod readiness;
pub mod registry;
pub mod runner;
pub mod service;
pub mod setup;
pub mod sink;
pub mod status;
pub mod supervisor;
pub mod versions;

#[cfg(test)]
mod testing;

pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use context::OrchestrationContext;
pub use error::{ErrorDetails, InstallError, ProcessError, RegistryError, ServiceError};
pub use profiles::{ServiceProfile, ServiceSettings};
pub use progress::{ProgressStatus, SetupProgress, SetupProgressStream};
pub use registry::ServiceRegistry;
pub use service::BackendService;
pub use sink::{LogSink, TracingSink};
pub use status::{BackendStatus, BootResult, ServiceInfo, StatusBus};
