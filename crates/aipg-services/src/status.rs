//! Service status, info snapshots and the status bus.

use aipg_devices::Device;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::error::ErrorDetails;

/// Observed lifecycle state of a backend service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendStatus {
    Uninitialized,
    NotInstalled,
    Installing,
    InstallationFailed,
    NotYetStarted,
    Starting,
    Running,
    Failed,
    Stopping,
    Stopped,
}

impl BackendStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: BackendStatus) -> bool {
        use BackendStatus::*;
        matches!(
            (self, next),
            (Uninitialized, NotInstalled | NotYetStarted)
                | (NotInstalled, Installing)
                | (Installing, NotYetStarted | InstallationFailed)
                | (NotYetStarted, Starting)
                | (Starting, Running | Failed)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopped | Failed, Starting)
                // re-running setup over an existing or broken install
                | (InstallationFailed | NotYetStarted | Stopped | Failed, Installing)
                // stopping a service that is not running
                | (NotYetStarted | Starting | Failed, Stopping)
                | (NotYetStarted | Stopped | Failed | InstallationFailed, NotInstalled)
        )
    }

    /// Whether the service has an installed environment it could run from.
    pub fn is_installed(self) -> bool {
        !matches!(
            self,
            BackendStatus::Uninitialized
                | BackendStatus::NotInstalled
                | BackendStatus::Installing
                | BackendStatus::InstallationFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendStatus::Uninitialized => "uninitialized",
            BackendStatus::NotInstalled => "notInstalled",
            BackendStatus::Installing => "installing",
            BackendStatus::InstallationFailed => "installationFailed",
            BackendStatus::NotYetStarted => "notYetStarted",
            BackendStatus::Starting => "starting",
            BackendStatus::Running => "running",
            BackendStatus::Failed => "failed",
            BackendStatus::Stopping => "stopping",
            BackendStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full snapshot of one service, sent on every status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub service_name: String,
    pub status: BackendStatus,
    pub base_url: String,
    pub port: u16,
    pub is_set_up: bool,
    pub is_required: bool,
    pub devices: Vec<Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

/// Outcome of booting one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootResult {
    pub service_name: String,
    pub state: BackendStatus,
}

/// Broadcast channel of service info snapshots.
///
/// Publishing never blocks; snapshots sent while nobody listens are dropped
/// and slow receivers skip the oldest ones.
#[derive(Clone, Debug)]
pub struct StatusBus {
    tx: broadcast::Sender<ServiceInfo>,
}

impl StatusBus {
    /// Creates a new bus with the given channel capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, info: ServiceInfo) {
        let _ = self.tx.send(info);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceInfo> {
        self.tx.subscribe()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(256)
    }
}
