//! Error types for device detection.

use thiserror::Error;

/// Errors that can occur while interpreting probe output.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Probe output was not the expected JSON document.
    #[error("invalid probe output: {0}")]
    InvalidProbeOutput(#[from] serde_json::Error),

    /// Probe ran but reported no devices.
    #[error("probe reported no devices")]
    NoDevices,
}
