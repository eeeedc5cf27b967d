//! Error types for service orchestration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::download::DownloadError;

/// Installable building blocks of a service environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Python,
    Pip,
    Uv,
    DeviceProbe,
    Git,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Python => "python",
            Component::Pip => "pip",
            Component::Uv => "uvpip",
            Component::DeviceProbe => "lslevelzero",
            Component::Git => "git",
        })
    }
}

/// Where inside a component's check the failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStage {
    Main,
    Setuptools,
    Requirements,
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStage::Main => "main",
            CheckStage::Setuptools => "setuptools",
            CheckStage::Requirements => "requirements",
        })
    }
}

/// A component check failed at a known stage; routes to a targeted repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Service {component} check failed at stage {stage}")]
pub struct ServiceCheckError {
    pub component: Component,
    pub stage: CheckStage,
}

impl ServiceCheckError {
    pub fn new(component: Component, stage: CheckStage) -> Self {
        Self { component, stage }
    }

    /// Failure of the component's basic check.
    pub fn main(component: Component) -> Self {
        Self::new(component, CheckStage::Main)
    }
}

/// Failure of one external command invocation.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started at all.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("command {command} {} failed with exit code {}", args.join(" "), display_code(*exit_code))]
    Failed {
        command: String,
        args: Vec<String>,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration: Duration,
    },

    /// Reading the program's output or waiting for it failed.
    #[error("I/O error while running {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string())
}

/// Errors raised while checking, installing or repairing components.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Check(#[from] ServiceCheckError),

    #[error("{0}")]
    Process(#[from] ProcessError),

    #[error("File at {} does not exist", .0.display())]
    MissingFile(PathBuf),

    #[error("unknown repair stage {stage} for {component}")]
    UnknownRepairStage {
        component: Component,
        stage: CheckStage,
    },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unavailable(String),
}

/// Errors returned by [`BackendService`](crate::BackendService) operations.
///
/// Only caller mistakes surface here; start and stop failures of the
/// process itself are reported through the service status instead.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Server {0} currently stopping. Cannot start it.")]
    StopInProgress(String),

    #[error("Server {0} startup already requested")]
    StartAlreadyRequested(String),

    #[error("Service {0} is not installed")]
    NotInstalled(String),

    #[error("Service {0} is already being set up")]
    SetupInProgress(String),

    #[error("Service {0} cannot be changed while it is running")]
    Busy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the service registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Service name {0} is already registered by another service")]
    DuplicateName(String),

    #[error("Required Service '{0}' not yet registered")]
    RequiredServiceMissing(String),

    #[error("Unknown service {0}")]
    UnknownService(String),

    #[error("No free port for {service} in {start}..={end}")]
    NoFreePort { service: String, start: u16, end: u16 },
}

/// Human-readable chain of an error and all of its sources.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut chain = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let message = cause.to_string();
        if !chain.contains(&message) {
            chain.push_str(": ");
            chain.push_str(&message);
        }
        current = cause.source();
    }
    chain
}

/// Failure information forwarded to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub message: String,
    pub command: Option<String>,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<u64>,
}

impl ErrorDetails {
    /// Details with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            command: None,
            exit_code: None,
            stdout: None,
            stderr: None,
            timestamp: Utc::now(),
            duration_ms: None,
        }
    }

    /// Collect details from an error, picking up the first
    /// [`ProcessError`] found in its source chain.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut details = Self::message(error_chain(err));
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(process) = e.downcast_ref::<ProcessError>() {
                details.fill_from_process(process);
                break;
            }
            current = e.source();
        }
        details
    }

    fn fill_from_process(&mut self, err: &ProcessError) {
        match err {
            ProcessError::Spawn { command, .. } | ProcessError::Io { command, .. } => {
                self.command = Some(command.clone());
            }
            ProcessError::Failed {
                command,
                args,
                exit_code,
                stdout,
                stderr,
                duration,
            } => {
                self.command = Some(format!("{} {}", command, args.join(" ")).trim().to_string());
                self.exit_code = *exit_code;
                self.stdout = Some(stdout.clone());
                self.stderr = Some(stderr.clone());
                self.duration_ms = Some(duration.as_millis() as u64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> ProcessError {
        ProcessError::Failed {
            command: "python".into(),
            args: vec!["-m".into(), "pip".into()],
            exit_code: Some(2),
            stdout: "out".into(),
            stderr: "boom".into(),
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_check_error_message() {
        let err = ServiceCheckError::new(Component::Pip, CheckStage::Setuptools);
        assert_eq!(err.to_string(), "Service pip check failed at stage setuptools");
    }

    #[test]
    fn test_process_error_message() {
        assert_eq!(
            failed().to_string(),
            "command python -m pip failed with exit code 2"
        );
    }

    #[test]
    fn test_error_details_from_wrapped_process_error() {
        let err = InstallError::from(failed());
        let details = ErrorDetails::from_error(&err);
        assert_eq!(details.command.as_deref(), Some("python -m pip"));
        assert_eq!(details.exit_code, Some(2));
        assert_eq!(details.stderr.as_deref(), Some("boom"));
        assert_eq!(details.duration_ms, Some(1500));
        assert_eq!(details.message, "command python -m pip failed with exit code 2");
    }

    #[test]
    fn test_error_details_plain_message() {
        let err = InstallError::MissingFile(PathBuf::from("/nope/requirements.txt"));
        let details = ErrorDetails::from_error(&err);
        assert!(details.message.contains("/nope/requirements.txt"));
        assert!(details.command.is_none());
    }

    #[test]
    fn test_error_chain_skips_repeated_messages() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = ProcessError::Spawn {
            command: "git".into(),
            source: io,
        };
        // the source message is already part of the outer message
        assert_eq!(error_chain(&err), "failed to spawn git: no such file");
    }
}
