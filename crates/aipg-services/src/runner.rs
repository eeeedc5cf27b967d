//! External command execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::{InstallError, ProcessError};
use crate::sink::LogSink;

/// One external command to run.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Log source the output lines are attributed to.
    pub source: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Program and arguments as one line.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Outcome of a command that exited successfully.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub command: String,
    pub args: Vec<String>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Runs external commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command; a non-zero exit is a [`ProcessError::Failed`].
    async fn run(&self, command: &CommandSpec) -> Result<ProcessResult, ProcessError>;
}

/// Runner backed by `tokio::process`, streaming output to a log sink.
pub struct SystemRunner {
    sink: Arc<dyn LogSink>,
}

impl SystemRunner {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessResult, ProcessError> {
        let command = spec.program.display().to_string();
        let timestamp = Utc::now();
        let started = Instant::now();
        debug!(source = %spec.source, "running {}", spec.command_line());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: command.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let sink = self.sink.as_ref();
        let (stdout, stderr, status) = tokio::join!(
            collect_lines(stdout, |line| sink.info(line, &spec.source, false)),
            collect_lines(stderr, |line| sink.warn(line, &spec.source, false)),
            child.wait()
        );
        let io_err = |source| ProcessError::Io {
            command: command.clone(),
            source,
        };
        let status = status.map_err(io_err)?;
        let stdout = stdout.map_err(io_err)?;
        let stderr = stderr.map_err(io_err)?;
        let duration = started.elapsed();

        if !status.success() {
            return Err(ProcessError::Failed {
                command,
                args: spec.args.clone(),
                exit_code: status.code(),
                stdout,
                stderr,
                duration,
            });
        }

        Ok(ProcessResult {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(0),
            command,
            args: spec.args.clone(),
            duration,
            timestamp,
        })
    }
}

async fn collect_lines<R, F>(reader: Option<R>, mut on_line: F) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut collected = String::new();
    let Some(reader) = reader else {
        return Ok(collected);
    };
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        on_line(&line);
        collected.push_str(&line);
        collected.push('\n');
    }
    Ok(collected)
}

/// Return `path` if it exists, else [`InstallError::MissingFile`].
pub fn existing_file(path: impl AsRef<Path>) -> Result<PathBuf, InstallError> {
    let path = path.as_ref();
    if path.exists() {
        Ok(path.to_path_buf())
    } else {
        Err(InstallError::MissingFile(path.to_path_buf()))
    }
}
