//! Process supervisor for long-lived backend processes.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ProcessError;
use crate::sink::LogSink;

/// Flags every backend process is started with.
pub const BACKEND_ENV: [(&str, &str); 3] = [
    ("SYCL_ENABLE_DEFAULT_CONTEXTS", "1"),
    ("SYCL_CACHE_PERSISTENT", "1"),
    ("PYTHONIOENCODING", "utf-8"),
];

/// How to start a backend process.
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Overlaid on the ambient environment after [`BACKEND_ENV`].
    pub env: Vec<(String, String)>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
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
}

/// Resolves once if the process exits on its own.
///
/// Never resolves while the process runs, nor after it was stopped
/// through [`ProcessHandle::kill`].
#[derive(Debug)]
pub struct ExitSignal {
    rx: oneshot::Receiver<()>,
}

/// A connected exit sender and signal.
pub(crate) fn exit_signal() -> (oneshot::Sender<()>, ExitSignal) {
    let (tx, rx) = oneshot::channel();
    (tx, ExitSignal { rx })
}

impl ExitSignal {
    pub async fn wait(self) -> bool {
        match self.rx.await {
            Ok(()) => true,
            Err(_) => std::future::pending().await,
        }
    }
}

/// Live process; killing it is the only way to stop it.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Terminate the process and wait until it is reaped.
    ///
    /// Sends SIGTERM first on unix and force-kills after the grace period.
    pub async fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.await;
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // the watcher terminates the child once the sender is gone
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A spawned process and its early-exit signal.
#[derive(Debug)]
pub struct SupervisedProcess {
    pub handle: ProcessHandle,
    pub exited_early: ExitSignal,
}

/// Start a backend process, forwarding its output to `sink` as `name`.
pub fn spawn(
    command: &LaunchCommand,
    name: &str,
    sink: Arc<dyn LogSink>,
    kill_grace: Duration,
) -> Result<SupervisedProcess, ProcessError> {
    info!("Starting {} with {} {}", name, command.program.display(), command.args.join(" "));

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.cwd)
        .envs(BACKEND_ENV)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        command: command.program.display().to_string(),
        source,
    })?;
    let pid = child.id();
    debug!("{} process started with PID: {:?}", name, pid);

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, name.to_string(), sink.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, name.to_string(), sink.clone()));
    }

    let (exit_tx, exited_early) = exit_signal();
    let (kill_tx, kill_rx) = oneshot::channel();
    let watcher = tokio::spawn(watch(child, name.to_string(), sink, kill_rx, exit_tx, kill_grace));

    Ok(SupervisedProcess {
        handle: ProcessHandle {
            pid,
            kill_tx: Some(kill_tx),
            watcher: Some(watcher),
        },
        exited_early,
    })
}

async fn watch(
    mut child: Child,
    name: String,
    sink: Arc<dyn LogSink>,
    mut kill_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<()>,
    kill_grace: Duration,
) {
    let killed = tokio::select! {
        status = child.wait() => {
            let message = match status {
                Ok(status) => format!("encountered unexpected exit in {name}: {status}"),
                Err(e) => format!("encountered error of process in {name}: {e}"),
            };
            sink.error(&message, &name, false);
            false
        }
        _ = &mut kill_rx => true,
    };

    if killed {
        terminate(&mut child, &name, kill_grace).await;
    } else {
        let _ = exit_tx.send(());
    }
}

async fn terminate(child: &mut Child, name: &str, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid belongs to a child we have not reaped yet
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!("{} exited with status: {}", name, status),
        Ok(Err(e)) => {
            warn!("Error checking {} status: {}", name, e);
            let _ = child.kill().await;
        }
        Err(_) => {
            warn!("{} didn't exit gracefully, killing...", name);
            let _ = child.kill().await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineLevel {
    Info,
    Warn,
    Error,
}

fn classify(line: &str) -> LineLevel {
    if line.starts_with("INFO") {
        LineLevel::Info
    } else if line.starts_with("WARN") {
        LineLevel::Warn
    } else {
        LineLevel::Error
    }
}

async fn forward_lines<R>(reader: R, name: String, sink: Arc<dyn LogSink>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match classify(&line) {
                LineLevel::Info => sink.info(&line, &name, false),
                LineLevel::Warn => sink.warn(&line, &name, false),
                LineLevel::Error => sink.error(&line, &name, false),
            },
            Ok(None) => break,
            Err(e) => {
                debug!("Error reading output of {}: {}", name, e);
                break;
            }
        }
    }
}
