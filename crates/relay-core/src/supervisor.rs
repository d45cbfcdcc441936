//! Child process supervision for external agents.
//!
//! A supervised process runs in its own process group, receives an optional
//! payload on stdin, and streams its output back as [`SupervisorEvent`]s.
//! Exactly one terminal event (`Completed`, `Failed`, `TimedOut`, or
//! `Cancelled`) is sent, after every output line has been delivered.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long to wait for output pipes to drain once the process has gone.
const READER_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error during supervision: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Hard,
    Idle,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Hard => write!(f, "hard"),
            TimeoutKind::Idle => write!(f, "idle"),
        }
    }
}

/// Command to run under supervision.
#[derive(Debug, Clone, Default)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

/// Lifecycle event emitted for a supervised process.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Started {
        pid: u32,
    },
    Stdout(String),
    Stderr(String),
    /// Further stdout is discarded past this many bytes.
    OutputLimitReached {
        bytes: usize,
    },
    Completed {
        exit_code: i32,
        duration: Duration,
    },
    Failed {
        error: String,
        duration: Duration,
    },
    TimedOut {
        kind: TimeoutKind,
        duration: Duration,
    },
    Cancelled {
        duration: Duration,
    },
}

impl SupervisorEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::TimedOut { .. } | Self::Cancelled { .. }
        )
    }
}

/// Runtime policy for supervisor timeout and buffer limits.
///
/// Distinct from `config::AgentConfig`, which is the TOML schema type.
#[derive(Debug, Clone)]
pub struct SupervisorPolicy {
    pub hard_timeout: Duration,
    /// Longest allowed stretch without any output.
    pub idle_timeout: Duration,
    pub output_buffer_bytes: usize,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            hard_timeout: Duration::from_secs(1800),
            idle_timeout: Duration::from_secs(300),
            output_buffer_bytes: 10 * 1024 * 1024,
        }
    }
}

impl SupervisorPolicy {
    pub fn from_config(cfg: &crate::config::AgentConfig) -> Self {
        Self {
            hard_timeout: Duration::from_secs(cfg.hard_timeout_seconds),
            idle_timeout: Duration::from_secs(cfg.idle_timeout_seconds),
            output_buffer_bytes: cfg.output_buffer_bytes,
        }
    }
}

/// Handle to a running supervised process, used for cancellation.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    cancel_tx: mpsc::Sender<()>,
    pid: u32,
}

impl SupervisorHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Request cancellation of the supervised process.
    pub async fn cancel(&self) {
        let _ = self.cancel_tx.send(()).await;
    }

    /// Non-async variant of [`cancel`](Self::cancel) for callers outside the
    /// runtime. A pending request already covers a repeated one.
    pub fn request_cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited { exit_code: i32 },
    TimedOut(TimeoutKind),
    Cancelled,
    Failed(String),
}

/// Everything collected from one supervised run.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub outcome: ProcessOutcome,
    pub stdout: String,
    pub stderr: String,
    pub output_truncated: bool,
    pub duration: Duration,
}

/// Spawn and supervise a single process.
///
/// Returns a handle for cancellation; events stream through `event_tx`.
pub async fn supervise(
    cmd: AgentCommand,
    policy: SupervisorPolicy,
    event_tx: mpsc::Sender<SupervisorEvent>,
) -> Result<SupervisorHandle, SupervisorError> {
    let mut child = build_process(&cmd)?;

    let pid = child.id().unwrap_or(0);
    tracing::debug!(pid, program = %cmd.program, "agent process started");
    let _ = event_tx.send(SupervisorEvent::Started { pid }).await;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SupervisorError::Io(std::io::Error::other("stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SupervisorError::Io(std::io::Error::other("stderr not captured")))?;

    if let Some(mut stdin) = child.stdin.take() {
        let payload = cmd.stdin.clone().unwrap_or_default();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                tracing::debug!(pid, error = %e, "agent closed stdin before reading prompt");
            }
            let _ = stdin.shutdown().await;
        });
    }

    let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);
    let handle = SupervisorHandle { cancel_tx, pid };

    let hard_timeout = policy.hard_timeout;
    let idle_timeout = policy.idle_timeout;

    tokio::spawn(async move {
        let start = Instant::now();

        let (idle_reset_tx, mut idle_reset_rx) = mpsc::channel::<()>(32);

        let stdout_task = spawn_reader(
            stdout,
            event_tx.clone(),
            idle_reset_tx.clone(),
            Some(policy.output_buffer_bytes),
            SupervisorEvent::Stdout,
        );
        let stderr_task = spawn_reader(
            stderr,
            event_tx.clone(),
            idle_reset_tx,
            None,
            SupervisorEvent::Stderr,
        );

        let terminal = tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(s) => SupervisorEvent::Completed {
                        exit_code: exit_code_of(s),
                        duration: start.elapsed(),
                    },
                    Err(e) => SupervisorEvent::Failed {
                        error: e.to_string(),
                        duration: start.elapsed(),
                    },
                }
            }
            _ = tokio::time::sleep(hard_timeout) => {
                tracing::warn!(pid, seconds = hard_timeout.as_secs(), "agent hit hard timeout");
                terminate_process(&mut child).await;
                SupervisorEvent::TimedOut {
                    kind: TimeoutKind::Hard,
                    duration: start.elapsed(),
                }
            }
            _ = idle_timeout_watch(idle_timeout, &mut idle_reset_rx) => {
                tracing::warn!(pid, seconds = idle_timeout.as_secs(), "agent produced no output, idle timeout");
                terminate_process(&mut child).await;
                SupervisorEvent::TimedOut {
                    kind: TimeoutKind::Idle,
                    duration: start.elapsed(),
                }
            }
            Some(()) = cancel_rx.recv() => {
                tracing::info!(pid, "cancelling agent process");
                terminate_process(&mut child).await;
                SupervisorEvent::Cancelled {
                    duration: start.elapsed(),
                }
            }
        };

        drain_reader(stdout_task).await;
        drain_reader(stderr_task).await;
        let _ = event_tx.send(terminal).await;
    });

    Ok(handle)
}

/// Drain events from a supervised process into a [`ProcessReport`].
pub async fn collect(mut events: mpsc::Receiver<SupervisorEvent>) -> ProcessReport {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut output_truncated = false;

    while let Some(event) = events.recv().await {
        let (outcome, duration) = match event {
            SupervisorEvent::Started { .. } => continue,
            SupervisorEvent::Stdout(line) => {
                stdout.push(line);
                continue;
            }
            SupervisorEvent::Stderr(line) => {
                stderr.push(line);
                continue;
            }
            SupervisorEvent::OutputLimitReached { .. } => {
                output_truncated = true;
                continue;
            }
            SupervisorEvent::Completed { exit_code, duration } => {
                (ProcessOutcome::Exited { exit_code }, duration)
            }
            SupervisorEvent::Failed { error, duration } => (ProcessOutcome::Failed(error), duration),
            SupervisorEvent::TimedOut { kind, duration } => (ProcessOutcome::TimedOut(kind), duration),
            SupervisorEvent::Cancelled { duration } => (ProcessOutcome::Cancelled, duration),
        };
        return ProcessReport {
            outcome,
            stdout: stdout.join("\n"),
            stderr: stderr.join("\n"),
            output_truncated,
            duration,
        };
    }

    ProcessReport {
        outcome: ProcessOutcome::Failed("supervisor stopped without a result".to_string()),
        stdout: stdout.join("\n"),
        stderr: stderr.join("\n"),
        output_truncated,
        duration: Duration::ZERO,
    }
}

fn spawn_reader<R>(
    pipe: R,
    event_tx: mpsc::Sender<SupervisorEvent>,
    idle_reset_tx: mpsc::Sender<()>,
    limit: Option<usize>,
    wrap: fn(String) -> SupervisorEvent,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut line = Vec::new();
        let mut total_bytes: usize = 0;
        let mut limit_reported = false;

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(n) => {
                    total_bytes = total_bytes.saturating_add(n);
                    // A full channel already guarantees a pending reset.
                    let _ = idle_reset_tx.try_send(());

                    if limit.is_some_and(|max| total_bytes > max) {
                        if !limit_reported {
                            limit_reported = true;
                            let _ = event_tx
                                .send(SupervisorEvent::OutputLimitReached { bytes: total_bytes })
                                .await;
                        }
                        continue;
                    }
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end_matches(['\n', '\r']);
                    let _ = event_tx.send(wrap(text.to_string())).await;
                }
                Err(_) => break,
            }
        }
    })
}

/// A grandchild that escaped the process group can hold a pipe open forever.
async fn drain_reader(mut task: JoinHandle<()>) {
    if tokio::time::timeout(READER_DRAIN_GRACE, &mut task).await.is_err() {
        tracing::debug!("output pipe still open after exit, abandoning reader");
        task.abort();
    }
}

async fn idle_timeout_watch(timeout: Duration, reset_rx: &mut mpsc::Receiver<()>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                return;
            }
            msg = reset_rx.recv() => {
                if msg.is_none() {
                    // Both pipes closed: the process is exiting and child.wait()
                    // must win the outer select.
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KillErrorKind {
    NoSuchProcess,
    PermissionDenied,
    Other(i32),
    Unknown,
}

#[cfg(unix)]
fn classify_kill_error(errno: Option<i32>) -> KillErrorKind {
    match errno {
        Some(code) if code == libc::ESRCH => KillErrorKind::NoSuchProcess,
        Some(code) if code == libc::EPERM => KillErrorKind::PermissionDenied,
        Some(code) => KillErrorKind::Other(code),
        None => KillErrorKind::Unknown,
    }
}

/// SIGTERM the whole process group, then SIGKILL after a short grace period.
async fn terminate_process(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        let Some(pid_u32) = child.id() else {
            let _ = child.kill().await;
            return;
        };

        let pid = pid_u32 as i32;
        let pgid = -pid;

        // SAFETY: kill(2) with a negative pid signals the process group we
        // created with setsid; it has no memory-safety preconditions.
        let term_result = unsafe { libc::kill(pgid, libc::SIGTERM) };
        if term_result != 0 {
            match classify_kill_error(std::io::Error::last_os_error().raw_os_error()) {
                KillErrorKind::NoSuchProcess => {
                    tracing::debug!(pid, "process group already exited before SIGTERM");
                    let _ = child.wait().await;
                    return;
                }
                other => {
                    tracing::warn!(pid, error = ?other, "SIGTERM to process group failed, falling back to child.kill");
                    let _ = child.kill().await;
                    return;
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(300)).await;

        if let Ok(Some(_)) = child.try_wait() {
            // The leader is gone but stragglers in its group may remain.
            // SAFETY: as above.
            unsafe { libc::kill(pgid, libc::SIGKILL) };
            return;
        }

        // SAFETY: as above.
        let kill_result = unsafe { libc::kill(pgid, libc::SIGKILL) };
        if kill_result != 0 {
            match classify_kill_error(std::io::Error::last_os_error().raw_os_error()) {
                KillErrorKind::NoSuchProcess => {
                    tracing::debug!(pid, "process group exited before SIGKILL escalation");
                }
                other => {
                    tracing::warn!(pid, error = ?other, "SIGKILL to process group failed, falling back to child.kill");
                }
            }
        }
        let _ = child.kill().await;
    }

    #[cfg(not(unix))]
    {
        let _ = child.kill().await;
    }
}

fn build_process(cmd: &AgentCommand) -> Result<tokio::process::Child, SupervisorError> {
    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .current_dir(&cmd.cwd)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    if cmd.stdin.is_some() {
        command.stdin(std::process::Stdio::piped());
    } else {
        command.stdin(std::process::Stdio::null());
    }

    for (key, val) in &cmd.env {
        command.env(key, val);
    }

    #[cfg(unix)]
    {
        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    command.spawn().map_err(|source| SupervisorError::SpawnFailed {
        program: cmd.program.clone(),
        source,
    })
}
