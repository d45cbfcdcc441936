use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::claude::{reply_text, ClaudeRuntime};
use super::error::AgentError;
use super::permissions::PermissionConfig;
use super::runtime::AgentRuntime;
use super::types::{AgentInvocation, AgentMode, AgentRequest, AgentResult, SessionUpdate};
use crate::context::build_agent_prompt;
use crate::session::{ProjectKey, SessionRecord, SessionStore};
use crate::supervisor::{
    self, ProcessOutcome, ProcessReport, SupervisorError, SupervisorHandle, SupervisorPolicy,
    TimeoutKind,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Launches agent runs and keeps the session store in step with them.
///
/// Runs that touch a conversation (edit mode, or any run resuming a token)
/// are serialized per project; a second such request waits for the first.
pub struct AgentInvoker {
    runtime: Arc<dyn AgentRuntime>,
    store: Arc<SessionStore>,
    policy: SupervisorPolicy,
    project_locks: Mutex<HashMap<ProjectKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Stops a run that has not launched yet, e.g. one queued behind another
/// edit on the same project.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    fired: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// A started run. Dropping it does not stop the process.
pub struct RunningInvocation {
    handle: SupervisorHandle,
    join: JoinHandle<Result<AgentResult, AgentError>>,
}

impl RunningInvocation {
    pub fn cancel_handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Terminate the agent. The store is left as it was.
    pub async fn cancel(&self) {
        self.handle.cancel().await;
    }

    pub async fn wait(self) -> Result<AgentResult, AgentError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(AgentError::Supervision {
                reason: e.to_string(),
            }),
        }
    }
}

impl AgentInvoker {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        store: Arc<SessionStore>,
        policy: SupervisorPolicy,
    ) -> Self {
        Self {
            runtime,
            store,
            policy,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &crate::config::AgentConfig, store: Arc<SessionStore>) -> Self {
        Self::new(
            Arc::new(ClaudeRuntime::new(cfg.program.clone())),
            store,
            SupervisorPolicy::from_config(cfg),
        )
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The stored token for a project, if a previous run left one.
    pub fn resume_token(&self, project_root: &std::path::Path) -> Option<String> {
        self.store
            .get(&ProjectKey::from_root(project_root))
            .map(|record| record.token)
    }

    /// Run to completion.
    pub async fn invoke(&self, invocation: AgentInvocation) -> Result<AgentResult, AgentError> {
        self.spawn(invocation).await?.wait().await
    }

    /// Start a run and return as soon as the process is up. Waits first if
    /// another conversation-bound run holds the project.
    pub async fn spawn(&self, invocation: AgentInvocation) -> Result<RunningInvocation, AgentError> {
        self.spawn_cancellable(invocation, CancelSignal::new()).await
    }

    /// [`spawn`](Self::spawn), except that firing `cancel` before the
    /// process starts returns [`AgentError::Cancelled`] and nothing is
    /// launched.
    pub async fn spawn_cancellable(
        &self,
        invocation: AgentInvocation,
        cancel: CancelSignal,
    ) -> Result<RunningInvocation, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let key = ProjectKey::from_root(&invocation.project_root);
        let serialize =
            invocation.mode == AgentMode::Edit || invocation.continuation_token.is_some();
        let guard = if serialize {
            let lock = self.project_lock(&key);
            let guard = match Arc::clone(&lock).try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    info!(project = %key, "another agent run holds this project, queuing");
                    tokio::select! {
                        guard = lock.lock_owned() => guard,
                        _ = cancel.cancelled() => {
                            info!(project = %key, "queued agent run cancelled before launch");
                            return Err(AgentError::Cancelled);
                        }
                    }
                }
            };
            Some(guard)
        } else {
            None
        };

        let permissions = match invocation.mode {
            AgentMode::Edit => PermissionConfig::load(&invocation.project_root)?,
            AgentMode::Analysis => PermissionConfig::default(),
        };

        let request = AgentRequest {
            project_root: &invocation.project_root,
            mode: invocation.mode,
            prompt: build_agent_prompt(
                invocation.mode,
                &invocation.prompt,
                &invocation.attached_context,
            ),
            continuation_token: invocation.continuation_token.as_deref(),
            permissions: &permissions,
        };
        let cmd = self.runtime.build_command(&request);
        let program = cmd.program.clone();

        debug!(
            project = %key,
            mode = %invocation.mode,
            resuming = invocation.continuation_token.is_some(),
            agent = self.runtime.name(),
            "launching agent"
        );

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = supervisor::supervise(cmd, self.policy.clone(), event_tx)
            .await
            .map_err(|e| launch_error(&program, e))?;

        let finisher = Finisher {
            runtime: Arc::clone(&self.runtime),
            store: Arc::clone(&self.store),
            policy: self.policy.clone(),
            key,
            invocation,
        };
        let join = tokio::spawn(async move {
            // Held until the store update below is done.
            let _guard = guard;
            let report = supervisor::collect(event_rx).await;
            finisher.finish(report).await
        });

        Ok(RunningInvocation { handle, join })
    }

    fn project_lock(&self, key: &ProjectKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .project_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

struct Finisher {
    runtime: Arc<dyn AgentRuntime>,
    store: Arc<SessionStore>,
    policy: SupervisorPolicy,
    key: ProjectKey,
    invocation: AgentInvocation,
}

impl Finisher {
    async fn finish(self, report: ProcessReport) -> Result<AgentResult, AgentError> {
        let exit_status = match report.outcome {
            ProcessOutcome::Exited { exit_code } => exit_code,
            ProcessOutcome::TimedOut(kind) => {
                let limit = match kind {
                    TimeoutKind::Hard => self.policy.hard_timeout,
                    TimeoutKind::Idle => self.policy.idle_timeout,
                };
                return Err(AgentError::Timeout {
                    seconds: limit.as_secs(),
                    kind,
                });
            }
            ProcessOutcome::Cancelled => return Err(AgentError::Cancelled),
            ProcessOutcome::Failed(reason) => return Err(AgentError::Supervision { reason }),
        };

        if report.output_truncated {
            warn!(project = %self.key, "agent output exceeded buffer limit and was cut");
        }

        let reply = self.runtime.parse_output(&report.stdout);
        let succeeded = exit_status == 0 && !reply.is_error;
        if !succeeded {
            warn!(project = %self.key, exit_status, is_error = reply.is_error, "agent run did not succeed");
        }

        let session = match (&reply.token, succeeded) {
            (Some(token), true) => self.save_token(token.clone()).await,
            _ => SessionUpdate::Unchanged,
        };

        let output_text = if succeeded {
            reply_text(reply.text)
        } else {
            reply.text
        };

        Ok(AgentResult {
            output_text,
            new_token: reply.token,
            exit_status,
            is_error: reply.is_error,
            session,
            stderr: report.stderr,
            duration: report.duration,
        })
    }

    async fn save_token(&self, token: String) -> SessionUpdate {
        let record = SessionRecord::new(&self.invocation.project_root, token);
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.put(record)).await {
            Ok(Ok(())) => {
                debug!(project = %self.key, "saved continuation token");
                SessionUpdate::Saved
            }
            Ok(Err(e)) => SessionUpdate::NotDurable(e.to_string()),
            Err(e) => SessionUpdate::NotDurable(e.to_string()),
        }
    }
}

fn launch_error(program: &str, err: SupervisorError) -> AgentError {
    match err {
        SupervisorError::SpawnFailed { source, .. } => AgentError::LaunchFailed {
            program: program.to_string(),
            reason: match source.kind() {
                std::io::ErrorKind::NotFound => "not found on PATH".to_string(),
                std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
                _ => source.to_string(),
            },
        },
        SupervisorError::Io(e) => AgentError::Supervision {
            reason: e.to_string(),
        },
    }
}
