use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::AgentError;

/// Trust level of an agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Read-only: the agent may inspect but never modify files.
    Analysis,
    /// The agent may modify files under the project's allow/deny lists.
    Edit,
}

impl AgentMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Edit => "edit",
        }
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One request to the external agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    pub project_root: PathBuf,
    pub mode: AgentMode,
    pub prompt: String,
    /// Rendered file contents, already in the operator's selection order.
    pub attached_context: String,
    pub continuation_token: Option<String>,
}

impl AgentInvocation {
    pub fn new(project_root: impl Into<PathBuf>, mode: AgentMode, prompt: impl Into<String>) -> Self {
        Self {
            project_root: project_root.into(),
            mode,
            prompt: prompt.into(),
            attached_context: String::new(),
            continuation_token: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.attached_context = context.into();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }
}

/// What happened to the project's stored session after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// No new token, or the run did not succeed.
    Unchanged,
    Saved,
    /// The token is usable by this process but could not be written to disk.
    NotDurable(String),
}

/// Result of a run that reached process exit.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub output_text: String,
    pub new_token: Option<String>,
    pub exit_status: i32,
    /// The agent completed but reported a failure in its own envelope.
    pub is_error: bool,
    pub session: SessionUpdate,
    pub stderr: String,
    #[serde(skip)]
    pub duration: Duration,
}

impl AgentResult {
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0 && !self.is_error
    }

    /// Turn a non-zero exit into [`AgentError::NonZeroExit`].
    pub fn into_success(self) -> Result<AgentResult, AgentError> {
        if self.exit_status != 0 {
            return Err(AgentError::NonZeroExit {
                code: self.exit_status,
                stderr: self.stderr,
            });
        }
        Ok(self)
    }
}

/// Input to an [`AgentRuntime`](super::AgentRuntime) when building a command.
#[derive(Debug, Clone)]
pub struct AgentRequest<'a> {
    pub project_root: &'a Path,
    pub mode: AgentMode,
    /// Full prompt text, delivered on stdin.
    pub prompt: String,
    pub continuation_token: Option<&'a str>,
    pub permissions: &'a super::permissions::PermissionConfig,
}

/// The agent's reply, reduced to the narrow protocol relay cares about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AgentReply {
    pub text: String,
    pub token: Option<String>,
    pub is_error: bool,
}
