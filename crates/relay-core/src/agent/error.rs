use std::path::PathBuf;

use thiserror::Error;

use crate::supervisor::TimeoutKind;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("could not launch agent '{program}': {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("agent timed out after {seconds}s ({kind})")]
    Timeout { seconds: u64, kind: TimeoutKind },

    #[error("agent exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("agent run was cancelled")]
    Cancelled,

    #[error("invalid agent permission config '{}': {reason}", path.display())]
    InvalidPermissions { path: PathBuf, reason: String },

    #[error("agent supervision failed: {reason}")]
    Supervision { reason: String },
}

impl AgentError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
