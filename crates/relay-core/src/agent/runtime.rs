use super::types::{AgentReply, AgentRequest};
use crate::supervisor::AgentCommand;

/// Translates between relay's invocation model and one agent CLI.
///
/// Everything agent-specific, including where the continuation token lives
/// in the output, stays behind this trait.
pub trait AgentRuntime: Send + Sync {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Build the [`AgentCommand`] for one invocation.
    fn build_command(&self, req: &AgentRequest<'_>) -> AgentCommand;

    /// Extract reply text, token, and error flag from the captured stdout.
    fn parse_output(&self, stdout: &str) -> AgentReply;
}
