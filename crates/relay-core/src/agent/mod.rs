pub mod claude;
pub mod error;
pub mod invoker;
pub mod permissions;
pub mod probe;
pub mod runtime;
pub mod types;

pub use claude::ClaudeRuntime;
pub use error::AgentError;
pub use invoker::{AgentInvoker, CancelSignal, RunningInvocation};
pub use permissions::PermissionConfig;
pub use probe::{probe_agent, DoctorReport, ProbeResult, ProbeStatus};
pub use runtime::AgentRuntime;
pub use types::{AgentInvocation, AgentMode, AgentReply, AgentRequest, AgentResult, SessionUpdate};
