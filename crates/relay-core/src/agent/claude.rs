use serde_json::Value;

use super::runtime::AgentRuntime;
use super::types::{AgentMode, AgentReply, AgentRequest};
use crate::supervisor::AgentCommand;

/// Tools withheld from analysis runs on top of plan mode.
const MUTATING_TOOLS: &[&str] = &["Edit", "MultiEdit", "Write", "NotebookEdit", "Bash"];

const EMPTY_REPLY_NOTICE: &str = "The agent completed the task. Check your files for changes.";

/// Runtime for the Claude CLI in non-interactive JSON mode.
///
/// The prompt is written to stdin; the reply is a single JSON object on the
/// last line of stdout carrying `result`, `session_id`, and `is_error`.
#[derive(Debug, Clone)]
pub struct ClaudeRuntime {
    program: String,
}

impl Default for ClaudeRuntime {
    fn default() -> Self {
        Self::new("claude")
    }
}

impl ClaudeRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl AgentRuntime for ClaudeRuntime {
    fn name(&self) -> &str {
        "claude"
    }

    fn build_command(&self, req: &AgentRequest<'_>) -> AgentCommand {
        let mut args: Vec<String> = vec!["-p".into(), "--output-format".into(), "json".into()];

        if let Some(token) = req.continuation_token {
            args.push("--resume".into());
            args.push(token.to_string());
        }

        match req.mode {
            AgentMode::Analysis => {
                args.push("--permission-mode".into());
                args.push("plan".into());
                for tool in MUTATING_TOOLS {
                    args.push("--disallowedTools".into());
                    args.push((*tool).to_string());
                }
            }
            AgentMode::Edit => {
                args.push("--permission-mode".into());
                args.push(req.permissions.default_mode.clone());
                for tool in &req.permissions.allow {
                    args.push("--allowedTools".into());
                    args.push(tool.clone());
                }
                for tool in &req.permissions.deny {
                    args.push("--disallowedTools".into());
                    args.push(tool.clone());
                }
            }
        }

        AgentCommand {
            program: self.program.clone(),
            args,
            env: vec![],
            cwd: req.project_root.to_path_buf(),
            stdin: Some(req.prompt.clone()),
        }
    }

    fn parse_output(&self, stdout: &str) -> AgentReply {
        let trimmed = stdout.trim();
        let Some(envelope) = find_envelope(trimmed) else {
            return AgentReply {
                text: trimmed.to_string(),
                token: None,
                is_error: false,
            };
        };

        let is_error = envelope.get("is_error").and_then(Value::as_bool).unwrap_or(false);
        let token = envelope
            .get("session_id")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);

        let text_field = |key: &str| envelope.get(key).and_then(Value::as_str).map(str::to_string);
        let text = if is_error {
            text_field("error_message")
                .or_else(|| text_field("result"))
                .unwrap_or_else(|| "agent reported an error".to_string())
        } else {
            text_field("result")
                .or_else(|| text_field("message"))
                .unwrap_or_default()
        };

        AgentReply {
            text,
            token,
            is_error,
        }
    }
}

/// Replace an empty successful reply with a short notice. Edits land on
/// disk, so the agent often has nothing to say.
pub(crate) fn reply_text(text: String) -> String {
    if text.trim().is_empty() {
        EMPTY_REPLY_NOTICE.to_string()
    } else {
        text
    }
}

/// The whole output as one JSON object, else the last line that is one.
fn find_envelope(stdout: &str) -> Option<Value> {
    let as_object = |s: &str| {
        serde_json::from_str::<Value>(s)
            .ok()
            .filter(Value::is_object)
    };
    as_object(stdout).or_else(|| {
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .find_map(as_object)
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::agent::permissions::PermissionConfig;

    fn request<'a>(
        mode: AgentMode,
        token: Option<&'a str>,
        permissions: &'a PermissionConfig,
    ) -> AgentRequest<'a> {
        AgentRequest {
            project_root: Path::new("/repo"),
            mode,
            prompt: "review this".to_string(),
            continuation_token: token,
            permissions,
        }
    }

    fn flag_values(args: &[String], flag: &str) -> Vec<String> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].clone())
            .collect()
    }

    #[test]
    fn analysis_command_is_read_only() {
        let perms = PermissionConfig::default();
        let cmd = ClaudeRuntime::default().build_command(&request(AgentMode::Analysis, None, &perms));

        assert_eq!(cmd.program, "claude");
        assert_eq!(&cmd.args[..3], ["-p", "--output-format", "json"]);
        assert_eq!(flag_values(&cmd.args, "--permission-mode"), ["plan"]);
        assert!(flag_values(&cmd.args, "--allowedTools").is_empty());
        assert!(flag_values(&cmd.args, "--disallowedTools").contains(&"Write".to_string()));
        assert!(!cmd.args.contains(&"--resume".to_string()));
        assert_eq!(cmd.stdin.as_deref(), Some("review this"));
        assert_eq!(cmd.cwd, Path::new("/repo"));
    }

    #[test]
    fn edit_command_carries_permissions_and_token() {
        let perms = PermissionConfig {
            allow: vec!["Read".into(), "Edit".into()],
            deny: vec!["Read(./.env)".into()],
            default_mode: "acceptEdits".into(),
            source: None,
        };
        let cmd = ClaudeRuntime::new("/opt/claude")
            .build_command(&request(AgentMode::Edit, Some("sess-9"), &perms));

        assert_eq!(cmd.program, "/opt/claude");
        assert_eq!(flag_values(&cmd.args, "--resume"), ["sess-9"]);
        assert_eq!(flag_values(&cmd.args, "--permission-mode"), ["acceptEdits"]);
        assert_eq!(flag_values(&cmd.args, "--allowedTools"), ["Read", "Edit"]);
        assert_eq!(flag_values(&cmd.args, "--disallowedTools"), ["Read(./.env)"]);
    }

    #[test]
    fn parses_json_envelope() {
        let reply = ClaudeRuntime::default().parse_output(
            r#"{"type":"result","result":"Looks fine.","session_id":"abc-123","is_error":false}"#,
        );
        assert_eq!(reply.text, "Looks fine.");
        assert_eq!(reply.token.as_deref(), Some("abc-123"));
        assert!(!reply.is_error);
    }

    #[test]
    fn envelope_on_last_line_after_noise() {
        let out = "warming up\nstill thinking\n{\"result\":\"done\",\"session_id\":\"t-2\"}\n";
        let reply = ClaudeRuntime::default().parse_output(out);
        assert_eq!(reply.text, "done");
        assert_eq!(reply.token.as_deref(), Some("t-2"));
    }

    #[test]
    fn plain_text_output_has_no_token() {
        let reply = ClaudeRuntime::default().parse_output("just prose\n");
        assert_eq!(reply.text, "just prose");
        assert!(reply.token.is_none());
    }

    #[test]
    fn error_envelope_prefers_error_message() {
        let reply = ClaudeRuntime::default().parse_output(
            r#"{"is_error":true,"error_message":"credit balance too low","session_id":"s"}"#,
        );
        assert!(reply.is_error);
        assert_eq!(reply.text, "credit balance too low");
    }

    #[test]
    fn message_field_is_a_fallback() {
        let reply = ClaudeRuntime::default().parse_output(r#"{"message":"hi"}"#);
        assert_eq!(reply.text, "hi");
    }

    #[test]
    fn empty_reply_gets_notice() {
        assert_eq!(reply_text("  ".into()), EMPTY_REPLY_NOTICE);
        assert_eq!(reply_text(String::new()), EMPTY_REPLY_NOTICE);
        assert_eq!(reply_text("done".into()), "done");
    }
}
