use std::path::{Path, PathBuf};
use std::process::Output;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Runs a short external command to completion. Swappable in tests.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<Output>;
}

pub struct RealCommandRunner;

impl CommandRunner for RealCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
        std::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Ready,
    /// Found but `--version` failed.
    Broken,
    Missing,
}

impl ProbeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Broken => "broken",
            Self::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub program: String,
    pub status: ProbeStatus,
    pub binary_path: Option<PathBuf>,
    pub version: Option<String>,
    pub message: Option<String>,
}

/// Resolve the agent binary on `PATH` and ask it for its version.
pub fn probe_agent(program: &str) -> ProbeResult {
    probe_agent_with(&RealCommandRunner, program, which::which(program).ok())
}

pub fn probe_agent_with(
    runner: &dyn CommandRunner,
    program: &str,
    binary_path: Option<PathBuf>,
) -> ProbeResult {
    let Some(binary_path) = binary_path else {
        return ProbeResult {
            program: program.to_string(),
            status: ProbeStatus::Missing,
            binary_path: None,
            version: None,
            message: Some(format!("'{program}' was not found on PATH")),
        };
    };
    debug!(path = %binary_path.display(), "found agent binary");

    match runner.run(program, &["--version"]) {
        Ok(output) if output.status.success() => ProbeResult {
            program: program.to_string(),
            status: ProbeStatus::Ready,
            binary_path: Some(binary_path),
            version: Some(String::from_utf8_lossy(&output.stdout).trim().to_string()),
            message: None,
        },
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(program, stderr = %stderr, "agent --version exited non-zero");
            ProbeResult {
                program: program.to_string(),
                status: ProbeStatus::Broken,
                binary_path: Some(binary_path),
                version: None,
                message: Some(if stderr.is_empty() {
                    "--version exited non-zero".to_string()
                } else {
                    stderr
                }),
            }
        }
        Err(e) => {
            warn!(program, error = %e, "failed to run agent --version");
            ProbeResult {
                program: program.to_string(),
                status: ProbeStatus::Broken,
                binary_path: Some(binary_path),
                version: None,
                message: Some(format!("failed to run --version: {e}")),
            }
        }
    }
}

/// Result of checking git availability and repository status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCheck {
    pub git_available: bool,
    pub git_version: Option<String>,
    pub in_git_repo: bool,
    pub repo_root: Option<String>,
}

/// Environment readiness for `relay doctor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub git: GitCheck,
    pub agent: ProbeResult,
    pub overall_ready: bool,
}

impl DoctorReport {
    pub fn run(git_program: &str, agent_program: &str, repo_path: Option<&Path>) -> Self {
        let git = check_git(&RealCommandRunner, git_program, repo_path);
        let agent = probe_agent(agent_program);
        Self::from_parts(git, agent)
    }

    pub fn from_parts(git: GitCheck, agent: ProbeResult) -> Self {
        let overall_ready = git.git_available && git.in_git_repo && agent.status == ProbeStatus::Ready;
        Self {
            git,
            agent,
            overall_ready,
        }
    }

    /// Human-readable reasons the environment is not ready; empty when it is.
    pub fn not_ready_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if !self.git.git_available {
            reasons.push("git is not installed or not in PATH".to_string());
        } else if !self.git.in_git_repo {
            reasons.push("not inside a git repository".to_string());
        }
        if self.agent.status != ProbeStatus::Ready {
            reasons.push(format!(
                "agent '{}' is {}",
                self.agent.program,
                self.agent.status.label()
            ));
        }
        reasons
    }
}

pub fn check_git(runner: &dyn CommandRunner, git_program: &str, repo_path: Option<&Path>) -> GitCheck {
    let (git_available, git_version) = match runner.run(git_program, &["--version"]) {
        Ok(output) if output.status.success() => {
            let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let version = raw
                .strip_prefix("git version ")
                .map(str::to_string)
                .unwrap_or(raw);
            (true, Some(version))
        }
        Ok(_) => {
            warn!("git --version exited non-zero");
            (false, None)
        }
        Err(e) => {
            warn!(error = %e, "git not found");
            (false, None)
        }
    };

    if !git_available {
        return GitCheck {
            git_available,
            git_version,
            in_git_repo: false,
            repo_root: None,
        };
    }

    let dir_arg = repo_path.map(|p| format!("-C{}", p.display()));
    let mut args: Vec<&str> = Vec::with_capacity(3);
    if let Some(dir) = dir_arg.as_deref() {
        args.push(dir);
    }
    args.extend(["rev-parse", "--show-toplevel"]);

    let (in_git_repo, repo_root) = match runner.run(git_program, &args) {
        Ok(output) if output.status.success() => (
            true,
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string()),
        ),
        _ => (false, None),
    };

    GitCheck {
        git_available,
        git_version,
        in_git_repo,
        repo_root,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    struct MockRunner {
        responses: HashMap<String, Output>,
    }

    impl MockRunner {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
            }
        }

        fn register(&mut self, cmd: &str, code: i32, stdout: &str) {
            self.responses.insert(
                cmd.to_string(),
                Output {
                    status: ExitStatus::from_raw(code << 8),
                    stdout: stdout.as_bytes().to_vec(),
                    stderr: Vec::new(),
                },
            );
        }
    }

    impl CommandRunner for MockRunner {
        fn run(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
            let key = format!("{program} {}", args.join(" "));
            self.responses.get(&key).cloned().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("no mock for: {key}"))
            })
        }
    }

    #[test]
    fn missing_binary_is_reported() {
        let result = probe_agent_with(&MockRunner::new(), "claude", None);
        assert_eq!(result.status, ProbeStatus::Missing);
        assert!(result.message.unwrap().contains("not found"));
    }

    #[test]
    fn ready_binary_reports_version() {
        let mut mock = MockRunner::new();
        mock.register("claude --version", 0, "1.0.51 (Claude Code)\n");
        let result = probe_agent_with(&mock, "claude", Some("/usr/bin/claude".into()));
        assert_eq!(result.status, ProbeStatus::Ready);
        assert_eq!(result.version.as_deref(), Some("1.0.51 (Claude Code)"));
    }

    #[test]
    fn failing_version_marks_broken() {
        let mut mock = MockRunner::new();
        mock.register("claude --version", 1, "");
        let result = probe_agent_with(&mock, "claude", Some("/usr/bin/claude".into()));
        assert_eq!(result.status, ProbeStatus::Broken);
    }

    #[test]
    fn git_check_parses_version_and_root() {
        let mut mock = MockRunner::new();
        mock.register("git --version", 0, "git version 2.43.0\n");
        mock.register("git -C/work rev-parse --show-toplevel", 0, "/work\n");
        let git = check_git(&mock, "git", Some(Path::new("/work")));
        assert!(git.git_available);
        assert_eq!(git.git_version.as_deref(), Some("2.43.0"));
        assert_eq!(git.repo_root.as_deref(), Some("/work"));
    }

    #[test]
    fn doctor_lists_reasons() {
        let git = GitCheck {
            git_available: true,
            git_version: Some("2.43.0".into()),
            in_git_repo: false,
            repo_root: None,
        };
        let agent = probe_agent_with(&MockRunner::new(), "claude", None);
        let report = DoctorReport::from_parts(git, agent);
        assert!(!report.overall_ready);
        let reasons = report.not_ready_reasons();
        assert_eq!(reasons.len(), 2);
        assert!(reasons[1].contains("missing"));
    }
}
