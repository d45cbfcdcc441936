use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::code::StatusKind;
use super::parse::{parse_status_line, ChangeEntry, ParseError, RepoPath};
use crate::filter::PathFilter;
use crate::git_exec::{run_git_program_with_timeout, GitExecError, DEFAULT_GIT_COMMAND_TIMEOUT};

const STATUS_ARGS: &[&str] = &["-c", "core.quotePath=true", "status", "--porcelain=v1", "-u"];

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("repository root '{}' does not exist", root.display())]
    RootMissing { root: PathBuf },

    #[error("'{}' is not inside a git repository", root.display())]
    NotARepository { root: PathBuf },

    #[error("git executable '{program}' was not found")]
    GitNotFound { program: String },

    #[error("permission denied running git in '{}'", root.display())]
    PermissionDenied { root: PathBuf },

    #[error("git status timed out after {timeout_secs}s")]
    TimedOut { timeout_secs: u64 },

    #[error("git status failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("failed to run git status: {0}")]
    Io(std::io::Error),
}

/// A status line that could not be parsed and was left out of the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineWarning {
    pub line_number: usize,
    pub raw: String,
    pub error: ParseError,
}

impl std::fmt::Display for LineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "status line {}: {} ({:?})",
            self.line_number, self.error, self.raw
        )
    }
}

/// Snapshot of the working tree produced by one status invocation.
///
/// Entries keep git's output order. The set is never patched: a refresh
/// builds a new one and the old one is dropped.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    repo_root: PathBuf,
    entries: Vec<ChangeEntry>,
    warnings: Vec<LineWarning>,
}

impl ChangeSet {
    /// Build a set from raw `git status --porcelain=v1` output.
    pub fn from_porcelain(repo_root: impl Into<PathBuf>, output: &[u8]) -> Self {
        let mut lines: Vec<&[u8]> = output
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        let mut entries: Vec<ChangeEntry> = Vec::with_capacity(lines.len());
        let mut index: HashMap<RepoPath, usize> = HashMap::new();
        let mut warnings = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            match parse_status_line(line) {
                Ok(entry) => match index.get(entry.path()) {
                    Some(&slot) => {
                        debug!(path = %entry.path(), "duplicate status record, keeping latest");
                        entries[slot] = entry;
                    }
                    None => {
                        index.insert(entry.path().clone(), entries.len());
                        entries.push(entry);
                    }
                },
                Err(error) => {
                    let warning = LineWarning {
                        line_number: i + 1,
                        raw: String::from_utf8_lossy(line).into_owned(),
                        error,
                    };
                    warn!(%warning, "skipping malformed status line");
                    warnings.push(warning);
                }
            }
        }

        Self {
            repo_root: repo_root.into(),
            entries,
            warnings,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn warnings(&self) -> &[LineWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &RepoPath) -> Option<&ChangeEntry> {
        self.entries.iter().find(|e| e.path() == path)
    }

    /// Absolute on-disk location of an entry, for content loading.
    pub fn absolute_path(&self, entry: &ChangeEntry) -> PathBuf {
        self.repo_root.join(entry.path().to_path_buf())
    }

    /// Entries worth sending for analysis: present on disk and not excluded.
    pub fn analysis_candidates<'a>(&'a self, filter: &PathFilter) -> Vec<&'a ChangeEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind() != StatusKind::Deleted)
            .filter(|e| !filter.is_excluded(&e.path().to_string_lossy()))
            .collect()
    }
}

/// Runs `git status` for a repository and turns its output into a [`ChangeSet`].
#[derive(Debug, Clone)]
pub struct ChangeSetBuilder {
    git_program: String,
    timeout: Duration,
}

impl Default for ChangeSetBuilder {
    fn default() -> Self {
        Self {
            git_program: "git".to_string(),
            timeout: DEFAULT_GIT_COMMAND_TIMEOUT,
        }
    }
}

impl ChangeSetBuilder {
    pub fn new(git_program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            git_program: git_program.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &crate::config::StatusConfig) -> Self {
        Self::new(
            cfg.git_program.clone(),
            Duration::from_secs(cfg.timeout_seconds),
        )
    }

    pub async fn build(&self, repo_root: &Path) -> Result<ChangeSet, BuildError> {
        if !repo_root.is_dir() {
            return Err(BuildError::RootMissing {
                root: repo_root.to_path_buf(),
            });
        }

        let output =
            run_git_program_with_timeout(&self.git_program, STATUS_ARGS, repo_root, self.timeout)
                .await
                .map_err(|e| self.classify(repo_root, e))?;

        let set = ChangeSet::from_porcelain(repo_root, &output.stdout);
        debug!(
            root = %repo_root.display(),
            entries = set.len(),
            warnings = set.warnings().len(),
            "built change set"
        );
        Ok(set)
    }

    fn classify(&self, repo_root: &Path, err: GitExecError) -> BuildError {
        match err {
            GitExecError::TimedOut { timeout_secs, .. } => BuildError::TimedOut { timeout_secs },
            GitExecError::NonZeroExit { code, stderr, .. } => {
                if stderr.to_ascii_lowercase().contains("not a git repository") {
                    BuildError::NotARepository {
                        root: repo_root.to_path_buf(),
                    }
                } else {
                    BuildError::Failed { code, stderr }
                }
            }
            GitExecError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => BuildError::GitNotFound {
                    program: self.git_program.clone(),
                },
                std::io::ErrorKind::PermissionDenied => BuildError::PermissionDenied {
                    root: repo_root.to_path_buf(),
                },
                _ => BuildError::Io(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_git_order() {
        let out = b"M  src/app.py\n M lib/utils.py\nR  old.py -> new.py\n";
        let set = ChangeSet::from_porcelain("/repo", out);
        let paths: Vec<String> = set.entries().iter().map(|e| e.path().to_string()).collect();
        assert_eq!(paths, ["src/app.py", "lib/utils.py", "new.py"]);
        assert!(set.warnings().is_empty());
    }

    #[test]
    fn malformed_line_is_skipped_with_warning() {
        let out = b"M  a.rs\nR  broken.rs\n?? b.rs\n";
        let set = ChangeSet::from_porcelain("/repo", out);
        assert_eq!(set.len(), 2);
        assert_eq!(set.warnings().len(), 1);
        let warning = &set.warnings()[0];
        assert_eq!(warning.line_number, 2);
        assert!(matches!(warning.error, ParseError::MissingArrow { .. }));
        assert!(warning.to_string().contains("status line 2"));
    }

    #[test]
    fn interior_blank_line_warns_but_trailing_ones_do_not() {
        let set = ChangeSet::from_porcelain("/repo", b"M  a.rs\n\n M b.rs\n\n\n");
        assert_eq!(set.len(), 2);
        assert_eq!(set.warnings().len(), 1);
        assert_eq!(set.warnings()[0].error, ParseError::Empty);
    }

    #[test]
    fn duplicate_path_keeps_latest_status_in_first_position() {
        let set = ChangeSet::from_porcelain("/repo", b"M  a.rs\n?? b.rs\nA  a.rs\n");
        assert_eq!(set.len(), 2);
        assert_eq!(set.entries()[0].path().to_string(), "a.rs");
        assert_eq!(set.entries()[0].kind(), StatusKind::Added);
    }

    #[test]
    fn crlf_terminators_are_tolerated() {
        let set = ChangeSet::from_porcelain("/repo", b"M  a.rs\r\n?? b.rs\r\n");
        assert_eq!(set.entries()[1].path().to_string(), "b.rs");
    }

    #[test]
    fn absolute_path_joins_repo_root() {
        let set = ChangeSet::from_porcelain("/repo", b" M src/lib.rs\n");
        let entry = &set.entries()[0];
        assert_eq!(
            set.absolute_path(entry),
            Path::new("/repo").join("src").join("lib.rs")
        );
        assert_eq!(entry.path().to_string(), "src/lib.rs");
    }

    #[test]
    fn analysis_candidates_skip_deleted_and_excluded() {
        let set = ChangeSet::from_porcelain(
            "/repo",
            b" M src/main.rs\n D gone.rs\n?? logo.png\n?? Cargo.lock\n",
        );
        let filter = PathFilter::with_defaults::<&str>(&[]).unwrap();
        let picked: Vec<String> = set
            .analysis_candidates(&filter)
            .iter()
            .map(|e| e.path().to_string())
            .collect();
        assert_eq!(picked, ["src/main.rs"]);
    }

    #[tokio::test]
    async fn missing_root_is_reported() {
        let err = ChangeSetBuilder::default()
            .build(Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::RootMissing { .. }));
    }

    #[tokio::test]
    async fn missing_git_binary_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let builder = ChangeSetBuilder::new("relay-no-such-git", Duration::from_secs(5));
        let err = builder.build(tmp.path()).await.unwrap_err();
        assert!(matches!(err, BuildError::GitNotFound { .. }));
    }
}
