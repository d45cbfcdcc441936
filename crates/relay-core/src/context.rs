//! Aggregation of loaded files into the context sent to an agent.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use crate::agent::AgentMode;
use crate::content::{ContentLoader, LoadedFile, LoadErrorKind};
use crate::status::{ChangeEntry, ChangeSet, RepoPath, StatusKind};

/// One selected file and what loading it produced.
#[derive(Debug, Clone)]
pub struct ContextFile {
    /// Repository-relative path as shown to the operator.
    pub display_path: String,
    pub status: Option<StatusKind>,
    pub file: LoadedFile,
}

/// Selected files in the operator's order, ready to render.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    files: Vec<ContextFile>,
}

impl ContextBundle {
    pub fn new(files: Vec<ContextFile>) -> Self {
        Self { files }
    }

    /// Pair each selected entry with its loaded content. `loaded` may arrive
    /// in any order; the bundle follows `selection`, one file per entry. An
    /// entry with no result in `loaded` is reported as unreadable.
    pub fn assemble(change_set: &ChangeSet, selection: &[&ChangeEntry], loaded: Vec<LoadedFile>) -> Self {
        let by_path: HashMap<PathBuf, LoadedFile> = loaded
            .into_iter()
            .map(|file| (file.path().to_path_buf(), file))
            .collect();

        let files = selection
            .iter()
            .map(|entry| {
                let abs = change_set.absolute_path(entry);
                let file = match by_path.get(&abs) {
                    Some(file) => file.clone(),
                    None => {
                        warn!(path = %entry.path(), "no load result for selected file");
                        LoadedFile::failed(
                            &abs,
                            0,
                            LoadErrorKind::Unreadable {
                                reason: "no load result".to_string(),
                            },
                        )
                    }
                };
                ContextFile {
                    display_path: entry.path().to_string(),
                    status: Some(entry.kind()),
                    file,
                }
            })
            .collect();
        Self { files }
    }

    /// Load every selected entry through `loader` and assemble the result.
    pub async fn load(change_set: &ChangeSet, selection: &[&ChangeEntry], loader: &ContentLoader) -> Self {
        let paths = selection
            .iter()
            .map(|entry| change_set.absolute_path(entry))
            .collect();
        let loaded = loader.load_many(paths).await;
        Self::assemble(change_set, selection, loaded)
    }

    /// Like [`ContextBundle::load`], but by path. Paths that are not in
    /// `change_set` stay in the bundle as failures.
    pub async fn load_paths(change_set: &ChangeSet, selection: &[RepoPath], loader: &ContentLoader) -> Self {
        let entries: Vec<&ChangeEntry> = selection.iter().filter_map(|p| change_set.get(p)).collect();
        let mut loaded = Self::load(change_set, &entries, loader).await.files.into_iter();

        let files = selection
            .iter()
            .filter_map(|path| match change_set.get(path) {
                Some(_) => loaded.next(),
                None => Some(ContextFile {
                    display_path: path.to_string(),
                    status: None,
                    file: LoadedFile::failed(
                        &change_set.repo_root().join(path.to_path_buf()),
                        0,
                        LoadErrorKind::Unreadable {
                            reason: "no longer in the change set".to_string(),
                        },
                    ),
                }),
            })
            .collect();
        Self { files }
    }

    pub fn files(&self) -> &[ContextFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Text block for the agent: one header per file, failures noted inline.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, item) in self.files.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("=== File {}: {}", i + 1, item.display_path));
            if let Some(status) = item.status {
                out.push_str(&format!(" ({})", status.label()));
            }
            out.push_str(" ===\n");

            match item.file.content() {
                Some(text) => {
                    out.push_str(text);
                    if !text.ends_with('\n') {
                        out.push('\n');
                    }
                    if item.file.is_truncated() {
                        out.push_str(&format!(
                            "... (truncated: file is {} bytes) ...\n",
                            item.file.size_bytes()
                        ));
                    }
                }
                None => {
                    let reason = item
                        .file
                        .error_kind()
                        .map(LoadErrorKind::to_string)
                        .unwrap_or_default();
                    out.push_str(&format!("[not loaded: {reason}]\n"));
                }
            }
        }
        out
    }

    pub fn summary(&self) -> LoadSummary {
        let mut summary = LoadSummary {
            requested: self.files.len(),
            ..Default::default()
        };
        for item in &self.files {
            match item.file.error_kind() {
                None => {
                    summary.loaded += 1;
                    if item.file.is_truncated() {
                        summary.truncated.push(item.display_path.clone());
                    }
                }
                Some(kind) => summary.failures.push(LoadFailure {
                    path: item.display_path.clone(),
                    reason: kind.to_string(),
                }),
            }
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub path: String,
    pub reason: String,
}

/// How a batch of loads went, for the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub requested: usize,
    pub loaded: usize,
    pub truncated: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl LoadSummary {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.truncated.is_empty()
    }
}

impl std::fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} files loaded", self.loaded, self.requested)?;
        if !self.truncated.is_empty() {
            write!(f, " ({} truncated)", self.truncated.len())?;
        }
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.path, failure.reason)?;
        }
        Ok(())
    }
}

/// Wrap operator instructions and rendered file context into the request
/// sent to the agent. Without context the instructions go out as-is, which
/// suits follow-ups in a resumed conversation.
pub fn build_agent_prompt(mode: AgentMode, instructions: &str, context: &str) -> String {
    let instructions = instructions.trim();
    if context.trim().is_empty() {
        return instructions.to_string();
    }

    let mut lines: Vec<&str> = Vec::new();
    let heading = match mode {
        AgentMode::Analysis => "# Change Analysis Request",
        AgentMode::Edit => "# Change Review and Fix Request",
    };
    lines.extend([heading, "", "I'm working in a git repository and need help with these changed files.", ""]);

    if !instructions.is_empty() {
        lines.extend(["## Instructions", instructions, ""]);
    }

    lines.extend(["## Files", "", context.trim_end(), ""]);

    match mode {
        AgentMode::Analysis => lines.extend([
            "## Please provide",
            "1. An analysis of the changes and potential issues",
            "2. Specific recommendations for improvements",
            "",
            "Do not modify any files.",
        ]),
        AgentMode::Edit => lines.extend([
            "## Please",
            "1. Analyse the changes and identify issues",
            "2. Fix what you find directly with the available edit tools",
            "3. Summarise what you changed",
        ]),
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn change_set(root: &Path) -> ChangeSet {
        ChangeSet::from_porcelain(root, b"M  src/app.py\n M lib/utils.py\nR  old.py -> new.py\n")
    }

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[tokio::test]
    async fn bundle_follows_selection_order() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "src/app.py", "print('app')\n");
        write(tmp.path(), "new.py", "print('new')\n");
        let set = change_set(tmp.path());
        let selection = [&set.entries()[2], &set.entries()[0]];

        let bundle = ContextBundle::load(&set, &selection, &ContentLoader::default()).await;

        let order: Vec<&str> = bundle.files().iter().map(|f| f.display_path.as_str()).collect();
        assert_eq!(order, ["new.py", "src/app.py"]);
        let text = bundle.render();
        let first = text.find("=== File 1: new.py (renamed) ===").unwrap();
        let second = text.find("=== File 2: src/app.py (modified) ===").unwrap();
        assert!(first < second);
    }

    #[test]
    fn assemble_reorders_results_that_arrive_out_of_order() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "src/app.py", "a\n");
        write(tmp.path(), "lib/utils.py", "b\n");
        let set = change_set(tmp.path());
        let selection = [&set.entries()[0], &set.entries()[1]];
        let loaded = vec![
            crate::content::load(&tmp.path().join("lib/utils.py"), 100),
            crate::content::load(&tmp.path().join("src/app.py"), 100),
        ];

        let bundle = ContextBundle::assemble(&set, &selection, loaded);
        assert_eq!(bundle.files()[0].display_path, "src/app.py");
        assert_eq!(bundle.files()[1].display_path, "lib/utils.py");
    }

    #[test]
    fn assemble_keeps_entries_without_a_load_result() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "src/app.py", "a\n");
        let set = change_set(tmp.path());
        let selection = [&set.entries()[0], &set.entries()[1], &set.entries()[0]];
        let loaded = vec![crate::content::load(&tmp.path().join("src/app.py"), 100)];

        let bundle = ContextBundle::assemble(&set, &selection, loaded);

        let order: Vec<&str> = bundle.files().iter().map(|f| f.display_path.as_str()).collect();
        assert_eq!(order, ["src/app.py", "lib/utils.py", "src/app.py"]);
        assert_eq!(bundle.files()[2].file.content(), Some("a\n"));
        assert_eq!(
            bundle.files()[1].file.error_kind(),
            Some(&LoadErrorKind::Unreadable {
                reason: "no load result".to_string()
            })
        );
        assert_eq!(bundle.summary().failures.len(), 1);
    }

    #[test]
    fn failed_result_pairs_with_its_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let set = change_set(tmp.path());
        let selection = [&set.entries()[1]];
        let failed = LoadedFile::failed(
            &tmp.path().join("lib/utils.py"),
            0,
            LoadErrorKind::Unreadable {
                reason: "task panicked".to_string(),
            },
        );

        let bundle = ContextBundle::assemble(&set, &selection, vec![failed]);
        assert!(bundle.render().contains("[not loaded: cannot read: task panicked]"));
    }

    #[tokio::test]
    async fn load_paths_keeps_unknown_paths_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "src/app.py", "print('app')\n");
        let set = change_set(tmp.path());
        let selection = [RepoPath::from("stale.py"), RepoPath::from("src/app.py")];

        let bundle = ContextBundle::load_paths(&set, &selection, &ContentLoader::default()).await;

        assert_eq!(bundle.files().len(), 2);
        assert_eq!(bundle.files()[0].display_path, "stale.py");
        assert!(bundle.files()[0].status.is_none());
        assert!(bundle.render().contains("=== File 1: stale.py ===\n[not loaded: cannot read: no longer in the change set]"));
        assert_eq!(bundle.files()[1].status, Some(StatusKind::Modified));
    }

    #[tokio::test]
    async fn partial_failures_are_kept_and_summarised() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "src/app.py", "print('app')\n");
        let set = change_set(tmp.path());
        let selection: Vec<&ChangeEntry> = set.entries().iter().collect();

        let bundle = ContextBundle::load(&set, &selection, &ContentLoader::default()).await;
        let summary = bundle.summary();

        assert_eq!(summary.requested, 3);
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.failures.len(), 2);
        assert!(summary.to_string().starts_with("1 of 3 files loaded"));
        assert!(bundle.render().contains("[not loaded: file not found"));
    }

    #[tokio::test]
    async fn truncated_file_is_marked() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "src/app.py", &"x".repeat(100));
        let set = change_set(tmp.path());
        let selection = [&set.entries()[0]];

        let bundle = ContextBundle::load(&set, &selection, &ContentLoader::new(10, 2)).await;
        assert_eq!(bundle.summary().truncated, ["src/app.py"]);
        assert!(bundle.render().contains("truncated: file is 100 bytes"));
    }

    #[test]
    fn prompt_without_context_is_bare_instructions() {
        assert_eq!(build_agent_prompt(AgentMode::Analysis, "  and now? ", ""), "and now?");
    }

    #[test]
    fn prompt_wraps_context_by_mode() {
        let analysis = build_agent_prompt(AgentMode::Analysis, "check errors", "=== File 1: a ===\nx\n");
        assert!(analysis.contains("## Instructions\ncheck errors"));
        assert!(analysis.contains("=== File 1: a ==="));
        assert!(analysis.contains("Do not modify any files."));

        let edit = build_agent_prompt(AgentMode::Edit, "", "=== File 1: a ===\nx\n");
        assert!(!edit.contains("## Instructions"));
        assert!(edit.contains("Fix what you find"));
    }
}
