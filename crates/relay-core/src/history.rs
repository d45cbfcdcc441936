//! Per-project log of prompt/response exchanges.
//!
//! Each project gets one JSON file under the history directory, replaced
//! atomically on every change and capped at a fixed number of entries.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::chat::TokenUsage;
use crate::persist::{AtomicWriter, PersistError};
use crate::session::ProjectKey;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to serialize chat history: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// What produced the response, e.g. `analysis`, `edit`, or `chat`.
    pub kind: String,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl ChatEntry {
    pub fn new(kind: impl Into<String>, prompt: impl Into<String>, response: impl Into<String>) -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self {
            id,
            timestamp: Utc::now(),
            kind: kind.into(),
            prompt: prompt.into(),
            response: response.into(),
            model: None,
            usage: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, usage: TokenUsage) -> Self {
        self.model = Some(model.into());
        self.usage = Some(usage);
        self
    }

    /// First line of the prompt, cut to `max_chars`.
    pub fn preview(&self, max_chars: usize) -> String {
        let flat = self.prompt.replace('\n', " ");
        let flat = flat.trim();
        if flat.chars().count() > max_chars {
            let cut: String = flat.chars().take(max_chars).collect();
            format!("{cut}...")
        } else {
            flat.to_string()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    project_root: PathBuf,
    entries: Vec<ChatEntry>,
}

#[derive(Debug)]
pub struct ChatHistory {
    dir: PathBuf,
    limit: usize,
    writer: AtomicWriter,
    lock: Mutex<()>,
}

impl ChatHistory {
    pub fn new(dir: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            dir: dir.into(),
            limit: limit.max(1),
            writer: AtomicWriter::default(),
            lock: Mutex::new(()),
        }
    }

    /// History under the per-user data directory.
    pub fn open_default(limit: usize) -> Self {
        Self::new(crate::paths::history_dir(), limit)
    }

    fn file_for(&self, project_root: &Path) -> PathBuf {
        self.dir
            .join(format!("history_{}.json", ProjectKey::from_root(project_root)))
    }

    /// Entries oldest first.
    pub fn list(&self, project_root: &Path) -> Vec<ChatEntry> {
        self.read(project_root).entries
    }

    pub fn append(&self, project_root: &Path, entry: ChatEntry) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = self.read(project_root);
        file.project_root = project_root.to_path_buf();
        file.entries.push(entry);
        if file.entries.len() > self.limit {
            let excess = file.entries.len() - self.limit;
            file.entries.drain(..excess);
        }
        self.write(project_root, &file)
    }

    pub fn clear(&self, project_root: &Path) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let file = HistoryFile {
            project_root: project_root.to_path_buf(),
            entries: Vec::new(),
        };
        self.write(project_root, &file)
    }

    fn write(&self, project_root: &Path, file: &HistoryFile) -> Result<(), HistoryError> {
        let json = serde_json::to_vec_pretty(file)?;
        self.writer.write(&self.file_for(project_root), &json)?;
        Ok(())
    }

    fn read(&self, project_root: &Path) -> HistoryFile {
        let path = self.file_for(project_root);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HistoryFile::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read chat history");
                return HistoryFile::default();
            }
        };
        serde_json::from_slice(&data).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "chat history is corrupt, starting fresh");
            HistoryFile::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_list_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let history = ChatHistory::new(tmp.path().join("history"), 10);
        history.append(tmp.path(), ChatEntry::new("analysis", "first", "a")).unwrap();
        history.append(tmp.path(), ChatEntry::new("edit", "second", "b")).unwrap();

        let entries = history.list(tmp.path());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].prompt, "first");
        assert_eq!(entries[1].kind, "edit");
    }

    #[test]
    fn oldest_entries_drop_past_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let history = ChatHistory::new(tmp.path(), 3);
        for i in 0..5 {
            history
                .append(tmp.path(), ChatEntry::new("chat", format!("p{i}"), "r"))
                .unwrap();
        }
        let prompts: Vec<String> = history.list(tmp.path()).into_iter().map(|e| e.prompt).collect();
        assert_eq!(prompts, ["p2", "p3", "p4"]);
    }

    #[test]
    fn projects_are_kept_apart_and_clear_is_scoped() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        let history = ChatHistory::new(tmp.path().join("h"), 10);
        history.append(&a, ChatEntry::new("chat", "for a", "r")).unwrap();
        history.append(&b, ChatEntry::new("chat", "for b", "r")).unwrap();

        history.clear(&a).unwrap();

        assert!(history.list(&a).is_empty());
        assert_eq!(history.list(&b).len(), 1);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let history = ChatHistory::new(tmp.path().join("h"), 10);
        std::fs::create_dir_all(tmp.path().join("h")).unwrap();
        std::fs::write(history.file_for(tmp.path()), b"[[[").unwrap();
        assert!(history.list(tmp.path()).is_empty());
    }

    #[test]
    fn chat_model_and_usage_are_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let history = ChatHistory::new(tmp.path().join("h"), 10);
        let usage = TokenUsage {
            input_tokens: 3,
            output_tokens: 5,
        };
        history
            .append(
                tmp.path(),
                ChatEntry::new("chat", "q", "a").with_model("model-x", usage),
            )
            .unwrap();
        history.append(tmp.path(), ChatEntry::new("analysis", "p", "r")).unwrap();

        let entries = history.list(tmp.path());
        assert_eq!(entries[0].model.as_deref(), Some("model-x"));
        assert_eq!(entries[0].usage, Some(usage));
        assert_eq!(entries[1].model, None);
        assert_eq!(entries[1].usage, None);
    }

    #[test]
    fn preview_flattens_and_cuts() {
        let entry = ChatEntry::new("chat", "line one\nline two is long", "");
        assert_eq!(entry.preview(12), "line one lin...");
        assert_eq!(entry.preview(100), "line one line two is long");
    }
}
