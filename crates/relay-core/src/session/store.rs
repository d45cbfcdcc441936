use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::persist::{AtomicWriter, PersistError};

const STORE_SCHEMA_VERSION: u32 = 1;

/// Stable identity of a project, derived from its repository root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectKey(String);

impl ProjectKey {
    /// Hash of the canonical root path. Two spellings of the same directory
    /// map to the same key when the path exists.
    pub fn from_root(root: &Path) -> Self {
        let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Continuation state for one project's agent conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub project_key: ProjectKey,
    pub project_root: PathBuf,
    /// Opaque to relay; only the agent interprets it.
    pub token: String,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(project_root: &Path, token: impl Into<String>) -> Self {
        Self {
            project_key: ProjectKey::from_root(project_root),
            project_root: project_root.to_path_buf(),
            token: token.into(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    project_root: PathBuf,
    token: String,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    schema_version: u32,
    sessions: BTreeMap<ProjectKey, StoredSession>,
}

impl StoreFile {
    fn apply(&mut self, key: &ProjectKey, change: &Option<SessionRecord>) {
        match change {
            Some(record) => {
                self.sessions.insert(
                    key.clone(),
                    StoredSession {
                        project_root: record.project_root.clone(),
                        token: record.token.clone(),
                        updated_at: record.updated_at,
                    },
                );
            }
            None => {
                self.sessions.remove(key);
            }
        }
    }

    fn record(&self, key: &ProjectKey) -> Option<SessionRecord> {
        self.sessions.get(key).map(|s| SessionRecord {
            project_key: key.clone(),
            project_root: s.project_root.clone(),
            token: s.token.clone(),
            updated_at: s.updated_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to serialize session store: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The change is visible to this process but did not reach disk.
    #[error("session change for project {key} is held in memory only: {source}")]
    NotDurable {
        key: ProjectKey,
        #[source]
        source: PersistError,
    },
}

/// Every store handle for the same file shares one lock, so read-modify-write
/// cycles are serialized process-wide.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let mut locks = lock(LOCKS.get_or_init(Default::default));
    Arc::clone(locks.entry(path.to_path_buf()).or_default())
}

/// Poisoning only means another writer panicked mid-cycle; the file itself is
/// still either old or new, so carry on.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Persistent map from [`ProjectKey`] to [`SessionRecord`], stored as one
/// JSON file replaced atomically on every change.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    writer: AtomicWriter,
    io_lock: Arc<Mutex<()>>,
    /// Changes whose write failed; `None` is a pending removal.
    unsaved: Mutex<HashMap<ProjectKey, Option<SessionRecord>>>,
}

impl SessionStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_writer(path, AtomicWriter::default())
    }

    pub(crate) fn with_writer(path: impl Into<PathBuf>, writer: AtomicWriter) -> Self {
        let path = path.into();
        Self {
            io_lock: path_lock(&path),
            path,
            writer,
            unsaved: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide store at the default per-user location, opened on
    /// first use.
    pub fn global() -> Arc<SessionStore> {
        static GLOBAL: OnceLock<Arc<SessionStore>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| {
            Arc::new(SessionStore::open(crate::paths::session_store_path()))
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &ProjectKey) -> Option<SessionRecord> {
        if let Some(pending) = lock(&self.unsaved).get(key) {
            return pending.clone();
        }
        // Writers only ever rename a complete file into place, so reading
        // outside the lock cannot observe a partial write.
        self.read_file().record(key)
    }

    /// All known records, newest first.
    pub fn list(&self) -> Vec<SessionRecord> {
        let mut file = self.read_file();
        for (key, change) in lock(&self.unsaved).iter() {
            file.apply(key, change);
        }
        let mut records: Vec<SessionRecord> =
            file.sessions.keys().filter_map(|k| file.record(k)).collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records
    }

    pub fn put(&self, record: SessionRecord) -> Result<(), StoreError> {
        let key = record.project_key.clone();
        self.commit(key, Some(record))
    }

    pub fn clear(&self, key: &ProjectKey) -> Result<(), StoreError> {
        self.commit(key.clone(), None)
    }

    fn commit(&self, key: ProjectKey, change: Option<SessionRecord>) -> Result<(), StoreError> {
        let _guard = lock(&self.io_lock);

        // Re-read inside the lock so records written by other handles survive.
        let mut file = self.read_file();
        let mut unsaved = lock(&self.unsaved);
        for (pending_key, pending) in unsaved.iter() {
            file.apply(pending_key, pending);
        }
        file.apply(&key, &change);
        file.schema_version = STORE_SCHEMA_VERSION;

        let json = serde_json::to_vec_pretty(&file)?;
        match self.writer.write(&self.path, &json) {
            Ok(()) => {
                unsaved.clear();
                debug!(project = %key, store = %self.path.display(), "session store updated");
                Ok(())
            }
            Err(source) => {
                warn!(project = %key, error = %source, "session store write failed, keeping change in memory");
                unsaved.insert(key.clone(), change);
                Err(StoreError::NotDurable { key, source })
            }
        }
    }

    /// Missing or unreadable files read as empty. A corrupt file is copied
    /// aside so the next write does not destroy the evidence.
    fn read_file(&self) -> StoreFile {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoreFile::default(),
            Err(e) => {
                warn!(store = %self.path.display(), error = %e, "cannot read session store, treating as empty");
                return StoreFile::default();
            }
        };

        match serde_json::from_slice::<StoreFile>(&data) {
            Ok(file) => file,
            Err(e) => {
                let backup = self.path.with_extension("json.corrupt");
                warn!(
                    store = %self.path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "session store is corrupt, treating as empty"
                );
                if !backup.exists() {
                    if let Err(e) = std::fs::copy(&self.path, &backup) {
                        info!(error = %e, "could not back up corrupt session store");
                    }
                }
                StoreFile::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> SessionStore {
        SessionStore::open(dir.join("sessions.json"))
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        assert!(store.get(&ProjectKey::from_root(tmp.path())).is_none());
        assert!(store.list().is_empty());
    }

    #[test]
    fn put_then_get_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let record = SessionRecord::new(tmp.path(), "sess-1");

        store.put(record.clone()).unwrap();

        assert_eq!(store.get(&record.project_key), Some(record.clone()));
        // A fresh handle sees the same data on disk.
        assert_eq!(store_in(tmp.path()).get(&record.project_key), Some(record));
    }

    #[test]
    fn repeated_get_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let record = SessionRecord::new(tmp.path(), "sess-1");
        store.put(record.clone()).unwrap();

        let first = store.get(&record.project_key);
        let second = store.get(&record.project_key);
        assert_eq!(first, second);
    }

    #[test]
    fn clear_removes_only_that_project() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        let store = store_in(tmp.path());
        store.put(SessionRecord::new(&a, "ta")).unwrap();
        store.put(SessionRecord::new(&b, "tb")).unwrap();

        store.clear(&ProjectKey::from_root(&a)).unwrap();

        assert!(store.get(&ProjectKey::from_root(&a)).is_none());
        assert_eq!(store.get(&ProjectKey::from_root(&b)).unwrap().token, "tb");
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_is_backed_up() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.json");
        std::fs::write(&path, b"{\"schema_version\": 1, \"sessions\": {").unwrap();
        let store = SessionStore::open(&path);

        assert!(store.list().is_empty());
        assert!(tmp.path().join("sessions.json.corrupt").exists());

        store.put(SessionRecord::new(tmp.path(), "fresh")).unwrap();
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn failed_rename_leaves_file_untouched_and_keeps_change_in_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.json");
        let a = tmp.path().join("a");
        std::fs::create_dir_all(&a).unwrap();

        SessionStore::open(&path)
            .put(SessionRecord::new(&a, "durable"))
            .unwrap();
        let before = std::fs::read(&path).unwrap();

        let failing = SessionStore::with_writer(
            &path,
            AtomicWriter::with_rename(|_, _| Err(std::io::Error::other("simulated crash"))),
        );
        let err = failing
            .put(SessionRecord::new(&a, "volatile"))
            .unwrap_err();

        assert!(matches!(err, StoreError::NotDurable { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), before);
        // The failing handle still serves the newer token to this process.
        assert_eq!(
            failing.get(&ProjectKey::from_root(&a)).unwrap().token,
            "volatile"
        );
        assert_eq!(
            SessionStore::open(&path)
                .get(&ProjectKey::from_root(&a))
                .unwrap()
                .token,
            "durable"
        );
    }

    #[test]
    fn concurrent_puts_from_two_handles_keep_both_projects() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        let first = Arc::new(store_in(tmp.path()));
        let second = Arc::new(store_in(tmp.path()));

        let writers: Vec<_> = [(first, a.clone(), "a"), (second, b.clone(), "b")]
            .into_iter()
            .map(|(store, root, prefix)| {
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store
                            .put(SessionRecord::new(&root, format!("{prefix}-{i}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let fresh = store_in(tmp.path());
        assert_eq!(fresh.get(&ProjectKey::from_root(&a)).unwrap().token, "a-49");
        assert_eq!(fresh.get(&ProjectKey::from_root(&b)).unwrap().token, "b-49");
        assert_eq!(fresh.list().len(), 2);
    }

    #[test]
    fn project_key_is_stable_for_equivalent_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let direct = ProjectKey::from_root(tmp.path());
        let dotted = ProjectKey::from_root(&tmp.path().join("."));
        assert_eq!(direct, dotted);
        assert_eq!(direct.as_str().len(), 16);
    }
}
