//! Crash-safe file replacement.
//!
//! New contents go to a uniquely named sibling, are flushed to disk, and
//! then renamed over the target. Readers see either the old file or the
//! new one, never a partial write.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Retries after the first failed attempt.
const WRITE_MAX_RETRIES: u32 = 3;

/// Base delay between retries (doubles each attempt).
const WRITE_RETRY_BASE: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
#[error("failed to write '{}' after {attempts} attempt(s): {source}", path.display())]
pub struct PersistError {
    pub path: PathBuf,
    pub attempts: u32,
    #[source]
    pub source: std::io::Error,
}

type RenameFn = fn(&Path, &Path) -> std::io::Result<()>;

#[derive(Debug, Clone)]
pub struct AtomicWriter {
    rename: RenameFn,
    max_retries: u32,
    retry_base: Duration,
}

impl Default for AtomicWriter {
    fn default() -> Self {
        Self {
            rename: rename_file,
            max_retries: WRITE_MAX_RETRIES,
            retry_base: WRITE_RETRY_BASE,
        }
    }
}

fn rename_file(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::rename(from, to)
}

impl AtomicWriter {
    /// Swap the final rename step, so tests can simulate a crash there.
    #[cfg(test)]
    pub(crate) fn with_rename(rename: RenameFn) -> Self {
        Self {
            rename,
            max_retries: 1,
            retry_base: Duration::from_millis(1),
        }
    }

    /// Replace `path` with `contents`, retrying with exponential backoff.
    pub fn write(&self, path: &Path, contents: &[u8]) -> Result<(), PersistError> {
        let mut delay = self.retry_base;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.write_once(path, contents) {
                Ok(()) => return Ok(()),
                Err(e) if attempt <= self.max_retries => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        error = %e,
                        "atomic write failed, retrying in {}ms",
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                Err(source) => {
                    return Err(PersistError {
                        path: path.to_path_buf(),
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    fn write_once(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data".to_string());
        let tmp = parent.join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));

        let result = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
            drop(file);
            (self.rename)(&tmp, path)
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        sync_dir(parent);
        debug!(path = %path.display(), bytes = contents.len(), "atomic write committed");
        Ok(())
    }
}

/// Flush the directory entry for the rename. Best effort; unsupported on
/// some platforms.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}
