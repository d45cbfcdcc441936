//! Well-known per-user locations.

use std::path::PathBuf;

/// Overrides the per-user data directory when set.
pub const DATA_DIR_ENV: &str = "RELAY_HOME";

/// Root of relay's per-user state: `$RELAY_HOME`, else `~/.relay`.
///
/// Falls back to the system temp directory when no home directory can be
/// determined.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".relay"),
        None => {
            tracing::warn!("no home directory found, keeping relay state in temp dir");
            std::env::temp_dir().join("relay")
        }
    }
}

pub fn session_store_path() -> PathBuf {
    data_dir().join("sessions.json")
}

pub fn history_dir() -> PathBuf {
    data_dir().join("history")
}
