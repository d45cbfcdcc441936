//! Project-local tool permissions for edit-mode runs.
//!
//! Read from `.claude/settings.json` in the project root:
//!
//! ```json
//! { "permissions": { "allow": ["Read", "Edit"], "deny": ["Read(./.env)"], "defaultMode": "acceptEdits" } }
//! ```
//!
//! Relay never writes this file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::error::AgentError;

pub const SETTINGS_RELATIVE_PATH: &str = ".claude/settings.json";

const DEFAULT_ALLOW: &[&str] = &["Read", "Edit", "MultiEdit", "Write", "Glob", "Grep", "LS"];

const DEFAULT_DENY: &[&str] = &[
    "Read(./.env)",
    "Read(./.env.*)",
    "Read(./secrets/**)",
    "Edit(./.env)",
    "Edit(./.env.*)",
    "Edit(./secrets/**)",
    "Write(./.env)",
    "Write(./.env.*)",
    "Write(./secrets/**)",
];

const DEFAULT_MODE: &str = "acceptEdits";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionConfig {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub default_mode: String,
    /// Where the values came from; `None` for built-in defaults.
    pub source: Option<PathBuf>,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            allow: DEFAULT_ALLOW.iter().map(|s| s.to_string()).collect(),
            deny: DEFAULT_DENY.iter().map(|s| s.to_string()).collect(),
            default_mode: DEFAULT_MODE.to_string(),
            source: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    permissions: Option<PermissionsSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionsSection {
    allow: Option<Vec<String>>,
    deny: Option<Vec<String>>,
    default_mode: Option<String>,
}

impl PermissionConfig {
    /// Load the project's settings, falling back to defaults when the file or
    /// any field is absent. A file that exists but does not parse is an
    /// error, so a broken deny list never silently widens permissions.
    pub fn load(project_root: &Path) -> Result<Self, AgentError> {
        let path = project_root.join(SETTINGS_RELATIVE_PATH);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(AgentError::InvalidPermissions {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        let settings: SettingsFile =
            serde_json::from_str(&data).map_err(|e| AgentError::InvalidPermissions {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let defaults = Self::default();
        let section = settings.permissions.unwrap_or_default();
        tracing::debug!(path = %path.display(), "loaded agent permission settings");
        Ok(Self {
            allow: section.allow.unwrap_or(defaults.allow),
            deny: section.deny.unwrap_or(defaults.deny),
            default_mode: section
                .default_mode
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(defaults.default_mode),
            source: Some(path),
        })
    }
}
