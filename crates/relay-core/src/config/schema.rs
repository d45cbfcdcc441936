use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `relay.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RelayConfig {
    pub status: StatusConfig,
    pub content: ContentConfig,
    pub agent: AgentConfig,
    pub session: SessionConfig,
    pub filter: FilterConfig,
}

/// How `git status` is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StatusConfig {
    pub timeout_seconds: u64,
    pub git_program: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            git_program: "git".to_string(),
        }
    }
}

/// File content loading limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ContentConfig {
    pub max_file_bytes: u64,
    pub parallel_loads: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: crate::content::DEFAULT_MAX_FILE_BYTES,
            parallel_loads: 8,
        }
    }
}

/// External agent binary and its process limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AgentConfig {
    pub program: String,
    pub idle_timeout_seconds: u64,
    pub hard_timeout_seconds: u64,
    pub output_buffer_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            idle_timeout_seconds: 300,
            hard_timeout_seconds: 1800,
            output_buffer_bytes: 10 * 1024 * 1024, // 10 MiB
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionConfig {
    /// Overrides the per-user session file location.
    pub store_path: Option<String>,
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            history_limit: 50,
        }
    }
}

/// Exclusion patterns applied when picking analysis candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FilterConfig {
    pub use_default_excludes: bool,
    pub exclude: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            use_default_excludes: true,
            exclude: Vec::new(),
        }
    }
}
