use std::path::{Path, PathBuf};

use thiserror::Error;

mod schema;

pub use schema::{AgentConfig, ContentConfig, FilterConfig, RelayConfig, SessionConfig, StatusConfig};

/// File name looked up in a project root when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "relay.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("config validation error: {message}")]
    Validation { message: String },
}

/// Load and validate a `RelayConfig` from a TOML file path.
///
/// Returns the default config if the file does not exist.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(RelayConfig::default());
    }

    let data = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_config(&data)
}

/// `relay.toml` in the given project root, or defaults.
pub fn load_project_config(project_root: &Path) -> Result<RelayConfig, ConfigError> {
    load_config(&project_root.join(CONFIG_FILE_NAME))
}

/// Parse and validate a `RelayConfig` from a TOML string.
pub fn parse_config(data: &str) -> Result<RelayConfig, ConfigError> {
    let config: RelayConfig = toml::from_str(data)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &RelayConfig) -> Result<(), ConfigError> {
    let checks: [(bool, &str); 7] = [
        (config.status.timeout_seconds == 0, "status.timeout_seconds must be > 0"),
        (config.status.git_program.trim().is_empty(), "status.git_program must not be empty"),
        (config.content.max_file_bytes == 0, "content.max_file_bytes must be > 0"),
        (config.content.parallel_loads == 0, "content.parallel_loads must be > 0"),
        (config.agent.program.trim().is_empty(), "agent.program must not be empty"),
        (config.agent.hard_timeout_seconds == 0, "agent.hard_timeout_seconds must be > 0"),
        (config.agent.idle_timeout_seconds == 0, "agent.idle_timeout_seconds must be > 0"),
    ];
    if let Some((_, message)) = checks.iter().find(|(failed, _)| *failed) {
        return Err(ConfigError::Validation {
            message: message.to_string(),
        });
    }

    if config.session.history_limit == 0 {
        return Err(ConfigError::Validation {
            message: "session.history_limit must be > 0".to_string(),
        });
    }

    for pattern in &config.filter.exclude {
        if let Err(e) = globset::Glob::new(pattern) {
            return Err(ConfigError::Validation {
                message: format!("filter.exclude pattern '{pattern}' is invalid: {e}"),
            });
        }
    }

    Ok(())
}

impl SessionConfig {
    /// Configured store location, else the per-user default.
    pub fn resolved_store_path(&self) -> PathBuf {
        match self.store_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(p) => PathBuf::from(p),
            None => crate::paths::session_store_path(),
        }
    }
}
