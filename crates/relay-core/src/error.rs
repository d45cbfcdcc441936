use thiserror::Error;

use crate::agent::AgentError;
use crate::chat::ServiceError;
use crate::config::ConfigError;
use crate::history::HistoryError;
use crate::persist::PersistError;
use crate::session::StoreError;
use crate::status::BuildError;

/// Top-level error type for the relay-core library.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration parse or validation error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// `git status` could not produce a change set.
    #[error("status error: {0}")]
    Build(#[from] BuildError),

    /// Session store serialization or durability failure.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    /// Agent launch, timeout, or cancellation.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Chat-completion service failure.
    #[error("chat service error: {0}")]
    Service(#[from] ServiceError),

    #[error("history error: {0}")]
    History(#[from] HistoryError),

    #[error("persist error: {0}")]
    Persist(#[from] PersistError),

    #[error("invalid exclude pattern: {0}")]
    Pattern(#[from] globset::Error),

    /// Wraps `std::io::Error`.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, RelayError>;
