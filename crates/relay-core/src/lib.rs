pub mod agent;
pub mod chat;
pub mod config;
pub mod content;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod git_exec;
pub mod history;
pub mod paths;
pub mod persist;
pub mod session;
pub mod status;
pub mod supervisor;

pub use error::{RelayError, Result};

/// Environment variable holding the `tracing` filter directive.
pub const LOG_ENV: &str = "RELAY_LOG";

/// Install a stderr `tracing` subscriber filtered by `RELAY_LOG`
/// (default `warn`). Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
