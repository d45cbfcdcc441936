use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use relay_core::config::{self, RelayConfig};
use relay_core::git_exec::find_repo_root;
use relay_core::session::SessionStore;

mod ask;
mod doctor;
mod inspect;

#[derive(Parser)]
#[command(name = "relay", version, about = "Hand working-tree changes to a coding agent")]
struct Cli {
    /// Path to relay.toml (default: <repo root>/relay.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List changed files in the current repository.
    Status {
        /// Output results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print a file the way it would be sent to the agent.
    Show {
        path: PathBuf,
        /// Size limit in bytes (default from config).
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Send changed files and a prompt to the agent.
    Ask(ask::AskArgs),
    /// Inspect or reset the stored agent conversation.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Show past exchanges for this repository.
    History {
        /// Delete this repository's history.
        #[arg(long)]
        clear: bool,
    },
    /// Check that git and the agent are available.
    Doctor {
        /// Output results as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Show the session for this repository.
    Show,
    /// List sessions for all repositories.
    List,
    /// Forget this repository's session.
    Clear,
}

/// The repository relay runs against and its effective config.
pub struct Workspace {
    pub root: PathBuf,
    pub config: RelayConfig,
}

impl Workspace {
    async fn open(config_path: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to read current directory")?;
        let root = find_repo_root(&cwd)
            .await
            .context("not inside a git repository")?;
        let config = match config_path {
            Some(path) => config::load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => config::load_project_config(&root).context("failed to load relay.toml")?,
        };
        Ok(Self { root, config })
    }

    /// The configured session store, or the process-wide default one.
    pub fn session_store(&self) -> Arc<SessionStore> {
        match &self.config.session.store_path {
            Some(_) => Arc::new(SessionStore::open(self.config.session.resolved_store_path())),
            None => SessionStore::global(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    relay_core::init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Doctor { json } => doctor::run(config_path, json).await,
        Command::Status { json } => {
            let ws = Workspace::open(config_path).await?;
            inspect::status(&ws, json).await
        }
        Command::Show { path, limit } => {
            let ws = Workspace::open(config_path).await?;
            inspect::show(&ws, &path, limit).await
        }
        Command::Ask(args) => {
            let ws = Workspace::open(config_path).await?;
            ask::run(&ws, args).await
        }
        Command::Session { action } => {
            let ws = Workspace::open(config_path).await?;
            inspect::session(&ws, action)
        }
        Command::History { clear } => {
            let ws = Workspace::open(config_path).await?;
            inspect::history(&ws, clear)
        }
    }
}
