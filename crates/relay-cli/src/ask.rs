use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use relay_core::agent::{AgentInvocation, AgentInvoker, AgentMode, AgentResult, SessionUpdate};
use relay_core::content::ContentLoader;
use relay_core::context::ContextBundle;
use relay_core::filter::PathFilter;
use relay_core::history::{ChatEntry, ChatHistory};
use relay_core::session::ProjectKey;
use relay_core::status::{ChangeEntry, ChangeSetBuilder, RepoPath};

use crate::Workspace;

#[derive(Args)]
pub struct AskArgs {
    /// Instructions for the agent.
    #[arg(short, long)]
    prompt: String,
    /// Let the agent modify files.
    #[arg(long)]
    edit: bool,
    /// Changed file to attach (repeatable, repository-relative).
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<String>,
    /// Attach every changed file that passes the exclusion filter.
    #[arg(long, conflicts_with = "files")]
    all: bool,
    /// Start a fresh conversation instead of resuming the stored one.
    #[arg(long)]
    new_session: bool,
    /// Output the result as JSON.
    #[arg(long)]
    json: bool,
}

pub async fn run(ws: &Workspace, args: AskArgs) -> Result<ExitCode> {
    let mode = if args.edit {
        AgentMode::Edit
    } else {
        AgentMode::Analysis
    };

    let context = if args.all || !args.files.is_empty() {
        let bundle = load_context(ws, &args).await?;
        let summary = bundle.summary();
        if !summary.is_complete() {
            eprintln!("{summary}");
        }
        bundle.render()
    } else {
        String::new()
    };

    let store = ws.session_store();
    let invoker = AgentInvoker::from_config(&ws.config.agent, Arc::clone(&store));

    // A fresh conversation replaces the stored one only once it succeeds.
    let token = if args.new_session {
        None
    } else {
        invoker.resume_token(&ws.root)
    };

    let invocation = AgentInvocation::new(&ws.root, mode, args.prompt.clone())
        .with_context(context)
        .with_token(token);

    let running = invoker.spawn(invocation).await.context("failed to start agent")?;
    let handle = running.cancel_handle();
    let wait = running.wait();
    tokio::pin!(wait);

    let finished = tokio::select! {
        result = &mut wait => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(result) => result,
        None => {
            eprintln!("interrupted, stopping agent");
            handle.cancel().await;
            wait.await
        }
    };
    let result = outcome.context("agent run failed")?;

    if result.succeeded() && args.new_session && result.session == SessionUpdate::Unchanged {
        store
            .clear(&ProjectKey::from_root(&ws.root))
            .context("failed to reset session")?;
    }

    if result.succeeded() {
        let history = ChatHistory::open_default(ws.config.session.history_limit);
        let entry = ChatEntry::new(mode.label(), args.prompt.as_str(), result.output_text.as_str());
        if let Err(e) = history.append(&ws.root, entry) {
            tracing::warn!(error = %e, "failed to record history");
        }
    }

    report(&result, args.json)
}

async fn load_context(ws: &Workspace, args: &AskArgs) -> Result<ContextBundle> {
    let set = ChangeSetBuilder::from_config(&ws.config.status)
        .build(&ws.root)
        .await
        .context("failed to read repository status")?;
    for warning in set.warnings() {
        eprintln!("warning: {warning}");
    }

    let selection: Vec<&ChangeEntry> = if args.all {
        let filter = PathFilter::from_config(&ws.config.filter)
            .context("invalid exclusion pattern")?;
        set.analysis_candidates(&filter)
    } else {
        args.files
            .iter()
            .map(|f| {
                set.get(&RepoPath::from(f.as_str()))
                    .with_context(|| format!("'{f}' has no changes in this repository"))
            })
            .collect::<Result<_>>()?
    };
    if selection.is_empty() {
        anyhow::bail!("no changed files to attach");
    }

    let loader = ContentLoader::from_config(&ws.config.content);
    Ok(ContextBundle::load(&set, &selection, &loader).await)
}

fn report(result: &AgentResult, json_output: bool) -> Result<ExitCode> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}", result.output_text.trim_end());
        if result.exit_status != 0 && !result.stderr.trim().is_empty() {
            eprintln!("{}", result.stderr.trim_end());
        }
        match &result.session {
            SessionUpdate::NotDurable(reason) => {
                eprintln!("warning: session was not saved: {reason}");
            }
            SessionUpdate::Saved | SessionUpdate::Unchanged => {}
        }
    }

    if result.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else if result.exit_status > 0 && result.exit_status < 256 {
        Ok(ExitCode::from(result.exit_status as u8))
    } else {
        Ok(ExitCode::from(1))
    }
}
