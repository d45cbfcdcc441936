//! Read-mostly commands: status, show, session, history.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use relay_core::content::{ContentLoader, LoadOutcome};
use relay_core::history::ChatHistory;
use relay_core::session::{ProjectKey, SessionRecord};
use relay_core::status::ChangeSetBuilder;

use crate::{SessionAction, Workspace};

pub async fn status(ws: &Workspace, json_output: bool) -> Result<ExitCode> {
    let builder = ChangeSetBuilder::from_config(&ws.config.status);
    let set = builder
        .build(&ws.root)
        .await
        .context("failed to read repository status")?;

    if json_output {
        let warnings: Vec<String> = set.warnings().iter().map(ToString::to_string).collect();
        let doc = serde_json::json!({
            "repo_root": set.repo_root(),
            "entries": set.entries(),
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(ExitCode::SUCCESS);
    }

    for warning in set.warnings() {
        eprintln!("warning: {warning}");
    }
    if set.is_empty() {
        println!("No changes.");
        return Ok(ExitCode::SUCCESS);
    }
    for entry in set.entries() {
        match entry.renamed_from() {
            Some(from) => println!("{} {} -> {}  ({})", entry.code(), from, entry.path(), entry.kind()),
            None => println!("{} {}  ({})", entry.code(), entry.path(), entry.kind()),
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn show(ws: &Workspace, path: &Path, limit: Option<u64>) -> Result<ExitCode> {
    let limit = limit.unwrap_or(ws.config.content.max_file_bytes);
    let file = ContentLoader::new(limit, 1).load(path.to_path_buf()).await;

    match file.outcome() {
        LoadOutcome::Failed(kind) => {
            eprintln!("{}: {kind}", path.display());
            Ok(ExitCode::from(1))
        }
        LoadOutcome::Complete(text) | LoadOutcome::Truncated(text) => {
            print!("{text}");
            let encoding = file.encoding().map(|e| e.label()).unwrap_or("unknown");
            if file.is_truncated() {
                eprintln!(
                    "\n[{}: {encoding}, showing {limit} of {} bytes]",
                    path.display(),
                    file.size_bytes()
                );
            } else {
                eprintln!("\n[{}: {encoding}, {} bytes]", path.display(), file.size_bytes());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_record(record: &SessionRecord) {
    println!("Project: {}", record.project_root.display());
    println!("Key:     {}", record.project_key);
    println!("Session: {}", record.token);
    println!("Updated: {}", record.updated_at.to_rfc3339());
}

pub fn session(ws: &Workspace, action: SessionAction) -> Result<ExitCode> {
    let store = ws.session_store();
    let key = ProjectKey::from_root(&ws.root);

    match action {
        SessionAction::Show => match store.get(&key) {
            Some(record) => print_record(&record),
            None => println!("No session for {}", ws.root.display()),
        },
        SessionAction::List => {
            let records = store.list();
            if records.is_empty() {
                println!("No sessions.");
            }
            for (i, record) in records.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                print_record(record);
            }
        }
        SessionAction::Clear => {
            store.clear(&key).context("failed to clear session")?;
            println!("Session cleared for {}", ws.root.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn history(ws: &Workspace, clear: bool) -> Result<ExitCode> {
    let history = ChatHistory::open_default(ws.config.session.history_limit);

    if clear {
        history.clear(&ws.root).context("failed to clear history")?;
        println!("History cleared for {}", ws.root.display());
        return Ok(ExitCode::SUCCESS);
    }

    let entries = history.list(&ws.root);
    if entries.is_empty() {
        println!("No history.");
    }
    for entry in entries.iter().rev() {
        println!(
            "{}  {}  {:<8}  {}",
            entry.id,
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.kind,
            entry.preview(60)
        );
    }
    Ok(ExitCode::SUCCESS)
}
