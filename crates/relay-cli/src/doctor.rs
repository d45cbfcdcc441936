use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use relay_core::agent::{DoctorReport, ProbeStatus};
use relay_core::config::{self, RelayConfig};
use relay_core::git_exec::find_repo_root;

pub async fn run(config_path: Option<&Path>, json_output: bool) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let root = find_repo_root(&cwd).await;

    // Doctor still reports when config is missing or broken.
    let config = match (config_path, &root) {
        (Some(path), _) => config::load_config(path),
        (None, Some(root)) => config::load_project_config(root),
        (None, None) => Ok(RelayConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("warning: {e}; using defaults");
            RelayConfig::default()
        }
    };

    let report = DoctorReport::run(
        &config.status.git_program,
        &config.agent.program,
        Some(root.as_deref().unwrap_or(&cwd)),
    );

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_human_report(&report);
    }

    if report.overall_ready {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn print_human_report(report: &DoctorReport) {
    println!("Relay Doctor Report");
    println!("===================");
    println!();

    println!("Git:");
    if report.git.git_available {
        let ver = report.git.git_version.as_deref().unwrap_or("unknown");
        println!("  \u{2713} git available (version {ver})");
    } else {
        println!("  \u{2717} git not available");
    }
    match (&report.git.in_git_repo, &report.git.repo_root) {
        (true, Some(root)) => println!("  \u{2713} inside git repository ({root})"),
        (true, None) => println!("  \u{2713} inside git repository"),
        (false, _) => println!("  \u{2717} not inside a git repository"),
    }
    println!();

    println!("Agent:");
    let agent = &report.agent;
    let icon = match agent.status {
        ProbeStatus::Ready => "\u{2713}",
        ProbeStatus::Broken | ProbeStatus::Missing => "\u{2717}",
    };
    let version_part = agent
        .version
        .as_ref()
        .map(|v| format!(" ({v})"))
        .unwrap_or_default();
    println!("  {icon} {}: {}{version_part}", agent.program, agent.status.label());
    if let Some(path) = &agent.binary_path {
        println!("    {}", path.display());
    }
    if let Some(message) = &agent.message {
        println!("    {message}");
    }
    println!();

    if report.overall_ready {
        println!("Overall: READY");
    } else {
        let reasons = report.not_ready_reasons();
        let reason_text = if reasons.is_empty() {
            String::new()
        } else {
            format!(" ({})", reasons.join("; "))
        };
        println!("Overall: NOT READY{reason_text}");
    }
}
