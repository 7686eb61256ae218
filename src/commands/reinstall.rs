// src/commands/reinstall.rs
//! Resumable reinstall batch and legacy install-log import

use super::progress::BatchProgress;
use crate::action::BrewReinstall;
use crate::catalog::{BrewCatalog, Selection};
use crate::checkpoint::{LoadOutcome, PackageStatus};
use crate::cli::ReinstallArgs;
use crate::intercept::import_install_log;
use crate::orchestrator::{ReinstallOrchestrator, RunContext, RunReport};
use crate::progress::{LogProgress, ProgressTracker};
use anyhow::{Context, Result};
use std::fs;
use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Reinstall the selected casks, resuming from the checkpoint in the workdir
pub fn cmd_reinstall(args: &ReinstallArgs) -> Result<()> {
    if let Some(log) = &args.import_log {
        return cmd_import_log(&args.workdir, log);
    }

    let selection = Selection::from_sources(&args.casks, args.cask_list.as_deref())?;
    let ctx = RunContext::open(&args.workdir)
        .with_context(|| format!("Cannot use working directory {}", args.workdir.display()))?;

    let action = BrewReinstall::new(&args.brew)
        .with_timeout(Duration::from_secs(args.timeout_secs))
        .with_install_log(&ctx.install_log_path())
        .context("Cannot open install log")?;
    let catalog = BrewCatalog::new(&args.brew);

    let progress: Box<dyn ProgressTracker> = if args.quiet || !std::io::stderr().is_terminal() {
        Box::new(LogProgress::new("Reinstalling", 0))
    } else {
        Box::new(BatchProgress::new(0, "Reinstalling"))
    };

    let mut orchestrator = ReinstallOrchestrator::new(ctx, Box::new(action)).with_progress(progress);
    if args.prefetch {
        orchestrator = orchestrator.with_prefetch(args.jobs);
    }

    let report = orchestrator
        .run(&selection, &catalog)
        .context("Reinstall batch could not run")?;
    print_report(&report);

    let ctx = orchestrator.into_context();
    println!();
    println!("Checkpoint:  {}", ctx.store().path().display());
    println!("Trace log:   {}", ctx.trace_path().display());
    println!("Install log: {}", ctx.install_log_path().display());
    Ok(())
}

/// Per-package summary table
pub fn print_report(report: &RunReport) {
    match &report.checkpoint {
        LoadOutcome::Fresh => {}
        LoadOutcome::Resumed => println!("Resumed from checkpoint"),
        LoadOutcome::Restored { from } => {
            println!("Resumed checkpoint kept for this selection at {}", from.display())
        }
        LoadOutcome::ScopeChanged { previous } => {
            println!("Selection changed; previous checkpoint kept at {}", previous.display())
        }
        LoadOutcome::Corrupt { moved_to, error } => {
            println!("Checkpoint was unreadable ({}); moved to {}", error, moved_to.display())
        }
    }
    if let Some(prefetch) = &report.prefetch {
        println!(
            "Downloads: {} fetched, {} failed, {} not needed",
            prefetch.fetched, prefetch.failed, prefetch.skipped
        );
    }

    if report.packages.is_empty() {
        println!("No casks selected.");
        return;
    }

    let width = report
        .packages
        .iter()
        .map(|p| p.id.len())
        .max()
        .unwrap_or(0)
        .max("CASK".len());
    println!();
    println!("{:<width$}  {:<11}  {:>7}  REASON", "CASK", "STATUS", "SUDO");
    for package in &report.packages {
        let status = if package.attempted {
            package.status.to_string()
        } else {
            "skipped".to_string()
        };
        println!(
            "{:<width$}  {:<11}  {:>7}  {}",
            package.id,
            status,
            package.trace_entries,
            package.reason.as_deref().unwrap_or("")
        );
    }

    println!();
    println!(
        "{} succeeded, {} failed, {} skipped (already done), {} privileged command(s) traced",
        report.succeeded(),
        report.failed(),
        report.skipped(),
        report.recorded()
    );
    let retry: Vec<&str> = report
        .packages
        .iter()
        .filter(|p| p.status == PackageStatus::Failed)
        .map(|p| p.id.as_str())
        .collect();
    if !retry.is_empty() {
        println!("Re-run to retry: {}", retry.join(" "));
    }
}

/// Append the privileged commands of a raw install log to the trace log
pub fn cmd_import_log(workdir: &Path, log: &Path) -> Result<()> {
    let bytes = fs::read(log).with_context(|| format!("Cannot read {}", log.display()))?;
    let import = import_install_log(&String::from_utf8_lossy(&bytes));

    let mut ctx = RunContext::open(workdir)
        .with_context(|| format!("Cannot use working directory {}", workdir.display()))?;
    let recorder = ctx.recorder_mut();

    // One attempt per contiguous run of the same package
    let mut current: Option<(&str, Uuid)> = None;
    for (package, argv) in &import.commands {
        let attempt = match current {
            Some((p, attempt)) if p == package.as_str() => attempt,
            _ => {
                let attempt = Uuid::new_v4();
                current = Some((package.as_str(), attempt));
                attempt
            }
        };
        recorder.record(package, attempt, argv.clone())?;
    }

    if import.unattributed > 0 {
        warn!(
            "{} privileged line(s) appeared before any reinstall header and were dropped",
            import.unattributed
        );
    }
    info!("Imported {} command(s) from {}", import.commands.len(), log.display());
    println!(
        "Imported {} privileged command(s) into {}",
        import.commands.len(),
        ctx.trace_path().display()
    );
    Ok(())
}
