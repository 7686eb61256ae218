// src/commands/generate.rs
//! Sudoers generation from trace logs

use crate::catalog::Selection;
use crate::cli::SudoersArgs;
use crate::error::Error;
use crate::generalize::RuleGeneralizer;
use crate::miner::LogMiner;
use crate::sudoers::SudoersWriter;
use crate::trace::{TraceReadout, read_trace};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

/// What one generation run produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateSummary {
    pub entries: usize,
    pub skipped: usize,
    pub blocks: usize,
    pub rules: usize,
    pub flagged: usize,
}

/// Mine the trace logs and write the sudoers fragment
///
/// Nothing is written unless every log is readable and both `LOGS` and
/// `TARGET_USER` are set.
pub fn cmd_generate(args: &SudoersArgs) -> Result<GenerateSummary> {
    let logs: Vec<PathBuf> = args
        .logs
        .iter()
        .filter(|p| !p.as_os_str().is_empty())
        .cloned()
        .collect();
    if logs.is_empty() {
        return Err(Error::MissingConfig("LOGS").into());
    }
    let target_user = args
        .target_user
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(Error::MissingConfig("TARGET_USER"))?;

    let mut readouts = Vec::with_capacity(logs.len());
    for log in &logs {
        let readout = read_trace(log).with_context(|| format!("Cannot mine {}", log.display()))?;
        info!("{}: {} entries", log.display(), readout.entries.len());
        readouts.push(readout);
    }
    let readout = TraceReadout::merge(readouts);

    let mut miner = LogMiner::new();
    if let Some(list) = args.casks.as_deref()
        && let Selection::Explicit(ids) = Selection::from_sources(&[], Some(list))?
    {
        miner = miner.with_filter(ids);
    }
    let mined = miner.mine(&readout);
    let blocks = RuleGeneralizer::new().generalize_all(&mined);

    SudoersWriter::new(target_user)
        .with_sources(logs)
        .write(&args.out, &blocks)
        .with_context(|| format!("Cannot write {}", args.out.display()))?;

    let summary = GenerateSummary {
        entries: mined.entries,
        skipped: mined.skipped.total(),
        blocks: blocks.len(),
        rules: blocks.iter().map(|b| b.lines.len()).sum(),
        flagged: blocks.iter().map(|b| b.flagged()).sum(),
    };

    println!("Trace entries read: {}", summary.entries);
    for (reason, count) in mined.skipped.iter() {
        println!("  skipped ({}): {}", reason, count);
    }
    for missing in &mined.missing {
        println!("  no trace entries for {}", missing);
    }
    println!("Cask blocks: {}", summary.blocks);
    println!("Rule lines:  {}", summary.rules);
    if summary.flagged > 0 {
        println!("Flagged for review: {} (see '# REVIEW:' comments)", summary.flagged);
    }
    println!("Wrote {}", args.out.display());

    Ok(summary)
}
