// src/lib.rs

//! caskgrant
//!
//! Resumable reinstall of Homebrew casks, and least-privilege sudoers rules
//! mined from what those reinstalls actually ran through sudo.
//!
//! # Architecture
//!
//! - Checkpoint-first: every per-package transition is persisted before the
//!   next step, so an interrupted batch resumes exactly where it stopped
//! - Evidence-only rules: every sudoers line is backed by a privileged
//!   command observed in the trace log of its own cask
//! - Per-cask blocks: rules are never shared or deduplicated across casks
//!
//! The reinstall side (`orchestrator`, `checkpoint`, `trace`, `action`) and
//! the rule side (`miner`, `generalize`, `sudoers`) only share the trace log
//! format.

pub mod action;
pub mod catalog;
pub mod checkpoint;
pub mod cli;
pub mod commands;
mod error;
pub mod fsutil;
pub mod generalize;
pub mod intercept;
pub mod miner;
pub mod orchestrator;
pub mod prefetch;
pub mod progress;
pub mod sudoers;
pub mod trace;

pub use action::{ActionOutcome, BrewReinstall, CommandSink, ReinstallAction};
pub use catalog::{BrewCatalog, PackageCatalog, RunScope, Selection};
pub use checkpoint::{
    CheckpointDocument, CheckpointStore, LoadOutcome, PackageRecord, PackageStatus,
};
pub use error::{Error, Result};
pub use generalize::{Pattern, RiskFlag, RuleBlock, RuleGeneralizer, RuleLine};
pub use miner::{CandidateRule, LogMiner, MineResult, SkipReason};
pub use orchestrator::{PackageReport, ReinstallOrchestrator, RunContext, RunReport};
pub use progress::{LogProgress, ProgressTracker, SilentProgress};
pub use sudoers::SudoersWriter;
pub use trace::{TraceEntry, TraceReadout, TraceRecorder};
