// src/orchestrator.rs

//! Resumable batch reinstall
//!
//! Packages are reinstalled one at a time in catalog order. Every state
//! change is written to the checkpoint before the next step starts:
//!
//! 1. mark the package in progress (attempt counter and timestamp), persist
//! 2. run the reinstall action, appending each intercepted privileged
//!    command to the trace log as it arrives
//! 3. mark the package succeeded or failed, persist
//!
//! A crash between 1 and 3 leaves the package in progress and the next run
//! retries it. One package failing never stops the batch.

use crate::action::{ActionOutcome, CommandSink, INSTALL_LOG_FILE, ReinstallAction};
use crate::catalog::{PackageCatalog, Selection};
use crate::checkpoint::{CheckpointStore, LoadOutcome, PackageStatus};
use crate::error::Result;
use crate::fsutil::RunLock;
use crate::prefetch::{self, PrefetchReport};
use crate::progress::{ProgressTracker, SilentProgress};
use crate::trace::{TRACE_FILE, TraceRecorder};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fixed lock filename inside the working directory
pub const LOCK_FILE: &str = "reinstall_casks.lock";

/// Resources owned by one run: the working-directory lock, the checkpoint
/// store and the trace recorder. Dropping the context releases the lock.
pub struct RunContext {
    workdir: PathBuf,
    store: CheckpointStore,
    recorder: TraceRecorder,
    _lock: RunLock,
}

impl RunContext {
    /// Take ownership of `workdir`, failing fast if another run holds it
    pub fn open(workdir: &Path) -> Result<Self> {
        fs::create_dir_all(workdir)?;
        let lock = RunLock::acquire(&workdir.join(LOCK_FILE))?;
        let store = CheckpointStore::new(workdir);
        let recorder = TraceRecorder::open(&workdir.join(TRACE_FILE))?;
        debug!("Run context open in {}", workdir.display());

        Ok(Self {
            workdir: workdir.to_path_buf(),
            store,
            recorder,
            _lock: lock,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn recorder_mut(&mut self) -> &mut TraceRecorder {
        &mut self.recorder
    }

    pub fn trace_path(&self) -> &Path {
        self.recorder.path()
    }

    pub fn install_log_path(&self) -> PathBuf {
        self.workdir.join(INSTALL_LOG_FILE)
    }
}

/// Final state of one package after a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReport {
    pub id: String,
    pub status: PackageStatus,
    pub reason: Option<String>,
    /// False when the package had already succeeded in an earlier run
    pub attempted: bool,
    /// Trace entries recorded during this run's attempt
    pub trace_entries: usize,
}

/// Outcome of a whole run, packages in catalog order
#[derive(Debug, Clone)]
pub struct RunReport {
    pub packages: Vec<PackageReport>,
    pub checkpoint: LoadOutcome,
    pub prefetch: Option<PrefetchReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.count(|p| p.attempted && p.status == PackageStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(|p| p.status == PackageStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(|p| !p.attempted)
    }

    pub fn attempted(&self) -> usize {
        self.count(|p| p.attempted)
    }

    pub fn recorded(&self) -> usize {
        self.packages.iter().map(|p| p.trace_entries).sum()
    }

    fn count(&self, pred: impl Fn(&PackageReport) -> bool) -> usize {
        self.packages.iter().filter(|p| pred(p)).count()
    }
}

/// Drives a batch of reinstalls against one run context
pub struct ReinstallOrchestrator {
    ctx: RunContext,
    action: Box<dyn ReinstallAction>,
    progress: Box<dyn ProgressTracker>,
    prefetch_jobs: Option<usize>,
}

impl ReinstallOrchestrator {
    pub fn new(ctx: RunContext, action: Box<dyn ReinstallAction>) -> Self {
        Self {
            ctx,
            action,
            progress: Box::new(SilentProgress::new()),
            prefetch_jobs: None,
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    /// Download installers on `jobs` workers before reinstalling
    pub fn with_prefetch(mut self, jobs: usize) -> Self {
        self.prefetch_jobs = Some(jobs);
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Release the run context (and with it the lock)
    pub fn into_context(self) -> RunContext {
        self.ctx
    }

    /// Reinstall every selected package that has not yet succeeded
    pub fn run(&mut self, selection: &Selection, catalog: &dyn PackageCatalog) -> Result<RunReport> {
        let scope = selection.scope();
        let packages = selection.resolve(catalog)?;
        info!("Run scope: {} ({} package(s))", scope, packages.len());

        let (mut doc, checkpoint) = self.ctx.store.load_or_init(&scope)?;
        let added = doc.ensure_packages(&packages);
        if added > 0 || checkpoint != LoadOutcome::Resumed {
            if checkpoint == LoadOutcome::Resumed {
                info!("{} new package(s) added to the checkpoint", added);
            }
            self.ctx.store.save(&doc)?;
        }

        let prefetch = match self.prefetch_jobs {
            Some(jobs) => Some(prefetch::prefetch(
                &mut doc,
                &self.ctx.store,
                self.action.as_ref(),
                &packages,
                jobs,
                self.progress.as_ref(),
            )?),
            None => None,
        };

        let pending = packages
            .iter()
            .filter(|id| doc.get(id).is_some_and(|r| r.status.needs_attempt()))
            .count();
        self.progress.set_length(pending as u64);

        let mut reports = Vec::with_capacity(packages.len());
        for id in &packages {
            let Some(record) = doc.get_mut(id) else {
                continue;
            };
            if !record.status.needs_attempt() {
                debug!("{} already reinstalled, skipping", id);
                reports.push(PackageReport {
                    id: id.clone(),
                    status: record.status,
                    reason: None,
                    attempted: false,
                    trace_entries: 0,
                });
                continue;
            }

            if record.status == PackageStatus::InProgress {
                warn!("{} was interrupted during a previous run, retrying", id);
            }
            record.mark_in_progress(Utc::now());
            self.ctx.store.save(&doc)?;

            self.progress.set_message(&format!("Reinstalling {}", id));
            let attempt = Uuid::new_v4();
            let (outcome, trace_entries) = self.attempt(id, attempt);

            let Some(record) = doc.get_mut(id) else {
                continue;
            };
            match outcome {
                ActionOutcome::Succeeded => {
                    info!("{} reinstalled ({} privileged command(s))", id, trace_entries);
                    record.mark_succeeded();
                }
                ActionOutcome::Failed { reason } => {
                    warn!("{} failed: {}", id, reason);
                    record.mark_failed(reason);
                }
            }
            let report = PackageReport {
                id: id.clone(),
                status: record.status,
                reason: record.failure_reason.clone(),
                attempted: true,
                trace_entries,
            };
            self.ctx.store.save(&doc)?;
            self.progress.increment(1);
            reports.push(report);
        }

        let report = RunReport {
            packages: reports,
            checkpoint,
            prefetch,
        };
        self.progress.finish_with_message(&format!(
            "{} succeeded, {} failed, {} skipped",
            report.succeeded(),
            report.failed(),
            report.skipped()
        ));
        Ok(report)
    }

    /// Run the action once, recording intercepted commands under `attempt`
    fn attempt(&mut self, package: &str, attempt: Uuid) -> (ActionOutcome, usize) {
        let recorder = &mut self.ctx.recorder;
        let mut recorded = 0;
        let mut sink = |argv: Vec<String>| -> Result<()> {
            recorder.record(package, attempt, argv)?;
            recorded += 1;
            Ok(())
        };
        let sink: &mut CommandSink<'_> = &mut sink;

        let outcome = match self.action.reinstall(package, sink) {
            Ok(outcome) => outcome,
            Err(e) => ActionOutcome::failed(e.to_string()),
        };
        (outcome, recorded)
    }
}
