// src/prefetch.rs

//! Parallel download phase
//!
//! Downloads do not take the package manager's install lock, so installers
//! are fetched on a bounded worker pool before the sequential reinstall loop
//! starts. Checkpoint writes from workers are serialized through a mutex.

use crate::action::ReinstallAction;
use crate::checkpoint::{CheckpointDocument, CheckpointStore};
use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use rayon::prelude::*;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Default number of concurrent downloads
pub const DEFAULT_JOBS: usize = 32;

/// Counts from one prefetch phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    pub fetched: usize,
    pub failed: usize,
    /// Already fetched or already reinstalled
    pub skipped: usize,
}

/// Fetch every package in `packages` that still needs it.
///
/// A failed download only logs a warning: the reinstall downloads again.
pub fn prefetch(
    doc: &mut CheckpointDocument,
    store: &CheckpointStore,
    action: &dyn ReinstallAction,
    packages: &[String],
    jobs: usize,
    progress: &dyn ProgressTracker,
) -> Result<PrefetchReport> {
    let candidates: Vec<&String> = packages
        .iter()
        .filter(|id| {
            doc.get(id)
                .is_some_and(|r| r.status.needs_attempt() && !r.fetched)
        })
        .collect();
    let skipped = packages.len() - candidates.len();

    if candidates.is_empty() {
        debug!("Nothing to prefetch");
        return Ok(PrefetchReport {
            skipped,
            ..Default::default()
        });
    }

    let jobs = jobs.clamp(1, candidates.len());
    info!("Downloading {} package(s) with {} workers", candidates.len(), jobs);
    progress.set_length(candidates.len() as u64);
    progress.set_message("Downloading");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;

    let shared = Mutex::new(doc);
    let results: Result<Vec<bool>> = pool.install(|| {
        candidates
            .par_iter()
            .map(|id| -> Result<bool> {
                let ok = match action.fetch(id) {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!("Download of {} could not start: {}", id, e);
                        false
                    }
                };
                progress.increment(1);
                if !ok {
                    warn!("Download of {} failed; it will be retried during reinstall", id);
                    return Ok(false);
                }

                let mut doc = shared
                    .lock()
                    .map_err(|_| Error::WorkerPool("checkpoint lock poisoned".to_string()))?;
                if let Some(record) = doc.get_mut(id) {
                    record.fetched = true;
                }
                store.save(&doc)?;
                debug!("Downloaded {}", id);
                Ok(true)
            })
            .collect()
    });

    let results = results?;
    let fetched = results.iter().filter(|ok| **ok).count();
    let report = PrefetchReport {
        fetched,
        failed: results.len() - fetched,
        skipped,
    };
    progress.set_message(&format!(
        "{} downloaded, {} failed",
        report.fetched, report.failed
    ));
    Ok(report)
}
