// src/progress.rs

//! Progress reporting for batch operations
//!
//! The orchestrator and the prefetcher report through `ProgressTracker` and
//! never know how (or whether) progress is displayed. Implementations here
//! cover logging and silence; the interactive progress bar lives with the
//! command-line front end.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Core trait for progress tracking
///
/// Implementations must be thread-safe: the prefetch phase reports from
/// worker threads.
pub trait ProgressTracker: Send + Sync {
    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Increment progress by the given amount
    fn increment(&self, amount: u64);

    /// Set the total (length) of the progress
    fn set_length(&self, length: u64);

    /// Finish progress successfully with a message
    fn finish_with_message(&self, message: &str);
}

/// Silent progress tracker (no-op)
#[derive(Debug, Default)]
pub struct SilentProgress;

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn increment(&self, _amount: u64) {}

    fn set_length(&self, _length: u64) {}

    fn finish_with_message(&self, _message: &str) {}
}

/// Logging progress tracker
///
/// Logs every message and each completed step at info level. Used when
/// stderr is not a terminal (cron, CI, piped output).
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    position: AtomicU64,
    length: AtomicU64,
}

impl LogProgress {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            position: AtomicU64::new(0),
            length: AtomicU64::new(length),
        }
    }
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn increment(&self, amount: u64) {
        let new_pos = self.position.fetch_add(amount, Ordering::Relaxed) + amount;
        let length = self.length.load(Ordering::Relaxed);
        if length > 0 {
            info!("{}: {}/{} ({}%)", self.name, new_pos, length, (new_pos * 100) / length);
        }
    }

    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn finish_with_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }
}
