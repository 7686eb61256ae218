// src/commands/progress.rs
//! Terminal progress display for the reinstall batch
//!
//! An overall bar on top with a spinner status line below showing the
//! package currently being downloaded or reinstalled.

use crate::progress::ProgressTracker;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar pair driven through `ProgressTracker`
pub struct BatchProgress {
    _multi: MultiProgress,
    overall: ProgressBar,
    status: ProgressBar,
}

impl BatchProgress {
    /// Create a tracker for `total` packages
    ///
    /// # Arguments
    /// * `total` - Number of packages expected (can be changed later)
    /// * `operation` - Label shown in front of the bar (e.g. "Reinstalling")
    pub fn new(total: u64, operation: &str) -> Self {
        let multi = MultiProgress::new();

        let overall = ProgressBar::new(total);
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%")
                .expect("Invalid progress bar template")
                .progress_chars("##-"),
        );
        overall.set_message(operation.to_string());

        let status = ProgressBar::new_spinner();
        status.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {msg}")
                .expect("Invalid spinner template"),
        );
        status.enable_steady_tick(Duration::from_millis(100));

        let overall = multi.add(overall);
        let status = multi.add(status);

        Self {
            _multi: multi,
            overall,
            status,
        }
    }
}

impl ProgressTracker for BatchProgress {
    fn set_message(&self, message: &str) {
        self.status.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.overall.inc(amount);
    }

    fn set_length(&self, length: u64) {
        // The download phase and the reinstall loop share the bar
        self.overall.set_position(0);
        self.overall.set_length(length);
    }

    fn finish_with_message(&self, message: &str) {
        self.status.finish_and_clear();
        self.overall.finish_with_message(message.to_string());
    }
}
