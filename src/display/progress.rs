//! Progress tracking utilities for long-running operations.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;

use crate::batch::{ProgressSink, Stage};

/// Create a styled progress bar for row or text processing.
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Create a spinner for indeterminate progress.
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Helper to display a temporary spinner during an operation.
pub fn with_spinner<F, T>(message: &str, operation: F) -> T
where
    F: FnOnce() -> T,
{
    let spinner = create_spinner(message);
    let result = operation();
    spinner.finish_and_clear();
    result
}

/// Terminal progress: one bar per [`Stage`], stacked while they run.
///
/// Stages with a single unit of work (persisting) get a spinner instead.
pub struct BarProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<Stage, ProgressBar>>,
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn active_stages(&self) -> usize {
        self.bars.lock().len()
    }
}

impl ProgressSink for BarProgress {
    fn start(&self, stage: Stage, total: usize) {
        let label = stage.to_string();
        let bar = if total <= 1 {
            create_spinner(&label)
        } else {
            create_progress_bar(total as u64, &label)
        };
        let bar = self.multi.add(bar);
        if let Some(previous) = self.bars.lock().insert(stage, bar) {
            previous.finish_and_clear();
        }
    }

    fn advance(&self, stage: Stage, done: usize) {
        if let Some(bar) = self.bars.lock().get(&stage) {
            bar.inc(done as u64);
        }
    }

    fn finish(&self, stage: Stage) {
        if let Some(bar) = self.bars.lock().remove(&stage) {
            let elapsed = bar.elapsed();
            bar.finish_with_message(format!("{stage} ({elapsed:.1?})"));
        }
    }
}
