//! Progress display for apply runs

use crate::ui;
use converge::{ActionResult, Address, PlanAction, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Reports each resolved action, with a bar when nobody is being prompted
pub struct ApplyProgress {
    pb: ProgressBar,
}

impl ApplyProgress {
    /// `show_bar` should be false when an operator is prompted mid-run
    pub fn new(show_bar: bool) -> Self {
        let pb = if show_bar {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { pb }
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_batch_start(&mut self, count: usize) {
        self.pb.set_length(count as u64);
        self.pb.enable_steady_tick(Duration::from_millis(120));
    }

    fn on_resource_start(&mut self, action: &PlanAction) {
        log::debug!("Started {} {}", action.kind, action.address);
        self.pb
            .set_message(ui::truncate_path(&action.address.to_string(), 40));
    }

    fn on_resource_complete(&mut self, address: &Address, result: &ActionResult) {
        self.pb.suspend(|| {
            println!("  {} {address}: {result}", ui::result_symbol(result));
        });
        self.pb.inc(1);
    }

    fn on_batch_complete(&mut self) {
        self.pb.finish_and_clear();
    }
}
