//! Progress display for `steward apply`

use crate::ui;
use colored::Colorize;
use converge::{ResourceRef, ResourceStatus, TransactionObserver};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar plus one line per event as resources complete
pub struct ApplyProgress {
    pb: ProgressBar,
    show_events: bool,
}

impl ApplyProgress {
    pub fn new(quiet: bool) -> Self {
        let pb = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self {
            pb,
            show_events: !quiet,
        }
    }
}

impl TransactionObserver for ApplyProgress {
    fn on_run_start(&mut self, total: usize) {
        self.pb.set_length(total as u64);
    }

    fn on_resource_start(&mut self, resource: &ResourceRef) {
        self.pb.set_message(ui::truncate(&resource.to_string(), 40));
    }

    fn on_resource_complete(&mut self, resource: &ResourceRef, status: &ResourceStatus) {
        // Resources generated during the run were not counted up front
        if self.pb.position() >= self.pb.length().unwrap_or(0) {
            self.pb.inc_length(1);
        }
        self.pb.inc(1);

        if !self.show_events {
            return;
        }
        let mut lines: Vec<String> = status.events.iter().map(ui::event_line).collect();
        if status.skipped && status.dependency_failed() {
            lines.push(format!(
                "{} {}: skipped because of failed dependencies",
                "-".dimmed(),
                resource.to_string().dimmed()
            ));
        }
        if !lines.is_empty() {
            self.pb.suspend(|| {
                for line in &lines {
                    println!("  {line}");
                }
            });
        }
    }

    fn on_run_complete(&mut self) {
        self.pb.finish_and_clear();
    }
}
