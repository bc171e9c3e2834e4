//! Progress indicators for stackrun.
//!
//! One bar per level, fed by the coordinator's progress callbacks.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use levelrun::{ExecutionResult, LevelStatus, ProgressCallback};
use std::sync::Mutex;
use std::time::Duration;

pub struct LevelProgress {
    visible: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl LevelProgress {
    /// Bars are drawn only when `visible` and stderr is a terminal
    pub fn new(visible: bool) -> Self {
        Self {
            visible: visible && console::user_attended_stderr(),
            bar: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock()
            && let Some(bar) = guard.as_ref()
        {
            f(bar);
        }
    }
}

impl ProgressCallback for LevelProgress {
    fn on_level_start(&self, index: usize, total: usize, services: &[String]) {
        let bar = if self.visible {
            let bar = ProgressBar::new(services.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            bar.set_prefix(format!("Level {}/{total}", index + 1));
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };

        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(bar);
        }
    }

    fn on_service_start(&self, service: &str) {
        self.with_bar(|bar| bar.set_message(service.to_string()));
    }

    fn on_service_complete(&self, result: &ExecutionResult) {
        self.with_bar(|bar| {
            let line = if result.success {
                format!("  {} {}", "✓".green(), result.service)
            } else {
                format!("  {} {}", "✗".red(), result.service)
            };
            if self.visible {
                bar.println(line);
            }
            bar.inc(1);
        });
    }

    fn on_level_complete(&self, _index: usize, _status: LevelStatus) {
        if let Ok(mut guard) = self.bar.lock()
            && let Some(bar) = guard.take()
        {
            bar.finish_and_clear();
        }
    }
}
