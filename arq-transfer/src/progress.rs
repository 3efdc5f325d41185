//! Transfer progress reporting.
//!
//! The state machines report "frames done / frames total" through the
//! [`Progress`] trait and know nothing about how it is shown.

use indicatif::{ProgressBar, ProgressStyle};

/// Receives progress numbers from a running transfer.
pub trait Progress {
    /// A transfer of `total` frames is starting.
    fn start(&mut self, label: &str, total: u64);
    /// `done` of `total` frames are complete.
    fn advance(&mut self, done: u64, total: u64);
    /// The transfer ended, successfully or not.
    fn finish(&mut self);
}

impl<P: Progress + ?Sized> Progress for &mut P {
    fn start(&mut self, label: &str, total: u64) {
        (**self).start(label, total);
    }

    fn advance(&mut self, done: u64, total: u64) {
        (**self).advance(done, total);
    }

    fn finish(&mut self) {
        (**self).finish();
    }
}

/// Completion percentage; an empty transfer counts as complete.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn start(&mut self, _label: &str, _total: u64) {}
    fn advance(&mut self, _done: u64, _total: u64) {}
    fn finish(&mut self) {}
}

/// Terminal progress bar, one per transfer.
#[derive(Default)]
pub struct ConsoleProgress {
    bar: Option<ProgressBar>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Progress for ConsoleProgress {
    fn start(&mut self, label: &str, total: u64) {
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::with_template(
            "{msg}\n[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} frames ({percent}%)",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(label.to_string());
        self.bar = Some(bar);
    }

    fn advance(&mut self, done: u64, _total: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(done);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}
