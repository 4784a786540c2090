//! Progress reporting and ETA estimation.

use crate::logging;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::VecDeque;
use std::time::Duration;

/// Rough synthesis cost used before any chunk has been timed.
pub const ESTIMATED_SECS_PER_CHUNK: u64 = 5;

const ETA_WINDOW: usize = 10;

/// Up-front estimate for `pending` chunks.
pub fn estimate_total(pending: usize) -> Duration {
    Duration::from_secs(pending as u64 * ESTIMATED_SECS_PER_CHUNK)
}

/// `1h 02m 03s`, `2m 05s` or `7s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Moving average of recent per-chunk synthesis times.
///
/// Resumed chunks are never recorded; they would drag the average to zero.
#[derive(Debug, Default)]
pub struct EtaTracker {
    recent: VecDeque<Duration>,
}

impl EtaTracker {
    pub fn record(&mut self, elapsed: Duration) {
        if self.recent.len() == ETA_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(elapsed);
    }

    pub fn average(&self) -> Option<Duration> {
        if self.recent.is_empty() {
            return None;
        }
        let total: Duration = self.recent.iter().sum();
        Some(total / self.recent.len() as u32)
    }

    /// Remaining time for `remaining` chunks at the current average.
    pub fn eta(&self, remaining: usize) -> Option<Duration> {
        self.average().map(|avg| avg * remaining as u32)
    }
}

/// Progress bar over every chunk of the run.
pub struct Progress {
    bar: ProgressBar,
    eta: EtaTracker,
    visible: bool,
}

impl Progress {
    pub fn new(total_chunks: usize, visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new(total_chunks as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            logging::attach_bar(&bar);
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            bar,
            eta: EtaTracker::default(),
            visible,
        }
    }

    /// A chunk that already had a valid artifact.
    pub fn skip_resumed(&mut self) {
        self.bar.inc(1);
    }

    /// A chunk the backend was called for, successful or not.
    pub fn record_synthesis(&mut self, elapsed: Duration) {
        self.eta.record(elapsed);
        self.bar.inc(1);

        let remaining = self
            .bar
            .length()
            .unwrap_or(0)
            .saturating_sub(self.bar.position()) as usize;
        if let Some(eta) = self.eta.eta(remaining) {
            self.bar.set_message(format!("ETA {}", format_duration(eta)));
        }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        if self.eta.average().is_none() {
            self.bar.set_message(message.into());
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
        if self.visible {
            logging::detach_bar();
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if self.visible {
            logging::detach_bar();
        }
    }
}
