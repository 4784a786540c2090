//! Process-wide logger setup.
//!
//! `env_logger` does the formatting and filtering. While a progress bar is
//! attached, records are written inside `ProgressBar::suspend` so log lines
//! never tear the bar.

use anyhow::{Context, Result};
use env_logger::Env;
use indicatif::ProgressBar;
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;
use std::sync::Mutex;

static ACTIVE_BAR: Lazy<Mutex<Option<ProgressBar>>> = Lazy::new(|| Mutex::new(None));

struct BarAwareLogger {
    inner: env_logger::Logger,
}

impl Log for BarAwareLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        let bar = ACTIVE_BAR.lock().ok().and_then(|guard| guard.clone());
        match bar {
            Some(bar) => bar.suspend(|| self.inner.log(record)),
            None => self.inner.log(record),
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the logger. Default level is `info`, `debug` with `debug`;
/// `RUST_LOG` overrides both.
pub fn init(debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let inner = env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .build();
    let max_level: LevelFilter = inner.filter();

    log::set_boxed_logger(Box::new(BarAwareLogger { inner }))
        .context("Logger already initialized")?;
    log::set_max_level(max_level);
    Ok(())
}

/// Route log output around `bar` until `detach_bar` is called.
pub fn attach_bar(bar: &ProgressBar) {
    if let Ok(mut guard) = ACTIVE_BAR.lock() {
        *guard = Some(bar.clone());
    }
}

pub fn detach_bar() {
    if let Ok(mut guard) = ACTIVE_BAR.lock() {
        *guard = None;
    }
}
