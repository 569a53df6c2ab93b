//! Logging and progress bar setup.

use std::io;
use std::sync::{Arc, Mutex};

use clap_verbosity_flag::{InfoLevel, Verbosity};
use console::style;
use indicatif::{MultiProgress, ProgressDrawTarget};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Which format to render log lines in.
#[derive(clap::ValueEnum, Clone, Eq, PartialEq, Debug, Copy)]
pub enum LogStyle {
    /// Plain `tracing_subscriber` formatting, no progress bars.
    Plain,
    /// JSON lines, suitable for machine consumption.
    Json,
}

/// Holds the shared [`MultiProgress`] so log lines never tear through an
/// in-flight progress bar.
#[derive(Clone)]
pub struct ProgressHandle {
    bars: Arc<Mutex<MultiProgress>>,
}

impl Default for ProgressHandle {
    fn default() -> Self {
        let bars = MultiProgress::new();
        bars.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        Self {
            bars: Arc::new(Mutex::new(bars)),
        }
    }
}

impl ProgressHandle {
    pub fn add(&self, bar: indicatif::ProgressBar) -> indicatif::ProgressBar {
        self.bars.lock().unwrap().add(bar)
    }

    pub fn default_style(&self) -> indicatif::ProgressStyle {
        indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:16!} [{elapsed_precise}] {wide_msg}")
            .unwrap()
    }

    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.bars.lock().unwrap().suspend(f)
    }
}

impl io::Write for ProgressHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bars.lock().unwrap().suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.bars.lock().unwrap().suspend(|| io::stderr().flush())
    }
}

impl<'a> fmt::MakeWriter<'a> for ProgressHandle {
    type Writer = ProgressHandle;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn default_env_filter(level: tracing::level_filters::LevelFilter) -> Result<EnvFilter, ParseError> {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse(format!("squeaker={level}"))
}

/// Initializes the global tracing subscriber, returning the progress handle
/// that commands should route their indicatif bars through.
pub fn init_logging(
    log_style: LogStyle,
    verbosity: &Verbosity<InfoLevel>,
) -> Result<ProgressHandle, ParseError> {
    let progress = ProgressHandle::default();
    let env_filter = default_env_filter(verbosity.tracing_level_filter())?;

    match log_style {
        LogStyle::Plain => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(progress.clone()).without_time())
                .init();
        }
        LogStyle::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
    }

    Ok(progress)
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", style("error:").red().bold(), message);
}
