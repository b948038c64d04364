// src/progress.rs

//! Download and batch progress reporting
//!
//! Fetching reports through [`ProgressTracker`]: one top-level tracker
//! counts implementations, and every download gets a child tracker counting
//! bytes. Three implementations exist:
//!
//! - [`CliProgress`]: indicatif bars, one line per running download
//! - [`LogProgress`]: a tracing line each time another tenth is done
//! - [`SilentProgress`]: counts but prints nothing (library default)

use indicatif::{MultiProgress, ProgressBar};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// What a tracker counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressStyle {
    /// Items of a batch
    #[default]
    Bar,
    /// Bytes of a download
    Bytes,
}

/// Sink for progress updates, shared across fetch threads
pub trait ProgressTracker: Send + Sync {
    fn set_message(&self, message: &str);

    fn increment(&self, amount: u64);

    fn set_position(&self, position: u64);

    /// Replace the expected total, for example once a server announces it
    fn set_length(&self, length: u64);

    fn position(&self) -> u64;

    fn finish_with_message(&self, message: &str);

    fn finish_with_error(&self, message: &str);

    /// Tracker for one sub-task, such as a single download
    fn child(&self, message: &str, length: u64, style: ProgressStyle) -> Box<dyn ProgressTracker>;
}

#[derive(Debug, Default)]
struct Counter {
    position: AtomicU64,
    length: AtomicU64,
}

impl Counter {
    fn new(length: u64) -> Self {
        Self {
            position: AtomicU64::new(0),
            length: AtomicU64::new(length),
        }
    }

    /// Move to `position`, returning the previous one
    fn swap(&self, position: u64) -> u64 {
        self.position.swap(position, Ordering::Relaxed)
    }

    fn add(&self, amount: u64) -> u64 {
        self.position.fetch_add(amount, Ordering::Relaxed)
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::Relaxed)
    }
}

/// Counts progress without reporting it
#[derive(Debug, Default)]
pub struct SilentProgress {
    counter: Counter,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn increment(&self, amount: u64) {
        self.counter.add(amount);
    }

    fn set_position(&self, position: u64) {
        self.counter.swap(position);
    }

    fn set_length(&self, length: u64) {
        self.counter.length.store(length, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.counter.position()
    }

    fn finish_with_message(&self, _message: &str) {}

    fn finish_with_error(&self, _message: &str) {}

    fn child(&self, _message: &str, _length: u64, _style: ProgressStyle) -> Box<dyn ProgressTracker> {
        Box::new(SilentProgress::new())
    }
}

/// Reports progress as tracing lines, one per tenth of the total
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    style: ProgressStyle,
    counter: Counter,
}

impl LogProgress {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            style: ProgressStyle::Bar,
            counter: Counter::new(length),
        }
    }

    fn with_style(mut self, style: ProgressStyle) -> Self {
        self.style = style;
        self
    }

    fn report(&self, old: u64, new: u64) {
        let length = self.counter.length();
        if length == 0 || tenth(old, length) == tenth(new, length) {
            return;
        }
        let percent = new.min(length) * 100 / length;
        match self.style {
            ProgressStyle::Bar => info!("{}: {}% ({}/{})", self.name, percent, new, length),
            ProgressStyle::Bytes => {
                info!("{}: {}% ({} of {} bytes)", self.name, percent, new, length)
            }
        }
    }
}

fn tenth(position: u64, length: u64) -> u64 {
    position.min(length) * 10 / length
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn increment(&self, amount: u64) {
        let old = self.counter.add(amount);
        self.report(old, old + amount);
    }

    fn set_position(&self, position: u64) {
        let old = self.counter.swap(position);
        self.report(old, position);
    }

    fn set_length(&self, length: u64) {
        self.counter.length.store(length, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.counter.position()
    }

    fn finish_with_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn finish_with_error(&self, message: &str) {
        warn!("{}: failed: {}", self.name, message);
    }

    fn child(&self, message: &str, length: u64, style: ProgressStyle) -> Box<dyn ProgressTracker> {
        Box::new(LogProgress::new(message, length).with_style(style))
    }
}

/// Terminal progress bars using indicatif
///
/// Children are drawn as additional bars below their parent, so parallel
/// downloads each get their own line.
pub struct CliProgress {
    bar: ProgressBar,
    multi: MultiProgress,
}

impl CliProgress {
    /// Create a new top-level progress bar
    pub fn new(message: &str, length: u64, style: ProgressStyle) -> Self {
        let multi = MultiProgress::new();
        let bar = multi.add(make_bar(message, length, style));
        Self { bar, multi }
    }
}

fn make_bar(message: &str, length: u64, style: ProgressStyle) -> ProgressBar {
    let template = match style {
        ProgressStyle::Bar => "{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%",
        ProgressStyle::Bytes => "  {msg} [{bar:30.cyan/dim}] {bytes}/{total_bytes} ({bytes_per_sec})",
    };

    let default_style = indicatif::ProgressStyle::default_bar().progress_chars("##-");
    // A bad template only costs the custom layout
    let bar_style = default_style
        .clone()
        .template(template)
        .unwrap_or(default_style);

    let bar = ProgressBar::new(length);
    bar.set_style(bar_style);
    bar.set_message(message.to_string());
    bar
}

impl ProgressTracker for CliProgress {
    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.bar.inc(amount);
    }

    fn set_position(&self, position: u64) {
        self.bar.set_position(position);
    }

    fn set_length(&self, length: u64) {
        self.bar.set_length(length);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.bar.abandon_with_message(format!("ERROR: {}", message));
    }

    fn child(&self, message: &str, length: u64, style: ProgressStyle) -> Box<dyn ProgressTracker> {
        let bar = self.multi.add(make_bar(message, length, style));
        Box::new(CliProgress {
            bar,
            multi: self.multi.clone(),
        })
    }
}
