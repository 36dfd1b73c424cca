//! Progress reporting for the aggregation phases.
//!
//! Each phase of a run has a bar (or spinner) label and a log key. In
//! log-only mode bars are hidden and periodic progress lines go through
//! `tracing` instead.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Global flag for log-only mode (set from args in main)
static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Phases of a `listen-stats` run, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    LoadCaches,
    ReadListens,
    Group,
    RankAndWrite,
}

impl Phase {
    /// Bar and spinner label
    pub fn label(self) -> &'static str {
        match self {
            Phase::LoadCaches => "Loading reference caches",
            Phase::ReadListens => "Phase 1: Reading listens",
            Phase::Group => "Phase 2: Grouping listens",
            Phase::RankAndWrite => "Phase 3: Ranking and writing",
        }
    }

    /// Short key used in log lines
    pub fn key(self) -> &'static str {
        match self {
            Phase::LoadCaches => "caches",
            Phase::ReadListens => "read",
            Phase::Group => "group",
            Phase::RankAndWrite => "write",
        }
    }

    /// Items between two log-only progress lines. Listens are counted one
    /// by one, listeners are far fewer.
    pub fn log_interval(self) -> u64 {
        match self {
            Phase::ReadListens => 1_000_000,
            Phase::RankAndWrite => 10_000,
            Phase::LoadCaches | Phase::Group => 100_000,
        }
    }

    /// Final bar message, e.g. "Phase 1: 12 listens"
    pub fn done_message(self, detail: impl std::fmt::Display) -> String {
        match self.label().split_once(':') {
            Some((prefix, _)) => format!("{}: {}", prefix, detail),
            None => detail.to_string(),
        }
    }
}

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

/// Progress bar over `len` items of `phase`, hidden in log-only mode.
pub fn create_progress_bar(len: u64, phase: Phase) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
                .unwrap()
                .progress_chars("=> "),
        );
    }
    pb.set_message(phase.label());
    pb
}

/// Spinner for a phase of unknown length, hidden in log-only mode.
pub fn create_spinner(phase: Phase) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{msg} {spinner} [{elapsed_precise}]")
                .unwrap(),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(phase.label());
    pb
}

/// Whether `current` of `total` items of `phase` deserves a progress line.
pub fn should_log(phase: Phase, current: u64, total: u64) -> bool {
    total > 0 && (current % phase.log_interval() == 0 || current == total)
}

/// Advance `pb` to `current` and, in log-only mode, log a progress line at
/// the phase's interval and at the end.
pub fn log_progress(pb: &ProgressBar, phase: Phase, current: u64, total: u64) {
    pb.set_position(current);
    if is_log_only() && should_log(phase, current, total) {
        let pct = 100.0 * current as f64 / total as f64;
        tracing::info!(phase = phase.key(), current, total, "{:.1}%", pct);
    }
}
