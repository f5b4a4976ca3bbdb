//! Scoped stage timing for the detection pipeline.
//!
//! A [`TimingGuard`] measures one pipeline stage (preprocess, inference, decode, crop, store write)
//! and logs the elapsed time on the `arbor::telemetry` target when it is dropped. Guards are inert
//! unless telemetry has been switched on through [`configure`] and the logger accepts the level.

use std::{
    borrow::Cow,
    sync::atomic::{AtomicU8, Ordering},
    time::{Duration, Instant},
};

use log::{Level, LevelFilter, log, log_enabled};

/// Log target used by every timing guard.
pub const TELEMETRY_TARGET: &str = "arbor::telemetry";

/// 0 means disabled; otherwise the maximum accepted level as 1 (error) ..= 5 (trace).
static TELEMETRY_THRESHOLD: AtomicU8 = AtomicU8::new(0);

/// RAII helper that logs how long a pipeline stage took when dropped.
pub struct TimingGuard {
    label: Cow<'static, str>,
    level: Level,
    start: Instant,
    active: bool,
}

impl TimingGuard {
    /// Returns `true` when the guard will emit a log entry on drop.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Elapsed time since the guard was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the guard without logging and return the elapsed duration.
    pub fn finish(mut self) -> Duration {
        self.active = false;
        self.start.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if self.active {
            log!(
                target: TELEMETRY_TARGET,
                self.level,
                "{} completed in {:.2?}",
                self.label,
                self.start.elapsed()
            );
        }
    }
}

/// Start timing a stage. The guard only logs when telemetry allows `level`.
pub fn timing_guard(label: impl Into<Cow<'static, str>>, level: Level) -> TimingGuard {
    let active = telemetry_allows(level) && log_enabled!(target: TELEMETRY_TARGET, level);
    TimingGuard {
        label: label.into(),
        level,
        start: Instant::now(),
        active,
    }
}

/// Switch telemetry on or off and set the most verbose level that is recorded.
pub fn configure(enabled: bool, level: LevelFilter) {
    let threshold = if enabled { level as u8 } else { 0 };
    TELEMETRY_THRESHOLD.store(threshold, Ordering::Relaxed);
}

/// Returns whether telemetry logging is currently enabled.
pub fn telemetry_enabled() -> bool {
    TELEMETRY_THRESHOLD.load(Ordering::Relaxed) > 0
}

/// Returns `true` when telemetry is enabled and `level` is within the configured threshold.
pub fn telemetry_allows(level: Level) -> bool {
    let threshold = TELEMETRY_THRESHOLD.load(Ordering::Relaxed);
    threshold > 0 && (level as u8) <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_controls_threshold() {
        configure(true, LevelFilter::Info);
        assert!(telemetry_enabled());
        assert!(telemetry_allows(Level::Warn));
        assert!(telemetry_allows(Level::Info));
        assert!(!telemetry_allows(Level::Debug));

        configure(false, LevelFilter::Trace);
        assert!(!telemetry_enabled());
        assert!(!telemetry_allows(Level::Error));
    }

    #[test]
    fn finish_returns_elapsed_without_logging() {
        let guard = timing_guard("test_stage", Level::Trace);
        let elapsed = guard.finish();
        assert!(elapsed >= Duration::ZERO);
    }
}
