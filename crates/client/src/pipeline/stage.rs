//! Per-URL stage tracking.

use linkscope_core::ErrorKind;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Where a single URL's analysis currently is.
///
/// Stages only move forward (steps may be skipped, e.g. a cache hit goes
/// straight from `Pending` to `Done`). `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Fetching,
    Extracting,
    Summarizing,
    Screenshotting,
    Caching,
    Done,
    Failed(ErrorKind),
}

impl Stage {
    fn rank(self) -> u8 {
        match self {
            Stage::Pending => 0,
            Stage::Fetching => 1,
            Stage::Extracting => 2,
            Stage::Summarizing => 3,
            Stage::Screenshotting => 4,
            Stage::Caching => 5,
            Stage::Done | Stage::Failed(_) => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed(_))
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Stage::Failed(_) => true,
            Stage::Pending => false,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Pending => f.write_str("pending"),
            Stage::Fetching => f.write_str("fetching"),
            Stage::Extracting => f.write_str("extracting"),
            Stage::Summarizing => f.write_str("summarizing"),
            Stage::Screenshotting => f.write_str("screenshotting"),
            Stage::Caching => f.write_str("caching"),
            Stage::Done => f.write_str("done"),
            Stage::Failed(kind) => write!(f, "failed ({})", kind.describe().0),
        }
    }
}

/// Counts runs that have left `Pending` but not yet finished.
#[derive(Debug, Default)]
pub struct ActivityGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Snapshot of an [`ActivityGauge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct Activity {
    pub active: usize,
    pub peak: usize,
}

impl ActivityGauge {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active runs observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Activity {
        Activity { active: self.active(), peak: self.peak() }
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Stage state for one run, reporting into a shared gauge.
///
/// Dropping a tracker mid-run (e.g. a cancelled future) still releases its
/// slot in the gauge.
#[derive(Debug)]
pub struct StageTracker {
    url: String,
    stage: Stage,
    gauge: Arc<ActivityGauge>,
}

impl StageTracker {
    pub fn new(url: impl Into<String>, gauge: Arc<ActivityGauge>) -> Self {
        Self { url: url.into(), stage: Stage::Pending, gauge }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: Stage) -> bool {
        let prev = self.stage;
        if !prev.can_advance_to(next) {
            tracing::warn!(url = %self.url, "ignored stage transition {prev} -> {next}");
            return false;
        }

        let was_active = prev != Stage::Pending;
        let is_active = !next.is_terminal();
        match (was_active, is_active) {
            (false, true) => self.gauge.enter(),
            (true, false) => self.gauge.leave(),
            _ => {}
        }

        self.stage = next;
        tracing::debug!(url = %self.url, "stage {prev} -> {next}");
        true
    }

    pub fn fail(&mut self, kind: ErrorKind) -> bool {
        self.advance(Stage::Failed(kind))
    }
}

impl Drop for StageTracker {
    fn drop(&mut self) {
        if self.stage != Stage::Pending && !self.stage.is_terminal() {
            self.gauge.leave();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkscope_core::error::NetworkKind;

    #[test]
    fn test_forward_transitions() {
        assert!(Stage::Pending.can_advance_to(Stage::Fetching));
        assert!(Stage::Fetching.can_advance_to(Stage::Extracting));
        assert!(Stage::Pending.can_advance_to(Stage::Done));
        assert!(Stage::Pending.can_advance_to(Stage::Screenshotting));
        assert!(Stage::Caching.can_advance_to(Stage::Done));
    }

    #[test]
    fn test_backward_and_terminal_transitions_rejected() {
        assert!(!Stage::Extracting.can_advance_to(Stage::Fetching));
        assert!(!Stage::Fetching.can_advance_to(Stage::Pending));
        assert!(!Stage::Fetching.can_advance_to(Stage::Fetching));
        assert!(!Stage::Done.can_advance_to(Stage::Caching));
        assert!(!Stage::Done.can_advance_to(Stage::Failed(ErrorKind::Input)));
        assert!(!Stage::Failed(ErrorKind::Input).can_advance_to(Stage::Done));
    }

    #[test]
    fn test_any_live_stage_can_fail() {
        let failed = Stage::Failed(ErrorKind::Network(NetworkKind::Timeout));
        for stage in [Stage::Pending, Stage::Fetching, Stage::Summarizing, Stage::Caching] {
            assert!(stage.can_advance_to(failed));
        }
    }

    #[test]
    fn test_tracker_gauge_accounting() {
        let gauge = Arc::new(ActivityGauge::default());
        let mut a = StageTracker::new("a", gauge.clone());
        let mut b = StageTracker::new("b", gauge.clone());
        assert_eq!(gauge.active(), 0);

        assert!(a.advance(Stage::Fetching));
        assert!(b.advance(Stage::Fetching));
        assert!(a.advance(Stage::Extracting));
        assert_eq!(gauge.snapshot(), Activity { active: 2, peak: 2 });

        assert!(a.advance(Stage::Done));
        assert!(b.fail(ErrorKind::Input));
        assert_eq!(gauge.snapshot(), Activity { active: 0, peak: 2 });

        assert!(!a.advance(Stage::Caching));
        assert_eq!(a.stage(), Stage::Done);
    }

    #[test]
    fn test_cache_hit_never_counts_as_active() {
        let gauge = Arc::new(ActivityGauge::default());
        let mut tracker = StageTracker::new("hit", gauge.clone());
        tracker.advance(Stage::Done);
        assert_eq!(gauge.snapshot(), Activity { active: 0, peak: 0 });
    }

    #[test]
    fn test_dropped_tracker_releases_slot() {
        let gauge = Arc::new(ActivityGauge::default());
        {
            let mut tracker = StageTracker::new("x", gauge.clone());
            tracker.advance(Stage::Fetching);
            assert_eq!(gauge.active(), 1);
        }
        assert_eq!(gauge.active(), 0);
    }
}
