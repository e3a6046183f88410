//! Defines watchers that observe runners to produce higher-level events.

use crate::config::ProgressConfig;

/// Watches a runner's overall progress and fires at fixed percentage milestones.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub(crate) struct ProgressWatcher {
    milestone_percent: u32,
    next_milestone: u32,
}

impl ProgressWatcher {
    /// Creates a new `ProgressWatcher`.
    pub(crate) fn new(config: &ProgressConfig) -> Self {
        Self {
            milestone_percent: u32::from(config.milestone_percent.clamp(1, 100)),
            next_milestone: 1,
        }
    }

    /// Processes the latest overall progress ratio.
    /// Returns `true` if one or more milestones were crossed since the last call.
    pub(crate) fn process(&mut self, overall_ratio: f64) -> bool {
        // Absorbs float noise such as 0.3 * 100.0 landing just under 30.
        let percent = (overall_ratio.clamp(0.0, 1.0) * 100.0 + 1e-9).floor() as u32;
        let reached = percent / self.milestone_percent;
        if reached >= self.next_milestone {
            self.next_milestone = reached + 1;
            true
        } else {
            false
        }
    }

    /// Arms the watcher again from zero, e.g. after a reset.
    pub(crate) fn rearm(&mut self) {
        self.next_milestone = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(percent: u8) -> ProgressWatcher {
        ProgressWatcher::new(&ProgressConfig {
            milestone_percent: percent,
        })
    }

    #[test]
    fn test_fires_once_per_milestone() {
        let mut w = watcher(25);
        assert!(!w.process(0.0));
        assert!(!w.process(0.2));
        assert!(w.process(0.25));
        assert!(!w.process(0.3));
        assert!(w.process(0.8));
        assert!(!w.process(0.8));
        assert!(w.process(1.0));
    }

    #[test]
    fn test_float_noise_does_not_skip_milestone() {
        let mut w = watcher(10);
        assert!(w.process(0.1 + 0.2));
    }

    #[test]
    fn test_rearm_starts_over() {
        let mut w = watcher(50);
        assert!(w.process(1.0));
        w.rearm();
        assert!(!w.process(0.1));
        assert!(w.process(0.5));
    }

    #[test]
    fn test_zero_percent_is_clamped() {
        let mut w = watcher(0);
        assert!(w.process(0.01));
    }
}
