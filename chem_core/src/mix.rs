//! Post-dose mixing timer.

use std::time::{Duration, Instant};

/// Settling period after a dose or on operator request. Time only accrues on
/// ticks where mixing is allowed to advance.
#[derive(Debug, Clone)]
pub struct MixCycle {
    pub total: Duration,
    pub time_mixed: Duration,
    pub manual: bool,
    last_checked: Instant,
}

impl MixCycle {
    pub fn new(total: Duration, time_mixed: Duration, manual: bool, now: Instant) -> Self {
        Self {
            total,
            time_mixed: time_mixed.min(total),
            manual,
            last_checked: now,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.time_mixed)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Advance to `now`. When `can_advance` is false the elapsed time is
    /// discarded so a paused mix resumes where it left off.
    pub fn advance(&mut self, now: Instant, can_advance: bool) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_checked);
        self.last_checked = now;
        if can_advance {
            self.time_mixed = (self.time_mixed + elapsed).min(self.total);
        }
        self.remaining()
    }

    /// Follow a configuration change of the mixing time (auto mixes only).
    pub fn set_total(&mut self, total: Duration) {
        self.total = total;
        self.time_mixed = self.time_mixed.min(total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pauses_without_losing_progress() {
        let t0 = Instant::now();
        let mut m = MixCycle::new(Duration::from_secs(10), Duration::ZERO, false, t0);
        assert_eq!(m.advance(t0 + Duration::from_secs(4), true), Duration::from_secs(6));
        assert_eq!(m.advance(t0 + Duration::from_secs(9), false), Duration::from_secs(6));
        assert_eq!(m.advance(t0 + Duration::from_secs(15), true), Duration::ZERO);
        assert!(m.is_complete());
    }

    #[test]
    fn shrinking_total_clamps_progress() {
        let t0 = Instant::now();
        let mut m = MixCycle::new(Duration::from_secs(100), Duration::from_secs(80), false, t0);
        m.set_total(Duration::from_secs(50));
        assert!(m.is_complete());
    }
}
