//! Rolling ORP demand samples and their least-squares trend.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bounded time series of (timestamp, demand) samples.
///
/// Samples older than `window` are dropped on every push, and the ring never
/// holds more than `capacity` entries.
#[derive(Debug, Clone)]
pub struct DemandHistory {
    samples: VecDeque<(Instant, f64)>,
    window: Duration,
    capacity: usize,
}

impl Default for DemandHistory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60), 240)
    }
}

impl DemandHistory {
    pub fn new(window: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            window,
            capacity,
        }
    }

    pub fn push(&mut self, at: Instant, demand: f64) {
        if !demand.is_finite() {
            return;
        }
        while let Some(&(t, _)) = self.samples.front() {
            if at.saturating_duration_since(t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((at, demand));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Least-squares slope in demand units per hour. 0.0 until two samples
    /// with distinct timestamps exist.
    pub fn slope_per_hour(&self) -> f64 {
        let Some(&(t0, _)) = self.samples.front() else {
            return 0.0;
        };
        let n = self.samples.len() as f64;
        if n < 2.0 {
            return 0.0;
        }
        let xs = self
            .samples
            .iter()
            .map(|(t, d)| (t.saturating_duration_since(t0).as_secs_f64() / 3_600.0, *d));
        let (sx, sy) = xs.clone().fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
        let (mx, my) = (sx / n, sy / n);
        let (sxx, sxy) = xs.fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
            let dx = x - mx;
            (sxx + dx * dx, sxy + dx * (y - my))
        });
        if sxx <= f64::EPSILON {
            0.0
        } else {
            sxy / sxx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slope_of_linear_series() {
        let mut h = DemandHistory::default();
        let t0 = Instant::now();
        // +10 mV every 6 minutes = +100 mV/hour
        for i in 0..5u64 {
            h.push(t0 + Duration::from_secs(i * 360), 10.0 * i as f64);
        }
        assert!((h.slope_per_hour() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn flat_or_short_series_has_zero_slope() {
        let mut h = DemandHistory::default();
        let t0 = Instant::now();
        assert_eq!(h.slope_per_hour(), 0.0);
        h.push(t0, 5.0);
        assert_eq!(h.slope_per_hour(), 0.0);
        h.push(t0, 9.0);
        assert_eq!(h.slope_per_hour(), 0.0);
    }

    #[test]
    fn window_and_capacity_evict_old_samples() {
        let mut h = DemandHistory::new(Duration::from_secs(60), 3);
        let t0 = Instant::now();
        for i in 0..5u64 {
            h.push(t0 + Duration::from_secs(i), i as f64);
        }
        assert_eq!(h.len(), 3);
        h.push(t0 + Duration::from_secs(600), 1.0);
        assert_eq!(h.len(), 1);
    }
}
