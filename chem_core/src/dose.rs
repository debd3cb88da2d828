//! A single bounded dosing operation and its finished record.

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::ChemicalKind;
use crate::status::{CancelReason, DoseMethod};
use crate::util::round_to;

/// An active dose. Volume is mL for pumps and lbs of chlorine for chlorinator doses.
#[derive(Debug, Clone)]
pub struct Dose {
    pub id: u64,
    pub method: DoseMethod,
    /// Target volume; negative for calibration doses (time bounded only).
    pub volume: f64,
    /// Target time in seconds.
    pub time: f64,
    pub volume_dosed: f64,
    pub time_dosed: Duration,
    pub started: Instant,
    pub started_wall: DateTime<Local>,
    /// Timestamp of the previous confirmed actuator activation.
    pub last_latch: Option<Instant>,
    pub demand: f64,
    pub level: Option<f64>,
}

impl Dose {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        method: DoseMethod,
        volume: f64,
        time: f64,
        volume_dosed: f64,
        time_dosed: Duration,
        now: Instant,
        demand: f64,
        level: Option<f64>,
    ) -> Self {
        Self {
            id,
            method,
            volume,
            time,
            volume_dosed,
            time_dosed,
            started: now,
            started_wall: Local::now(),
            last_latch: None,
            demand,
            level,
        }
    }

    /// Whole seconds left, never negative.
    pub fn time_remaining(&self) -> f64 {
        (self.time - self.time_dosed.as_secs_f64()).max(0.0).floor()
    }

    /// Volume left; calibration doses report 0 because they are not volume bounded.
    pub fn volume_remaining(&self) -> f64 {
        if self.volume < 0.0 {
            0.0
        } else {
            (self.volume - self.volume_dosed).max(0.0)
        }
    }

    /// A dose is done once its time runs out, or (for volume-bounded doses) once
    /// the volume is delivered.
    pub fn is_satisfied(&self) -> bool {
        if self.time_remaining() <= 0.0 {
            return true;
        }
        self.volume >= 0.0 && self.volume_remaining() <= 0.0
    }

    /// Account for `elapsed` of confirmed actuator on-time at `rate_per_sec`.
    /// Returns the volume added.
    pub fn accrue(&mut self, elapsed: Duration, rate_per_sec: f64) -> f64 {
        let added = round_to(rate_per_sec * elapsed.as_secs_f64(), 6);
        self.volume_dosed = round_to(self.volume_dosed + added, 6);
        self.time_dosed += elapsed;
        added
    }

    pub fn finish(&self, chemical: ChemicalKind, reason: CancelReason) -> DoseRecord {
        DoseRecord {
            id: self.id,
            chemical,
            method: self.method,
            start: self.started_wall,
            end: Local::now(),
            reason,
            volume: self.volume,
            volume_dosed: self.volume_dosed,
            time: self.time,
            time_dosed: self.time_dosed.as_secs_f64(),
            demand: self.demand,
            level: self.level,
        }
    }
}

/// Immutable summary of a finished dose, emitted to observers and the dose log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoseRecord {
    pub id: u64,
    pub chemical: ChemicalKind,
    pub method: DoseMethod,
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub reason: CancelReason,
    pub volume: f64,
    pub volume_dosed: f64,
    pub time: f64,
    pub time_dosed: f64,
    pub demand: f64,
    pub level: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dose(volume: f64, time: f64) -> Dose {
        Dose::new(1, DoseMethod::Manual, volume, time, 0.0, Duration::ZERO, Instant::now(), 0.0, None)
    }

    #[test]
    fn remaining_values_floor_and_clamp() {
        let mut d = dose(100.0, 60.0);
        d.accrue(Duration::from_millis(30_500), 100.0 / 60.0);
        assert_eq!(d.time_remaining(), 29.0);
        assert!((d.volume_remaining() - 49.166_667).abs() < 1e-6);
        d.accrue(Duration::from_secs(120), 100.0 / 60.0);
        assert_eq!(d.time_remaining(), 0.0);
        assert_eq!(d.volume_remaining(), 0.0);
        assert!(d.is_satisfied());
    }

    #[test]
    fn calibration_is_time_bounded() {
        let mut d = dose(-1.0, 10.0);
        d.method = DoseMethod::Calibration;
        d.accrue(Duration::from_secs(5), 10.0);
        assert_eq!(d.volume_remaining(), 0.0);
        assert!(!d.is_satisfied());
        d.accrue(Duration::from_secs(5), 10.0);
        assert!(d.is_satisfied());
    }
}
