//! Chemical supply tank accounting.

use serde::Serialize;

use crate::config::{TankCfg, TankUnits};

/// Remaining supply for a pump-fed chemical. Level is kept in tank units and
/// never goes below zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tank {
    capacity: f64,
    level: f64,
    units: TankUnits,
    alarm_empty_enabled: bool,
    alarm_empty_level: f64,
}

impl Tank {
    pub fn new(cfg: &TankCfg) -> Self {
        let mut t = Self {
            capacity: cfg.capacity.max(0.0),
            level: 0.0,
            units: cfg.units,
            alarm_empty_enabled: cfg.alarm_empty_enabled,
            alarm_empty_level: cfg.alarm_empty_level,
        };
        t.set_level(cfg.level);
        t
    }

    /// Apply new settings without touching the tracked level unless the new
    /// capacity is smaller.
    pub fn reconfigure(&mut self, cfg: &TankCfg) {
        self.capacity = cfg.capacity.max(0.0);
        self.units = cfg.units;
        self.alarm_empty_enabled = cfg.alarm_empty_enabled;
        self.alarm_empty_level = cfg.alarm_empty_level;
        self.set_level(self.level);
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn units(&self) -> TankUnits {
        self.units
    }

    /// Operator refill/measurement. Clamped to 0..=capacity.
    pub fn set_level(&mut self, level: f64) {
        let level = if level.is_finite() { level } else { 0.0 };
        self.level = level.clamp(0.0, self.capacity);
    }

    /// Level as a percentage of capacity; 0 for an unconfigured tank.
    pub fn level_pct(&self) -> f64 {
        if self.capacity <= 0.0 {
            0.0
        } else {
            self.level / self.capacity * 100.0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.level <= 0.0
    }

    pub fn has_fluid(&self) -> bool {
        !self.is_empty()
    }

    pub fn is_low(&self) -> bool {
        self.alarm_empty_enabled && self.level_pct() <= self.alarm_empty_level
    }

    /// Remove `ml` from the tank, converting to tank units. Returns the amount
    /// removed in tank units.
    pub fn draw_ml(&mut self, ml: f64) -> f64 {
        if !ml.is_finite() || ml <= 0.0 {
            return 0.0;
        }
        let units = ml / self.units.ml_per_unit();
        let before = self.level;
        self.level = (self.level - units).max(0.0);
        before - self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn gallon_tank(level: f64) -> Tank {
        Tank::new(&TankCfg {
            capacity: 2.0,
            level,
            units: TankUnits::Gal,
            alarm_empty_enabled: true,
            alarm_empty_level: 25.0,
        })
    }

    #[test]
    fn draws_in_tank_units() {
        let mut t = gallon_tank(2.0);
        let removed = t.draw_ml(crate::util::ML_PER_GALLON / 2.0);
        assert!((removed - 0.5).abs() < 1e-9);
        assert!((t.level() - 1.5).abs() < 1e-9);
        assert!(!t.is_low());
    }

    #[test]
    fn low_and_empty_thresholds() {
        let mut t = gallon_tank(0.5);
        assert!(t.is_low());
        assert!(t.has_fluid());
        t.set_level(-3.0);
        assert!(t.is_empty());
    }

    proptest! {
        #[test]
        fn level_never_negative(draws in proptest::collection::vec(0.0f64..5_000.0, 0..50)) {
            let mut t = gallon_tank(1.0);
            for d in draws {
                t.draw_ml(d);
                prop_assert!(t.level() >= 0.0);
            }
        }
    }
}
