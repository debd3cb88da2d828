//! Time-proportioning control of an existing chlorinator for ORP.
//!
//! Instead of a relay pump, the ORP doser runs the chlorinator at full output
//! for a fraction of a fixed 15 minute window. The fraction comes from the mV
//! demand, scaled for undersized bodies and nudged by the demand trend.

use std::time::{Duration, Instant};

use chem_traits::{ChlorinatorCommand, ChlorinatorControl, ChlorinatorRuntimeState};
use eyre::WrapErr;

use crate::config::{ChlorDosingMethod, ChlorinatorLink};
use crate::dosing_strategy::DosePlan;
use crate::error::{ChemError, Result};
use crate::hw_error::map_hw_error;
use crate::pump::{FAULT_AFTER_FAILURES, LATCH};
use crate::util::{SECS_PER_DAY, round_to};

/// Duty-cycle window.
pub const CHLORINATION_INTERVAL: Duration = Duration::from_secs(15 * 60);

const FULL_ON_DEMAND: f64 = 50.0;
const NO_DOSE_DEMAND: f64 = -20.0;
const BASELINE_PCT: f64 = 28.57;
const TREND_THRESHOLD: f64 = 5.0;

/// Fraction of the chlorination window to run at full output.
///
/// `demand` is setpoint minus reading in mV, `slope` its trend in mV/hour and
/// `adj` the small-body size adjustment. Returns `None` when ORP is far enough
/// above setpoint that no chlorine is wanted.
pub fn percent_of_time(demand: f64, slope: f64, adj: f64) -> Option<f64> {
    if !demand.is_finite() || demand < NO_DOSE_DEMAND {
        return None;
    }
    if demand > FULL_ON_DEMAND {
        return Some(1.0);
    }
    let mut pct = ((100.0 / 70.0) * demand * adj + BASELINE_PCT) / 100.0;
    let slope = if slope.is_finite() { slope } else { 0.0 };
    // First matching rule wins.
    if slope > TREND_THRESHOLD && demand < 0.0 {
        pct *= 0.5;
    } else if slope < TREND_THRESHOLD && demand > 0.0 {
        pct *= 1.1;
    } else if slope > 0.0 && demand > 0.0 {
        pct *= 0.5;
    }
    Some(pct.clamp(0.0, 1.0))
}

/// Remaining part of the chlorination window after the last dose started.
/// Zero when no dose ran inside the window.
pub fn interval_remainder(last_dose_start: Option<Instant>, now: Instant) -> Duration {
    match last_dose_start {
        Some(t) => CHLORINATION_INTERVAL.saturating_sub(now.saturating_duration_since(t)),
        None => Duration::ZERO,
    }
}

#[derive(Debug)]
pub struct ChlorinatorBridge {
    link: ChlorinatorLink,
    is_on: bool,
    consecutive_failures: u32,
}

impl ChlorinatorBridge {
    pub fn new(link: ChlorinatorLink) -> Self {
        Self {
            link,
            is_on: false,
            consecutive_failures: 0,
        }
    }

    pub fn link(&self) -> &ChlorinatorLink {
        &self.link
    }

    pub fn id(&self) -> u8 {
        self.link.id
    }

    /// The bridge only drives output in target mode; `Chlor` leaves the
    /// chlorinator to its own schedule and just monitors.
    pub fn drives_output(&self) -> bool {
        self.link.method == ChlorDosingMethod::Target
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn is_faulted(&self) -> bool {
        self.consecutive_failures >= FAULT_AFTER_FAILURES
    }

    /// Chlorine production in lbs per second at full output.
    pub fn chlorine_per_sec(&self) -> std::result::Result<f64, ChemError> {
        match self.link.lbs_per_day {
            Some(lbs) if lbs > 0.0 => Ok(lbs / SECS_PER_DAY),
            _ => Err(ChemError::EquipmentNotFound(format!(
                "chlorinator {} has no production model",
                self.link.id
            ))),
        }
    }

    /// Rate used for accrual; 0 when no model is configured.
    pub fn rate_per_sec(&self) -> f64 {
        self.chlorine_per_sec().unwrap_or(0.0)
    }

    /// Dose for the next window. `Ok(None)` means no chlorine is wanted.
    pub fn plan(&self, demand: f64, slope: f64, adj: f64) -> std::result::Result<Option<DosePlan>, ChemError> {
        let rate = self.chlorine_per_sec()?;
        let Some(pct) = percent_of_time(demand, slope, adj) else {
            return Ok(None);
        };
        let time = (CHLORINATION_INTERVAL.as_secs_f64() * pct).round();
        let volume = round_to(rate * time, 6);
        tracing::debug!(id = self.link.id, demand, slope, adj, pct, time, volume, "chlorinator duty cycle");
        if volume > 0.0 && time > 0.0 {
            Ok(Some(DosePlan { volume, time }))
        } else {
            Ok(None)
        }
    }

    pub fn state(&self, control: &dyn ChlorinatorControl) -> Result<ChlorinatorRuntimeState> {
        control
            .chlorinator_state(self.link.id)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("chlorinator state")
    }

    /// Assert `is_dosing` for one latch window.
    pub fn latch(&mut self, control: &dyn ChlorinatorControl) -> Result<bool> {
        let cmd = ChlorinatorCommand {
            disabled: None,
            is_dosing: Some(true),
            latch: Some(LATCH),
        };
        match control.set_chlorinator(self.link.id, cmd) {
            Ok(st) if st.is_dosing && !st.disabled => {
                self.consecutive_failures = 0;
                self.is_on = true;
                tracing::trace!(id = self.link.id, output = st.current_output, "chlorinator latched");
                Ok(true)
            }
            Ok(st) => {
                self.record_failure();
                tracing::warn!(
                    id = self.link.id,
                    disabled = st.disabled,
                    failures = self.consecutive_failures,
                    "chlorinator did not accept dosing"
                );
                Ok(false)
            }
            Err(e) => {
                self.record_failure();
                Err(eyre::Report::new(map_hw_error(&*e)))
                    .wrap_err_with(|| format!("latch chlorinator {}", self.link.id))
            }
        }
    }

    pub fn stop(&mut self, control: &dyn ChlorinatorControl) -> Result<()> {
        self.is_on = false;
        let cmd = ChlorinatorCommand {
            is_dosing: Some(false),
            ..ChlorinatorCommand::default()
        };
        control
            .set_chlorinator(self.link.id, cmd)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("chlorinator stop")?;
        Ok(())
    }

    fn record_failure(&mut self) {
        self.is_on = false;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(60.0, 0.0, Some(1.0))]
    #[case(60.0, 100.0, Some(1.0))]
    #[case(-25.0, 0.0, None)]
    #[case(0.0, 0.0, Some(0.2857))]
    #[case(-10.0, 10.0, Some(0.071_428_5))]
    fn duty_cycle(#[case] demand: f64, #[case] slope: f64, #[case] expect: Option<f64>) {
        let got = percent_of_time(demand, slope, 1.0);
        match (got, expect) {
            (Some(g), Some(e)) => assert!((g - e).abs() < 1e-4, "got {g}, want {e}"),
            (g, e) => assert_eq!(g, e),
        }
    }

    #[test]
    fn trend_pushes_harder_when_not_correcting() {
        let base = ((100.0 / 70.0) * 20.0 + 28.57) / 100.0;
        let slow = percent_of_time(20.0, -3.0, 1.0).expect("dose");
        let fast = percent_of_time(20.0, 12.0, 1.0).expect("dose");
        assert!((slow - base * 1.1).abs() < 1e-9);
        assert!((fast - base * 0.5).abs() < 1e-9);
    }

    #[test]
    fn missing_model_is_equipment_not_found() {
        let b = ChlorinatorBridge::new(ChlorinatorLink {
            id: 1,
            method: ChlorDosingMethod::Target,
            lbs_per_day: None,
        });
        assert!(matches!(b.plan(30.0, 0.0, 1.0), Err(ChemError::EquipmentNotFound(_))));
    }

    #[test]
    fn plan_scales_window_by_output() {
        let b = ChlorinatorBridge::new(ChlorinatorLink {
            id: 1,
            method: ChlorDosingMethod::Target,
            lbs_per_day: Some(2.4),
        });
        let plan = b.plan(60.0, 0.0, 1.0).expect("plan").expect("dose");
        assert_eq!(plan.time, 900.0);
        assert!((plan.volume - 0.025).abs() < 1e-9);
    }

    #[test]
    fn remainder_of_window() {
        let t0 = Instant::now();
        assert_eq!(interval_remainder(None, t0), Duration::ZERO);
        let later = t0 + Duration::from_secs(600);
        assert_eq!(interval_remainder(Some(t0), later), Duration::from_secs(300));
        assert_eq!(interval_remainder(Some(t0), t0 + Duration::from_secs(2_000)), Duration::ZERO);
    }
}
