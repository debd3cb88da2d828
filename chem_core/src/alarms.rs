//! Interlock alarms and warnings, recomputed on every controller poll.
//!
//! Nothing here latches: each poll rebuilds the flags from configuration and
//! the freshest runtime readings, so a cleared condition clears its alarm.

use serde::Serialize;

use crate::chemistry::WaterBalance;
use crate::config::{ChemicalCfg, ChemicalKind, KindCfg};
use crate::pump::LATCH;
use crate::tank::Tank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TankAlarm {
    #[default]
    Ok,
    Low,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelAlarm {
    #[default]
    Ok,
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChemAlarms {
    pub tank: TankAlarm,
    pub level: LevelAlarm,
    pub probe_fault: bool,
    pub pump_fault: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChemWarnings {
    pub daily_limit_reached: bool,
    pub ph_lockout: bool,
    pub chlorinator_fault: bool,
    /// A chlorinator dose was requested without a production model.
    pub invalid_setup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ControllerAlarms {
    pub flow: bool,
    pub flow_sensor_fault: bool,
    pub comms: bool,
    pub freeze_protect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ControllerWarnings {
    pub water_chemistry: WaterBalance,
}

impl ChemAlarms {
    /// Display strings for every active alarm.
    pub fn messages(&self, kind: ChemicalKind) -> Vec<String> {
        let mut out = Vec::new();
        match self.tank {
            TankAlarm::Ok => {}
            TankAlarm::Low => out.push(format!("{kind} tank low")),
            TankAlarm::Empty => out.push(format!("{kind} tank empty")),
        }
        match self.level {
            LevelAlarm::Ok => {}
            LevelAlarm::Low => out.push(format!("{kind} level low")),
            LevelAlarm::High => out.push(format!("{kind} level high")),
        }
        if self.probe_fault {
            out.push(format!("{kind} probe fault"));
        }
        if self.pump_fault {
            out.push(format!("{kind} pump fault"));
        }
        out
    }
}

impl ChemWarnings {
    pub fn messages(&self, kind: ChemicalKind) -> Vec<String> {
        let mut out = Vec::new();
        if self.daily_limit_reached {
            out.push(format!("{kind} daily limit reached"));
        }
        if self.ph_lockout {
            out.push(format!("{kind} locked out by high pH"));
        }
        if self.chlorinator_fault {
            out.push("chlorinator fault".to_string());
        }
        if self.invalid_setup {
            out.push(format!("{kind} chlorinator has no production model"));
        }
        out
    }
}

impl ControllerAlarms {
    pub fn messages(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.flow {
            out.push("no flow".to_string());
        }
        if self.flow_sensor_fault {
            out.push("flow sensor fault".to_string());
        }
        if self.comms {
            out.push("communication fault".to_string());
        }
        if self.freeze_protect {
            out.push("freeze protection".to_string());
        }
        out
    }
}

/// Everything the per-chemical evaluation looks at.
#[derive(Debug, Clone, Copy)]
pub struct ChemicalAlarmInputs<'a> {
    pub cfg: &'a ChemicalCfg,
    /// Present only when the chemical is fed by a relay pump.
    pub tank: Option<&'a Tank>,
    pub level: Option<f64>,
    pub flow_detected: bool,
    pub probe_fault: bool,
    pub pump_fault: bool,
    pub chlorinator_fault: bool,
    pub invalid_setup: bool,
    pub daily_volume_dosed: f64,
    /// Sibling pH reading, for the ORP lockout warning.
    pub ph_level: Option<f64>,
}

pub struct ControllerAlarmInputs {
    pub has_flow_sensor: bool,
    pub body_on: bool,
    pub flow_detected: bool,
    pub flow_sensor_fault: bool,
    pub comms_fault: bool,
    pub freeze_active: bool,
    /// Any enabled chemical disables itself on freeze.
    pub any_disable_on_freeze: bool,
}

pub struct AlarmEvaluator;

impl AlarmEvaluator {
    /// Daily limit: one more latch would push the day's volume past the cap.
    pub fn daily_limit_reached(cfg: &ChemicalCfg, daily_volume_dosed: f64) -> bool {
        let Some(pump) = cfg.pump.as_ref() else {
            return false;
        };
        let next_latch = pump.ml_per_sec() * LATCH.as_secs_f64();
        cfg.max_daily_volume <= daily_volume_dosed + next_latch
    }

    pub fn chemical(inputs: &ChemicalAlarmInputs<'_>) -> (ChemAlarms, ChemWarnings) {
        let cfg = inputs.cfg;
        let mut alarms = ChemAlarms {
            level: Self::level_alarm(inputs),
            probe_fault: cfg.probe.is_present() && inputs.probe_fault,
            ..ChemAlarms::default()
        };
        let mut warnings = ChemWarnings::default();
        if !cfg.enabled {
            return (alarms, warnings);
        }

        alarms.pump_fault = inputs.pump_fault;
        if let Some(tank) = inputs.tank {
            alarms.tank = if tank.is_empty() {
                TankAlarm::Empty
            } else if tank.is_low() {
                TankAlarm::Low
            } else {
                TankAlarm::Ok
            };
        }
        warnings.daily_limit_reached = Self::daily_limit_reached(cfg, inputs.daily_volume_dosed);
        warnings.chlorinator_fault = cfg.uses_chlorinator() && inputs.chlorinator_fault;
        warnings.invalid_setup = inputs.invalid_setup;
        if let KindCfg::Orp(orp) = &cfg.kind {
            let has_actuator = cfg.pump.is_some() || orp.chlorinator.is_some();
            warnings.ph_lockout = has_actuator
                && cfg.probe.is_present()
                && inputs.ph_level.is_some_and(|ph| ph > orp.ph_lockout);
        }
        (alarms, warnings)
    }

    /// Tolerance-band alarm. Needs a probe, flow and a reading; independent of
    /// whether dosing is enabled.
    fn level_alarm(inputs: &ChemicalAlarmInputs<'_>) -> LevelAlarm {
        let tol = inputs.cfg.tolerance;
        if !tol.enabled || !inputs.cfg.probe.is_present() || !inputs.flow_detected {
            return LevelAlarm::Ok;
        }
        match inputs.level {
            Some(l) if l < tol.low => LevelAlarm::Low,
            Some(l) if l > tol.high => LevelAlarm::High,
            _ => LevelAlarm::Ok,
        }
    }

    pub fn controller(inputs: &ControllerAlarmInputs) -> ControllerAlarms {
        ControllerAlarms {
            flow: inputs.has_flow_sensor && inputs.body_on && !inputs.flow_detected,
            flow_sensor_fault: inputs.flow_sensor_fault,
            comms: inputs.comms_fault,
            freeze_protect: inputs.freeze_active && inputs.body_on && inputs.any_disable_on_freeze,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OrpCfg, PhCfg, ProbeCfg, PumpCfg, TankCfg, Tolerance};

    fn ph_cfg() -> ChemicalCfg {
        let mut c = ChemicalCfg::new(KindCfg::Ph(PhCfg::default()));
        c.pump = Some(PumpCfg {
            binding: "relay:1".into(),
            rated_flow: 100.0,
        });
        c.probe = ProbeCfg::Other;
        c.tolerance = Tolerance {
            enabled: true,
            low: 7.2,
            high: 7.6,
        };
        c.max_daily_volume = 1_000.0;
        c
    }

    fn inputs<'a>(cfg: &'a ChemicalCfg, tank: Option<&'a Tank>) -> ChemicalAlarmInputs<'a> {
        ChemicalAlarmInputs {
            cfg,
            tank,
            level: Some(7.9),
            flow_detected: true,
            probe_fault: false,
            pump_fault: false,
            chlorinator_fault: false,
            invalid_setup: false,
            daily_volume_dosed: 0.0,
            ph_level: None,
        }
    }

    #[test]
    fn tank_alarm_empty_beats_low() {
        let cfg = ph_cfg();
        let tank = Tank::new(&TankCfg {
            capacity: 1_000.0,
            level: 0.0,
            ..TankCfg::default()
        });
        let (a, _) = AlarmEvaluator::chemical(&inputs(&cfg, Some(&tank)));
        assert_eq!(a.tank, TankAlarm::Empty);
        assert_eq!(a.level, LevelAlarm::High);
    }

    #[test]
    fn disabled_chemical_still_reports_level() {
        let mut cfg = ph_cfg();
        cfg.enabled = false;
        let tank = Tank::new(&TankCfg::default());
        let mut i = inputs(&cfg, Some(&tank));
        i.daily_volume_dosed = 5_000.0;
        let (a, w) = AlarmEvaluator::chemical(&i);
        assert_eq!(a.level, LevelAlarm::High);
        assert_eq!(a.tank, TankAlarm::Ok);
        assert!(!w.daily_limit_reached);
    }

    #[test]
    fn daily_limit_accounts_for_next_latch() {
        let cfg = ph_cfg();
        // 100 mL/min => 5 mL per 3 s latch
        assert!(!AlarmEvaluator::daily_limit_reached(&cfg, 994.0));
        assert!(AlarmEvaluator::daily_limit_reached(&cfg, 995.0));
    }

    #[test]
    fn orp_lockout_needs_high_ph() {
        let mut cfg = ChemicalCfg::new(KindCfg::Orp(OrpCfg::default()));
        cfg.pump = Some(PumpCfg {
            binding: "relay:2".into(),
            rated_flow: 50.0,
        });
        cfg.probe = ProbeCfg::Other;
        let mut i = inputs(&cfg, None);
        i.ph_level = Some(7.9);
        assert!(AlarmEvaluator::chemical(&i).1.ph_lockout);
        i.ph_level = Some(7.5);
        assert!(!AlarmEvaluator::chemical(&i).1.ph_lockout);
    }

    #[test]
    fn freeze_protect_is_composite() {
        let mut i = ControllerAlarmInputs {
            has_flow_sensor: true,
            body_on: true,
            flow_detected: false,
            flow_sensor_fault: false,
            comms_fault: false,
            freeze_active: true,
            any_disable_on_freeze: true,
        };
        let a = AlarmEvaluator::controller(&i);
        assert!(a.flow && a.freeze_protect);
        i.any_disable_on_freeze = false;
        assert!(!AlarmEvaluator::controller(&i).freeze_protect);
    }
}
