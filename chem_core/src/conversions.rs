//! `From` implementations bridging `chem_config` types to `chem_core` types.
//!
//! Anything that needs the whole config (body capacities, chlorinator
//! models) goes through `ControllerCfg::from_config`.

use std::time::Duration;

use crate::config::{
    AcidType, BodyCapacities, ChemicalCfg, ChlorDosingMethod, ChlorinatorLink, ControllerCfg, DosingMethod,
    FlowSensorCfg, FlowSensorKind, GenericCfg, KindCfg, OrpCfg, PhCfg, PhSupply, ProbeCfg, PumpCfg, TankCfg,
    TankUnits, Tolerance, WaterCfg,
};
use crate::util::secs_to_duration;

// ── Enums ────────────────────────────────────────────────────────────────────

impl From<chem_config::DosingMethod> for DosingMethod {
    fn from(m: chem_config::DosingMethod) -> Self {
        match m {
            chem_config::DosingMethod::Time => Self::Time,
            chem_config::DosingMethod::Volume => Self::Volume,
            chem_config::DosingMethod::VolumeTime => Self::VolumeTime,
        }
    }
}

impl From<chem_config::TankUnits> for TankUnits {
    fn from(u: chem_config::TankUnits) -> Self {
        match u {
            chem_config::TankUnits::Ml => Self::Ml,
            chem_config::TankUnits::L => Self::L,
            chem_config::TankUnits::Gal => Self::Gal,
            chem_config::TankUnits::Oz => Self::Oz,
        }
    }
}

impl From<chem_config::PhSupply> for PhSupply {
    fn from(s: chem_config::PhSupply) -> Self {
        match s {
            chem_config::PhSupply::Acid => Self::Acid,
            chem_config::PhSupply::Base => Self::Base,
        }
    }
}

impl From<chem_config::ChlorDosingMethod> for ChlorDosingMethod {
    fn from(m: chem_config::ChlorDosingMethod) -> Self {
        match m {
            chem_config::ChlorDosingMethod::Chlor => Self::Chlor,
            chem_config::ChlorDosingMethod::Target => Self::Target,
        }
    }
}

// ── Sub-structs ──────────────────────────────────────────────────────────────

impl From<&chem_config::TankCfg> for TankCfg {
    fn from(c: &chem_config::TankCfg) -> Self {
        Self {
            capacity: c.capacity,
            level: c.level,
            units: c.units.into(),
            alarm_empty_enabled: c.alarm_empty_enabled,
            alarm_empty_level: c.alarm_empty_level,
        }
    }
}

impl From<&chem_config::ToleranceCfg> for Tolerance {
    fn from(c: &chem_config::ToleranceCfg) -> Self {
        Self {
            enabled: c.enabled,
            low: c.low,
            high: c.high,
        }
    }
}

impl From<&chem_config::ProbeCfg> for ProbeCfg {
    fn from(c: &chem_config::ProbeCfg) -> Self {
        match c.kind {
            chem_config::ProbeKind::None => Self::None,
            chem_config::ProbeKind::Remote => Self::Remote {
                binding: c.binding.clone(),
            },
            chem_config::ProbeKind::Other => Self::Other,
        }
    }
}

impl From<&chem_config::FlowSensorCfg> for FlowSensorCfg {
    fn from(c: &chem_config::FlowSensorCfg) -> Self {
        let kind = match c.kind {
            chem_config::FlowSensorKind::None => FlowSensorKind::None,
            chem_config::FlowSensorKind::Switch => FlowSensorKind::Switch,
            chem_config::FlowSensorKind::Rate => FlowSensorKind::Rate {
                minimum: c.minimum_flow,
            },
            chem_config::FlowSensorKind::Pressure => FlowSensorKind::Pressure {
                minimum: c.minimum_pressure,
            },
        };
        Self {
            kind,
            binding: c.binding.clone(),
        }
    }
}

/// Relay pumps only; `PumpKind::None` maps to no actuator.
fn pump_from(c: &chem_config::PumpCfg) -> Option<PumpCfg> {
    match c.kind {
        chem_config::PumpKind::None => None,
        chem_config::PumpKind::Relay => Some(PumpCfg {
            binding: c.binding.clone(),
            rated_flow: c.rated_flow,
        }),
    }
}

// ── Chemicals ────────────────────────────────────────────────────────────────

impl ChemicalCfg {
    /// Convert one configured chemical. `chlorinators` supplies production
    /// rates for an ORP doser's linked chlorinator.
    pub fn from_config(c: &chem_config::ChemicalCfg, chlorinators: &[chem_config::ChlorinatorCfg]) -> Self {
        let kind = match c.kind {
            chem_config::ChemicalKind::Ph => KindCfg::Ph(PhCfg {
                supply: c.ph_supply.into(),
                acid: AcidType::parse(&c.acid_type).unwrap_or_default(),
                dose_priority: c.dose_priority,
            }),
            chem_config::ChemicalKind::Orp => {
                let chlorinator = if c.use_chlorinator {
                    c.chlorinator_id.map(|id| ChlorinatorLink {
                        id,
                        method: c.chlor_dosing_method.into(),
                        lbs_per_day: chlorinators
                            .iter()
                            .find(|ch| ch.id == id)
                            .and_then(chem_config::ChlorinatorCfg::lbs_per_day),
                    })
                } else {
                    None
                };
                KindCfg::Orp(OrpCfg {
                    chlorinator,
                    ph_lockout: c.ph_lockout,
                })
            }
            chem_config::ChemicalKind::Generic => KindCfg::Generic(GenericCfg {
                dosing_volume: c.dosing_volume,
                disable_chlorinator: c.disable_chlorinator,
            }),
        };
        Self {
            kind,
            enabled: c.enabled,
            suspend_dosing: c.suspend_dosing,
            setpoint: c.setpoint,
            tolerance: (&c.tolerance).into(),
            dosing_method: c.dosing_method.into(),
            max_dosing_time: c.max_dosing_time,
            max_dosing_volume: c.max_dosing_volume,
            max_daily_volume: c.max_daily_volume,
            mixing_time: c.mixing_time,
            flow_only_mixing: c.flow_only_mixing,
            start_delay: secs_to_duration((c.start_delay * 60.0).max(0.0)).unwrap_or(Duration::MAX),
            disable_on_freeze: c.disable_on_freeze,
            pump: pump_from(&c.pump),
            tank: (&c.tank).into(),
            probe: (&c.probe).into(),
            initial_level: c.level,
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────────────

impl ControllerCfg {
    /// Build the runtime config for one `[[controllers]]` entry.
    pub fn from_config(root: &chem_config::Config, ctl: &chem_config::ControllerCfg) -> Self {
        let capacity = |id: u8| root.body(id).map(|b| b.capacity).filter(|c| *c > 0.0);
        Self {
            id: ctl.id,
            name: ctl
                .name
                .clone()
                .unwrap_or_else(|| format!("Chem Controller {}", ctl.id)),
            body: ctl.body,
            water: WaterCfg {
                alkalinity: ctl.alkalinity,
                calcium_hardness: ctl.calcium_hardness,
                cyanuric_acid: ctl.cyanuric_acid,
                borates: ctl.borates,
            },
            bodies: BodyCapacities {
                pool: capacity(1),
                spa: capacity(2),
                body3: capacity(3),
                body4: capacity(4),
            },
            flow_sensor: (&ctl.flow_sensor).into(),
            chemicals: ctl
                .chemicals
                .iter()
                .map(|c| ChemicalCfg::from_config(c, &root.chlorinators))
                .collect(),
            body_chlorinators: root
                .chlorinators
                .iter()
                .filter(|c| c.body == ctl.body)
                .map(|c| c.id)
                .collect(),
            poll_interval: Duration::from_millis(root.controller.poll_interval_ms),
            tick_interval: Duration::from_millis(root.controller.tick_interval_ms),
        }
    }

    /// Every configured controller, in file order.
    pub fn all_from_config(root: &chem_config::Config) -> Vec<Self> {
        root.controllers.iter().map(|c| Self::from_config(root, c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
[[bodies]]
id = 1
capacity = 20000

[[bodies]]
id = 2
capacity = 500

[[chlorinators]]
id = 1
body = 1
model = "intellichlor--40"

[[controllers]]
id = 7
body = 1

[[controllers.chemicals]]
kind = "ph"
setpoint = 7.4
start_delay = 1.5
pump = { kind = "relay", rated_flow = 100, binding = "relay:1" }

[[controllers.chemicals]]
kind = "orp"
setpoint = 700
use_chlorinator = true
chlorinator_id = 1
"#;

    #[test]
    fn controller_pulls_bodies_and_chlorinator_models() {
        let root = chem_config::load_toml(TOML).expect("parse");
        let cfg = ControllerCfg::from_config(&root, &root.controllers[0]);
        assert_eq!(cfg.id, 7);
        assert_eq!(cfg.name, "Chem Controller 7");
        assert_eq!(cfg.bodies.spa, Some(500.0));
        assert_eq!(cfg.body_chlorinators, vec![1]);
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));

        let ph = &cfg.chemicals[0];
        assert_eq!(ph.start_delay, Duration::from_secs(90));
        assert_eq!(ph.pump.as_ref().map(|p| p.rated_flow), Some(100.0));

        let link = cfg.chemicals[1].chlorinator().copied().expect("link");
        assert_eq!(link.lbs_per_day, Some(1.40));
        assert_eq!(link.method, ChlorDosingMethod::Target);
    }

    #[test]
    fn orp_without_use_flag_has_no_link() {
        let c = chem_config::ChemicalCfg {
            kind: chem_config::ChemicalKind::Orp,
            chlorinator_id: Some(3),
            ..Default::default()
        };
        assert!(ChemicalCfg::from_config(&c, &[]).chlorinator().is_none());
    }
}
