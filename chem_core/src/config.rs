//! Configuration types for the dosing engine.
//!
//! These are the runtime configuration structs used by the dosers and
//! controllers. They are separate from the TOML-deserialized config in
//! `chem_config`; see `conversions` for the mapping.

use std::time::Duration;

use chem_traits::SHARED_BODY;
use serde::{Deserialize, Serialize};

use crate::util::ML_PER_GALLON;

/// Which chemical a doser handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChemicalKind {
    Ph,
    Orp,
    Generic,
}

impl std::fmt::Display for ChemicalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChemicalKind::Ph => "ph",
            ChemicalKind::Orp => "orp",
            ChemicalKind::Generic => "generic",
        })
    }
}

impl std::str::FromStr for ChemicalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ph" => Ok(ChemicalKind::Ph),
            "orp" => Ok(ChemicalKind::Orp),
            "generic" | "doser" => Ok(ChemicalKind::Generic),
            other => Err(format!("unknown chemical '{other}'")),
        }
    }
}

/// How the computed (volume, time) plan is limited before a dose starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DosingMethod {
    Time,
    Volume,
    #[default]
    VolumeTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TankUnits {
    #[default]
    Ml,
    L,
    Gal,
    Oz,
}

impl TankUnits {
    pub fn ml_per_unit(self) -> f64 {
        match self {
            TankUnits::Ml => 1.0,
            TankUnits::L => 1_000.0,
            TankUnits::Gal => ML_PER_GALLON,
            TankUnits::Oz => crate::util::ML_PER_OZ,
        }
    }
}

/// Relay pump wiring and rating.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpCfg {
    pub binding: String,
    /// mL per minute.
    pub rated_flow: f64,
}

impl PumpCfg {
    #[inline]
    pub fn ml_per_sec(&self) -> f64 {
        self.rated_flow / 60.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TankCfg {
    pub capacity: f64,
    pub level: f64,
    pub units: TankUnits,
    pub alarm_empty_enabled: bool,
    /// Percent of capacity at or below which the low-level alarm fires.
    pub alarm_empty_level: f64,
}

impl Default for TankCfg {
    fn default() -> Self {
        Self {
            capacity: 0.0,
            level: 0.0,
            units: TankUnits::Ml,
            alarm_empty_enabled: true,
            alarm_empty_level: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ProbeCfg {
    #[default]
    None,
    /// Addressed through the transport; faults are queried each poll.
    Remote { binding: String },
    Other,
}

impl ProbeCfg {
    pub fn is_present(&self) -> bool {
        !matches!(self, ProbeCfg::None)
    }
}

/// Out-of-range band for level alarms.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tolerance {
    pub enabled: bool,
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FlowSensorKind {
    /// No sensor: a running body counts as flow.
    #[default]
    None,
    Switch,
    Rate { minimum: f64 },
    Pressure { minimum: f64 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowSensorCfg {
    pub kind: FlowSensorKind,
    pub binding: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhSupply {
    Base,
    #[default]
    Acid,
}

/// Muriatic acid strengths the titration model is calibrated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcidType {
    A34_6,
    #[default]
    A31_45,
    A29,
    A28_3,
    A15_7,
    A14_5,
}

impl AcidType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "a34.6" => AcidType::A34_6,
            "a31.45" => AcidType::A31_45,
            "a29" => AcidType::A29,
            "a28.3" => AcidType::A28_3,
            "a15.7" => AcidType::A15_7,
            "a14.5" => AcidType::A14_5,
            _ => return None,
        })
    }

    /// Multiplier relative to 31.45% acid.
    pub fn dosing_factor(self) -> f64 {
        match self {
            AcidType::A34_6 => 0.909091,
            AcidType::A31_45 => 1.0,
            AcidType::A29 => 1.08448,
            AcidType::A28_3 => 1.111111,
            AcidType::A15_7 => 2.0,
            AcidType::A14_5 => 2.16897,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhCfg {
    pub supply: PhSupply,
    pub acid: AcidType,
    /// While dosing, hold the ORP chlorinator off.
    pub dose_priority: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChlorDosingMethod {
    Chlor,
    #[default]
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChlorinatorLink {
    pub id: u8,
    pub method: ChlorDosingMethod,
    /// Production in lbs/day; `None` when no model is configured.
    pub lbs_per_day: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrpCfg {
    pub chlorinator: Option<ChlorinatorLink>,
    /// ORP dosing is locked out above this pH.
    pub ph_lockout: f64,
}

impl Default for OrpCfg {
    fn default() -> Self {
        Self {
            chlorinator: None,
            ph_lockout: 7.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenericCfg {
    /// Fixed volume per dosing cycle (mL).
    pub dosing_volume: f64,
    pub disable_chlorinator: bool,
}

/// Chemical-specific settings, selected by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum KindCfg {
    Ph(PhCfg),
    Orp(OrpCfg),
    Generic(GenericCfg),
}

impl KindCfg {
    pub fn kind(&self) -> ChemicalKind {
        match self {
            KindCfg::Ph(_) => ChemicalKind::Ph,
            KindCfg::Orp(_) => ChemicalKind::Orp,
            KindCfg::Generic(_) => ChemicalKind::Generic,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChemicalCfg {
    pub kind: KindCfg,
    pub enabled: bool,
    pub suspend_dosing: bool,
    pub setpoint: f64,
    pub tolerance: Tolerance,
    pub dosing_method: DosingMethod,
    /// Seconds.
    pub max_dosing_time: u64,
    /// mL.
    pub max_dosing_volume: f64,
    /// mL per calendar day.
    pub max_daily_volume: f64,
    /// Seconds.
    pub mixing_time: u64,
    pub flow_only_mixing: bool,
    pub start_delay: Duration,
    pub disable_on_freeze: bool,
    pub pump: Option<PumpCfg>,
    pub tank: TankCfg,
    pub probe: ProbeCfg,
    pub initial_level: Option<f64>,
}

impl ChemicalCfg {
    /// A minimal enabled chemical with no actuator; tests and builders fill in the rest.
    pub fn new(kind: KindCfg) -> Self {
        let setpoint = match kind {
            KindCfg::Ph(_) => 7.5,
            KindCfg::Orp(_) => 650.0,
            KindCfg::Generic(_) => 0.0,
        };
        Self {
            kind,
            enabled: true,
            suspend_dosing: false,
            setpoint,
            tolerance: Tolerance::default(),
            dosing_method: DosingMethod::VolumeTime,
            max_dosing_time: 600,
            max_dosing_volume: 500.0,
            max_daily_volume: 2_000.0,
            mixing_time: 3_600,
            flow_only_mixing: true,
            start_delay: Duration::ZERO,
            disable_on_freeze: true,
            pump: None,
            tank: TankCfg::default(),
            probe: ProbeCfg::None,
            initial_level: None,
        }
    }

    pub fn kind(&self) -> ChemicalKind {
        self.kind.kind()
    }

    pub fn uses_chlorinator(&self) -> bool {
        matches!(&self.kind, KindCfg::Orp(o) if o.chlorinator.is_some())
    }

    pub fn chlorinator(&self) -> Option<&ChlorinatorLink> {
        match &self.kind {
            KindCfg::Orp(o) => o.chlorinator.as_ref(),
            _ => None,
        }
    }
}

/// Water balance inputs used by the pH titration model and the saturation index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterCfg {
    pub alkalinity: f64,
    pub calcium_hardness: f64,
    pub cyanuric_acid: f64,
    pub borates: f64,
}

impl Default for WaterCfg {
    fn default() -> Self {
        Self {
            alkalinity: 80.0,
            calcium_hardness: 250.0,
            cyanuric_acid: 0.0,
            borates: 0.0,
        }
    }
}

/// Capacities (gallons) of the pool (body 1), spa (body 2) and the
/// auxiliary bodies 3 and 4.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyCapacities {
    pub pool: Option<f64>,
    pub spa: Option<f64>,
    pub body3: Option<f64>,
    pub body4: Option<f64>,
}

impl BodyCapacities {
    /// Gallons of water a controller on `body` treats. The shared body is
    /// pool plus spa.
    pub fn capacity(&self, body: u8) -> Option<f64> {
        match body {
            1 => self.pool,
            2 => self.spa,
            3 => self.body3,
            4 => self.body4,
            SHARED_BODY => match (self.pool, self.spa) {
                (None, None) => None,
                (pool, spa) => Some(pool.unwrap_or(0.0) + spa.unwrap_or(0.0)),
            },
            _ => None,
        }
    }

    /// Demand adjustment when the chemistry is assigned to the smaller of the
    /// pool and spa. Only bodies 1 and 2 participate; everything else is 1.0.
    pub fn size_adjustment(&self, body: u8) -> f64 {
        let (Some(pool), Some(spa)) = (self.pool, self.spa) else {
            return 1.0;
        };
        if pool <= 0.0 || spa <= 0.0 {
            return 1.0;
        }
        match body {
            1 if pool < spa => pool / spa,
            2 if spa < pool => spa / pool,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerCfg {
    pub id: u8,
    pub name: String,
    pub body: u8,
    pub water: WaterCfg,
    pub bodies: BodyCapacities,
    pub flow_sensor: FlowSensorCfg,
    pub chemicals: Vec<ChemicalCfg>,
    /// Chlorinators installed on this controller's body. Priority doses
    /// hold them off; any entry also marks the water as salt-chlorinated.
    pub body_chlorinators: Vec<u8>,
    pub poll_interval: Duration,
    pub tick_interval: Duration,
}

impl ControllerCfg {
    pub fn new(id: u8, body: u8) -> Self {
        Self {
            id,
            name: format!("Chem Controller {id}"),
            body,
            water: WaterCfg::default(),
            bodies: BodyCapacities::default(),
            flow_sensor: FlowSensorCfg::default(),
            chemicals: Vec::new(),
            body_chlorinators: Vec::new(),
            poll_interval: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
        }
    }

    pub fn with_chemical(mut self, chem: ChemicalCfg) -> Self {
        self.chemicals.push(chem);
        self
    }

    /// Chlorinator ids claimed by ORP dosers of this controller.
    pub fn claimed_chlorinators(&self) -> impl Iterator<Item = u8> + '_ {
        self.chemicals
            .iter()
            .filter_map(|c| c.chlorinator().map(|l| l.id))
    }

    /// Chlorinators a priority dose must hold off: the body's own plus any
    /// claimed by an ORP doser here.
    pub fn interlock_chlorinators(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self
            .body_chlorinators
            .iter()
            .copied()
            .chain(self.claimed_chlorinators())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_adjustment_only_for_smaller_body() {
        let caps = BodyCapacities {
            pool: Some(20_000.0),
            spa: Some(500.0),
            ..BodyCapacities::default()
        };
        assert!((caps.size_adjustment(2) - 0.025).abs() < 1e-12);
        assert_eq!(caps.size_adjustment(1), 1.0);
        assert_eq!(caps.size_adjustment(3), 1.0);
        assert_eq!(caps.size_adjustment(SHARED_BODY), 1.0);
        assert_eq!(BodyCapacities::default().size_adjustment(2), 1.0);
    }

    #[test]
    fn capacity_covers_every_body_the_controller_can_serve() {
        let caps = BodyCapacities {
            pool: Some(20_000.0),
            spa: Some(500.0),
            body3: Some(300.0),
            body4: None,
        };
        assert_eq!(caps.capacity(1), Some(20_000.0));
        assert_eq!(caps.capacity(2), Some(500.0));
        assert_eq!(caps.capacity(3), Some(300.0));
        assert_eq!(caps.capacity(4), None);
        assert_eq!(caps.capacity(SHARED_BODY), Some(20_500.0));
        assert_eq!(caps.capacity(5), None);

        let pool_only = BodyCapacities {
            pool: Some(20_000.0),
            ..BodyCapacities::default()
        };
        assert_eq!(pool_only.capacity(SHARED_BODY), Some(20_000.0));
        assert_eq!(BodyCapacities::default().capacity(SHARED_BODY), None);
    }

    #[test]
    fn chemical_kind_parses_aliases() {
        assert_eq!("ORP".parse::<ChemicalKind>(), Ok(ChemicalKind::Orp));
        assert_eq!("doser".parse::<ChemicalKind>(), Ok(ChemicalKind::Generic));
        assert!("chlorine".parse::<ChemicalKind>().is_err());
    }
}
