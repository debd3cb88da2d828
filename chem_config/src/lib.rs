#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the chemistry controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Chemical-specific settings live flat on `ChemicalCfg`; `kind` decides
//!   which of them apply.
//! - Chlorinator production models can be named instead of given in lbs/day.
use std::collections::HashSet;
use std::path::Path;

use eyre::WrapErr;
use serde::Deserialize;

/// Body id of equipment shared by the pool and spa.
const SHARED_BODY: u8 = 32;

/// Built-in chlorinator production table: (model name, lbs of chlorine per day).
pub const CHLORINATOR_MODELS: &[(&str, f64)] = &[
    ("intellichlor--15", 0.60),
    ("intellichlor--20", 0.70),
    ("intellichlor--40", 1.40),
    ("intellichlor--60", 2.0),
    ("aquarite-t15", 1.47),
    ("aquarite-t9", 0.98),
    ("aquarite-t5", 0.735),
    ("aquarite-t3", 0.53),
    ("aquarite-925", 0.98),
    ("aquarite-940", 1.47),
];

/// Look up a named chlorinator model (case-insensitive).
pub fn chlorinator_model_lbs_per_day(name: &str) -> Option<f64> {
    let name = name.trim().to_ascii_lowercase();
    CHLORINATOR_MODELS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, lbs)| *lbs)
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControllerTiming {
    /// Period of the controller evaluation loop.
    pub poll_interval_ms: u64,
    /// Period of the dose/mix tick while a dose or mix is active.
    pub tick_interval_ms: u64,
}

impl Default for ControllerTiming {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            tick_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
    /// Append finished dose records here as JSON lines.
    pub dose_log: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BodyCfg {
    pub id: u8,
    #[serde(default)]
    pub name: Option<String>,
    /// Water volume in gallons.
    #[serde(default)]
    pub capacity: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChlorinatorCfg {
    pub id: u8,
    #[serde(default = "default_body")]
    pub body: u8,
    /// Named model from `CHLORINATOR_MODELS`.
    #[serde(default)]
    pub model: Option<String>,
    /// Explicit production rate; wins over `model`.
    #[serde(default)]
    pub chlorine_per_day_lbs: Option<f64>,
}

impl ChlorinatorCfg {
    /// Effective production rate, if any model information is configured.
    pub fn lbs_per_day(&self) -> Option<f64> {
        self.chlorine_per_day_lbs
            .or_else(|| self.model.as_deref().and_then(chlorinator_model_lbs_per_day))
    }
}

fn default_body() -> u8 {
    1
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowSensorKind {
    /// No sensor; a running body counts as flow.
    #[default]
    None,
    Switch,
    Rate,
    Pressure,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FlowSensorCfg {
    pub kind: FlowSensorKind,
    pub binding: String,
    /// Rate sensors: flow must exceed this value.
    pub minimum_flow: f64,
    /// Pressure sensors: pressure must exceed this value.
    pub minimum_pressure: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChemicalKind {
    #[default]
    Ph,
    Orp,
    Generic,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DosingMethod {
    Time,
    Volume,
    #[default]
    VolumeTime,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PumpKind {
    #[default]
    None,
    Relay,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PumpCfg {
    pub kind: PumpKind,
    /// mL per minute at full output.
    pub rated_flow: f64,
    pub binding: String,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TankUnits {
    #[default]
    Ml,
    L,
    Gal,
    Oz,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TankCfg {
    pub capacity: f64,
    pub level: f64,
    pub units: TankUnits,
    pub alarm_empty_enabled: bool,
    /// Low-level alarm threshold in percent of capacity.
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

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    #[default]
    None,
    /// Remote-addressed probe queried through the transport.
    Remote,
    /// Levels are pushed in by an operator or another integration.
    Other,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ProbeCfg {
    pub kind: ProbeKind,
    pub binding: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ToleranceCfg {
    pub enabled: bool,
    pub low: f64,
    pub high: f64,
}

impl Default for ToleranceCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            low: 0.0,
            high: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhSupply {
    Base,
    #[default]
    Acid,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChlorDosingMethod {
    /// Leave the chlorinator on its own setpoints.
    Chlor,
    /// Drive the chlorinator from the ORP setpoint.
    #[default]
    Target,
}

/// Acid strengths the titration model knows about (percent muriatic acid).
pub const ACID_TYPES: &[&str] = &["a34.6", "a31.45", "a29", "a28.3", "a15.7", "a14.5"];

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChemicalCfg {
    pub kind: ChemicalKind,
    pub enabled: bool,
    /// Operator hold: keep monitoring but never dose.
    pub suspend_dosing: bool,
    pub setpoint: f64,
    pub tolerance: ToleranceCfg,
    pub dosing_method: DosingMethod,
    pub max_dosing_time: u64,
    pub max_dosing_volume: f64,
    pub max_daily_volume: f64,
    pub mixing_time: u64,
    pub flow_only_mixing: bool,
    /// Minutes to wait after flow starts before the pump may run.
    pub start_delay: f64,
    pub disable_on_freeze: bool,
    pub pump: PumpCfg,
    pub tank: TankCfg,
    pub probe: ProbeCfg,
    /// Initial level reading until a probe reports one.
    pub level: Option<f64>,

    // pH
    pub dose_priority: bool,
    pub ph_supply: PhSupply,
    pub acid_type: String,

    // ORP
    pub use_chlorinator: bool,
    pub chlorinator_id: Option<u8>,
    pub chlor_dosing_method: ChlorDosingMethod,
    pub ph_lockout: f64,

    // generic
    pub dosing_volume: f64,
    pub disable_chlorinator: bool,
}

impl Default for ChemicalCfg {
    fn default() -> Self {
        Self {
            kind: ChemicalKind::Ph,
            enabled: true,
            suspend_dosing: false,
            setpoint: 7.5,
            tolerance: ToleranceCfg::default(),
            dosing_method: DosingMethod::VolumeTime,
            max_dosing_time: 600,
            max_dosing_volume: 500.0,
            max_daily_volume: 2_000.0,
            mixing_time: 3_600,
            flow_only_mixing: true,
            start_delay: 0.0,
            disable_on_freeze: true,
            pump: PumpCfg::default(),
            tank: TankCfg::default(),
            probe: ProbeCfg::default(),
            level: None,
            dose_priority: true,
            ph_supply: PhSupply::Acid,
            acid_type: "a31.45".to_string(),
            use_chlorinator: false,
            chlorinator_id: None,
            chlor_dosing_method: ChlorDosingMethod::Target,
            ph_lockout: 7.8,
            dosing_volume: 0.0,
            disable_chlorinator: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControllerCfg {
    pub id: u8,
    pub name: Option<String>,
    pub body: u8,
    pub alkalinity: f64,
    pub calcium_hardness: f64,
    pub cyanuric_acid: f64,
    pub borates: f64,
    pub flow_sensor: FlowSensorCfg,
    pub chemicals: Vec<ChemicalCfg>,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            id: 1,
            name: None,
            body: 1,
            alkalinity: 80.0,
            calcium_hardness: 250.0,
            cyanuric_acid: 0.0,
            borates: 0.0,
            flow_sensor: FlowSensorCfg::default(),
            chemicals: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerTiming,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub bodies: Vec<BodyCfg>,
    #[serde(default)]
    pub chlorinators: Vec<ChlorinatorCfg>,
    #[serde(default)]
    pub controllers: Vec<ControllerCfg>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading config {}", path.display()))?;
    let cfg = load_toml(&text).wrap_err("parsing config TOML")?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    pub fn body(&self, id: u8) -> Option<&BodyCfg> {
        self.bodies.iter().find(|b| b.id == id)
    }

    pub fn chlorinator(&self, id: u8) -> Option<&ChlorinatorCfg> {
        self.chlorinators.iter().find(|c| c.id == id)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.controller.poll_interval_ms == 0 {
            eyre::bail!("controller.poll_interval_ms must be > 0");
        }
        if self.controller.tick_interval_ms == 0 {
            eyre::bail!("controller.tick_interval_ms must be > 0");
        }
        if self.controller.tick_interval_ms > self.controller.poll_interval_ms {
            eyre::bail!("controller.tick_interval_ms must be <= poll_interval_ms");
        }
        if let Some(rot) = self.logging.rotation.as_deref() {
            match rot {
                "never" | "daily" | "hourly" => {}
                _ => eyre::bail!("logging.rotation must be one of never|daily|hourly"),
            }
        }

        let mut body_ids = HashSet::new();
        for b in &self.bodies {
            if !body_ids.insert(b.id) {
                eyre::bail!("bodies: duplicate id {}", b.id);
            }
            if !b.capacity.is_finite() || b.capacity < 0.0 {
                eyre::bail!("bodies[{}].capacity must be >= 0", b.id);
            }
        }

        let mut chlor_ids = HashSet::new();
        for c in &self.chlorinators {
            if !chlor_ids.insert(c.id) {
                eyre::bail!("chlorinators: duplicate id {}", c.id);
            }
            if let Some(name) = c.model.as_deref() {
                if chlorinator_model_lbs_per_day(name).is_none() {
                    eyre::bail!("chlorinators[{}].model '{name}' is not a known model", c.id);
                }
            }
            if let Some(lbs) = c.chlorine_per_day_lbs {
                if !lbs.is_finite() || lbs <= 0.0 {
                    eyre::bail!("chlorinators[{}].chlorine_per_day_lbs must be > 0", c.id);
                }
            }
        }

        let mut ctl_ids = HashSet::new();
        let mut claimed_chlorinators = HashSet::new();
        for ctl in &self.controllers {
            if !ctl_ids.insert(ctl.id) {
                eyre::bail!("controllers: duplicate id {}", ctl.id);
            }
            ctl.validate()?;
            for chem in ctl.chemicals.iter().filter(|c| c.kind == ChemicalKind::Orp) {
                if !chem.use_chlorinator {
                    continue;
                }
                let Some(id) = chem.chlorinator_id else {
                    continue;
                };
                if self.chlorinator(id).is_none() {
                    eyre::bail!(
                        "controllers[{}].orp.chlorinator_id {id} does not match a [[chlorinators]] entry",
                        ctl.id
                    );
                }
                if !claimed_chlorinators.insert(id) {
                    eyre::bail!("chlorinator {id} is already used by another ORP doser");
                }
            }
        }
        Ok(())
    }
}

impl ControllerCfg {
    pub fn validate(&self) -> eyre::Result<()> {
        let id = self.id;
        if !matches!(self.body, 1..=4 | SHARED_BODY) {
            eyre::bail!("controllers[{id}].body must be 1..=4 or {SHARED_BODY} (pool and spa)");
        }
        for (name, v) in [
            ("alkalinity", self.alkalinity),
            ("calcium_hardness", self.calcium_hardness),
            ("cyanuric_acid", self.cyanuric_acid),
            ("borates", self.borates),
        ] {
            if !v.is_finite() || v < 0.0 {
                eyre::bail!("controllers[{id}].{name} must be >= 0");
            }
        }
        match self.flow_sensor.kind {
            FlowSensorKind::None => {}
            _ if self.flow_sensor.binding.trim().is_empty() => {
                eyre::bail!("controllers[{id}].flow_sensor.binding must be set for a sensor");
            }
            _ => {}
        }
        if self.chemicals.is_empty() {
            eyre::bail!("controllers[{id}].chemicals must not be empty");
        }
        let mut kinds = HashSet::new();
        for chem in &self.chemicals {
            if !kinds.insert(chem.kind) {
                eyre::bail!("controllers[{id}]: duplicate {:?} chemical", chem.kind);
            }
            chem.validate(id)?;
        }
        if kinds.contains(&ChemicalKind::Generic) && kinds.len() > 1 {
            eyre::bail!("controllers[{id}]: a generic doser cannot share a controller");
        }
        Ok(())
    }
}

impl ChemicalCfg {
    pub fn validate(&self, ctl: u8) -> eyre::Result<()> {
        let at = format!("controllers[{ctl}].{:?}", self.kind).to_lowercase();
        if !self.setpoint.is_finite() {
            eyre::bail!("{at}.setpoint must be a number");
        }
        if self.kind == ChemicalKind::Ph && !(0.0..=14.0).contains(&self.setpoint) {
            eyre::bail!("{at}.setpoint must be within 0..=14");
        }
        if self.tolerance.enabled && self.tolerance.low > self.tolerance.high {
            eyre::bail!("{at}.tolerance.low must be <= tolerance.high");
        }
        if self.max_dosing_time == 0 {
            eyre::bail!("{at}.max_dosing_time must be > 0");
        }
        for (name, v) in [
            ("max_dosing_volume", self.max_dosing_volume),
            ("max_daily_volume", self.max_daily_volume),
            ("start_delay", self.start_delay),
            ("dosing_volume", self.dosing_volume),
        ] {
            if !v.is_finite() || v < 0.0 {
                eyre::bail!("{at}.{name} must be >= 0");
            }
        }
        if self.pump.kind == PumpKind::Relay {
            if !self.pump.rated_flow.is_finite() || self.pump.rated_flow <= 0.0 {
                eyre::bail!("{at}.pump.rated_flow must be > 0");
            }
            if self.pump.binding.trim().is_empty() {
                eyre::bail!("{at}.pump.binding must be set for a relay pump");
            }
        }
        let tank = &self.tank;
        if !tank.capacity.is_finite() || tank.capacity < 0.0 {
            eyre::bail!("{at}.tank.capacity must be >= 0");
        }
        if !tank.level.is_finite() || tank.level < 0.0 || tank.level > tank.capacity {
            eyre::bail!("{at}.tank.level must be within 0..=capacity");
        }
        if !(0.0..=100.0).contains(&tank.alarm_empty_level) {
            eyre::bail!("{at}.tank.alarm_empty_level must be a percentage 0..=100");
        }
        if self.probe.kind == ProbeKind::Remote && self.probe.binding.trim().is_empty() {
            eyre::bail!("{at}.probe.binding must be set for a remote probe");
        }
        match self.kind {
            ChemicalKind::Ph => {
                if !ACID_TYPES.contains(&self.acid_type.as_str()) {
                    eyre::bail!("{at}.acid_type must be one of {}", ACID_TYPES.join("|"));
                }
            }
            ChemicalKind::Orp => {
                if self.use_chlorinator && self.chlorinator_id.is_none() {
                    eyre::bail!("{at}.chlorinator_id must be set when use_chlorinator = true");
                }
                if self.use_chlorinator && self.pump.kind != PumpKind::None {
                    eyre::bail!("{at}: use either a pump or a chlorinator, not both");
                }
            }
            ChemicalKind::Generic => {
                if self.pump.kind != PumpKind::Relay {
                    eyre::bail!("{at}.pump.kind must be relay for a generic doser");
                }
            }
        }
        Ok(())
    }
}
