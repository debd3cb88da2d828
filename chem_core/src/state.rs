//! Per-chemical runtime state, its restart-safe persisted form and the
//! snapshots broadcast to observers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::alarms::{ChemAlarms, ChemWarnings, ControllerAlarms, ControllerWarnings};
use crate::config::{ChemicalKind, TankUnits};
use crate::dose::DoseRecord;
use crate::status::{DoseMethod, DosingStatus};

/// Accessor/setter pairs that raise the changed flag only on a real change.
macro_rules! tracked {
    ($($field:ident: $ty:ty => $setter:ident),* $(,)?) => {
        impl ChemicalRuntimeState {
            $(
                pub fn $field(&self) -> $ty {
                    self.$field
                }

                pub fn $setter(&mut self, v: $ty) {
                    if self.$field != v {
                        self.$field = v;
                        self.changed = true;
                    }
                }
            )*
        }
    };
}

/// Mutable state of one chemical. Only its doser writes to it.
#[derive(Debug, Clone, Default)]
pub struct ChemicalRuntimeState {
    level: Option<f64>,
    demand: f64,
    status: DosingStatus,
    daily_volume_dosed: f64,
    daily_date: Option<NaiveDate>,
    alarms: ChemAlarms,
    warnings: ChemWarnings,
    flow_detected: bool,
    freeze_protect: bool,
    is_body_on: bool,
    manual_dosing: bool,
    manual_mixing: bool,
    flow_delay: bool,
    delay_time_remaining: f64,
    dose_volume: f64,
    dose_time: f64,
    dosing_volume_remaining: f64,
    dosing_time_remaining: f64,
    volume_dosed: f64,
    time_dosed: f64,
    mix_time_remaining: f64,
    changed: bool,
}

tracked! {
    level: Option<f64> => set_level,
    demand: f64 => set_demand,
    status: DosingStatus => set_status,
    daily_volume_dosed: f64 => set_daily_volume_dosed,
    daily_date: Option<NaiveDate> => set_daily_date,
    alarms: ChemAlarms => set_alarms,
    warnings: ChemWarnings => set_warnings,
    flow_detected: bool => set_flow_detected,
    freeze_protect: bool => set_freeze_protect,
    is_body_on: bool => set_is_body_on,
    manual_dosing: bool => set_manual_dosing,
    manual_mixing: bool => set_manual_mixing,
    flow_delay: bool => set_flow_delay,
    delay_time_remaining: f64 => set_delay_time_remaining,
    dose_volume: f64 => set_dose_volume,
    dose_time: f64 => set_dose_time,
    dosing_volume_remaining: f64 => set_dosing_volume_remaining,
    dosing_time_remaining: f64 => set_dosing_time_remaining,
    volume_dosed: f64 => set_volume_dosed,
    time_dosed: f64 => set_time_dosed,
    mix_time_remaining: f64 => set_mix_time_remaining,
}

impl ChemicalRuntimeState {
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    /// Read and clear the changed flag.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Zero every field that describes an in-flight dose.
    pub fn clear_dose_fields(&mut self) {
        self.set_dose_volume(0.0);
        self.set_dose_time(0.0);
        self.set_dosing_volume_remaining(0.0);
        self.set_dosing_time_remaining(0.0);
        self.set_volume_dosed(0.0);
        self.set_time_dosed(0.0);
        self.set_flow_delay(false);
        self.set_delay_time_remaining(0.0);
    }

    pub fn to_persisted(&self, tank_level: Option<f64>) -> PersistedChemical {
        PersistedChemical {
            status: self.status,
            level: self.level,
            daily_volume_dosed: self.daily_volume_dosed,
            daily_date: self.daily_date,
            manual_dosing: self.manual_dosing,
            manual_mixing: self.manual_mixing,
            dose_volume: self.dose_volume,
            dose_time: self.dose_time,
            dosing_volume_remaining: self.dosing_volume_remaining,
            dosing_time_remaining: self.dosing_time_remaining,
            volume_dosed: self.volume_dosed,
            time_dosed: self.time_dosed,
            mix_time_remaining: self.mix_time_remaining,
            tank_level,
        }
    }

    /// Load the restart fields. The active dose/mix objects are rebuilt by the
    /// doser on its next evaluation.
    pub fn restore(&mut self, p: &PersistedChemical) {
        self.set_status(p.status);
        self.set_level(p.level);
        self.set_daily_volume_dosed(p.daily_volume_dosed.max(0.0));
        self.set_daily_date(p.daily_date);
        self.set_manual_dosing(p.manual_dosing);
        self.set_manual_mixing(p.manual_mixing);
        self.set_dose_volume(p.dose_volume);
        self.set_dose_time(p.dose_time);
        self.set_dosing_volume_remaining(p.dosing_volume_remaining.max(0.0));
        self.set_dosing_time_remaining(p.dosing_time_remaining.max(0.0));
        self.set_volume_dosed(p.volume_dosed.max(0.0));
        self.set_time_dosed(p.time_dosed.max(0.0));
        self.set_mix_time_remaining(p.mix_time_remaining.max(0.0));
    }
}

/// Fields a chemical needs to resume an interrupted dose or mix after a
/// restart, plus daily accounting.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedChemical {
    pub status: DosingStatus,
    pub level: Option<f64>,
    pub daily_volume_dosed: f64,
    pub daily_date: Option<NaiveDate>,
    pub manual_dosing: bool,
    pub manual_mixing: bool,
    /// Target volume of the interrupted dose; negative for calibration.
    pub dose_volume: f64,
    pub dose_time: f64,
    pub dosing_volume_remaining: f64,
    pub dosing_time_remaining: f64,
    pub volume_dosed: f64,
    pub time_dosed: f64,
    pub mix_time_remaining: f64,
    pub tank_level: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoseProgress {
    pub id: u64,
    pub method: DoseMethod,
    pub volume: f64,
    pub time: f64,
    pub volume_dosed: f64,
    pub time_dosed: f64,
    pub volume_remaining: f64,
    pub time_remaining: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixProgress {
    pub total: f64,
    pub remaining: f64,
    pub manual: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TankSnapshot {
    pub capacity: f64,
    pub level: f64,
    pub units: TankUnits,
    pub level_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChemicalSnapshot {
    pub kind: ChemicalKind,
    pub enabled: bool,
    pub status: DosingStatus,
    pub setpoint: f64,
    pub level: Option<f64>,
    pub demand: f64,
    pub daily_volume_dosed: f64,
    pub manual_dosing: bool,
    pub manual_mixing: bool,
    pub flow_delay: bool,
    pub delay_time_remaining: f64,
    pub dose: Option<DoseProgress>,
    pub mix: Option<MixProgress>,
    pub tank: Option<TankSnapshot>,
    pub alarms: ChemAlarms,
    pub warnings: ChemWarnings,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub id: u8,
    pub name: String,
    pub body: u8,
    pub is_body_on: bool,
    pub flow_detected: bool,
    pub freeze_active: bool,
    pub suspended: bool,
    pub saturation_index: Option<f64>,
    pub alarms: ControllerAlarms,
    pub warnings: ControllerWarnings,
    pub messages: Vec<String>,
    pub chemicals: Vec<ChemicalSnapshot>,
}

impl ControllerSnapshot {
    pub fn chemical(&self, kind: ChemicalKind) -> Option<&ChemicalSnapshot> {
        self.chemicals.iter().find(|c| c.kind == kind)
    }
}

/// Notifications pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EquipmentEvent {
    Changed(ControllerSnapshot),
    DoseFinished { controller: u8, record: DoseRecord },
}
