//! Hardware-facing seams for the chemistry controller.
//!
//! Everything the control engine needs from the outside world goes through
//! these traits: relay/sensor transport, chlorinator control, body and freeze
//! status, and a clock. Errors cross the boundary as boxed trait objects and are
//! mapped to typed errors by `chem_core`.
pub mod clock;

use std::time::Duration;

pub use clock::{Clock, MonotonicClock};

/// Outcome of a relay activation/deactivation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivationResult {
    /// The device confirmed the command.
    pub success: bool,
    /// Output state reported back by the device (true = energised).
    pub current_state: bool,
}

/// Health bits reported by a device status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    pub has_fault: bool,
}

/// Raw value read from a sensor binding (flow switch, rate or pressure
/// sensor, remote probe).
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SensorValue {
    /// Loose boolean interpretation used for flow switches.
    pub fn as_bool(&self) -> bool {
        match self {
            SensorValue::Bool(b) => *b,
            SensorValue::Number(n) => *n != 0.0,
            SensorValue::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "on" | "1" | "yes" | "open"
            ),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            SensorValue::Number(n) if n.is_finite() => Some(*n),
            SensorValue::Number(_) => None,
            SensorValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }
}

/// Relay and sensor command surface.
///
/// `activate` must be bounded: the device turns itself off once `duration_ms`
/// expires unless it is renewed.
pub trait Transport: Send + Sync {
    fn activate(
        &self,
        binding: &str,
        duration_ms: u64,
    ) -> Result<ActivationResult, Box<dyn std::error::Error + Send + Sync>>;
    fn deactivate(
        &self,
        binding: &str,
    ) -> Result<ActivationResult, Box<dyn std::error::Error + Send + Sync>>;
    fn query_status(
        &self,
        binding: &str,
    ) -> Result<DeviceStatus, Box<dyn std::error::Error + Send + Sync>>;
    fn read_value(
        &self,
        binding: &str,
    ) -> Result<SensorValue, Box<dyn std::error::Error + Send + Sync>>;
}

/// Partial update for a chlorinator. `None` leaves the field untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChlorinatorCommand {
    pub disabled: Option<bool>,
    pub is_dosing: Option<bool>,
    /// How long `is_dosing = true` stays asserted without renewal.
    pub latch: Option<Duration>,
}

/// Runtime view of a chlorinator as reported by its own controller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChlorinatorRuntimeState {
    pub id: u8,
    pub disabled: bool,
    pub is_dosing: bool,
    pub super_chlor: bool,
    /// Current output in percent.
    pub current_output: u8,
    /// Communication or cell fault reported by the chlorinator.
    pub fault: bool,
}

pub trait ChlorinatorControl: Send + Sync {
    fn set_chlorinator(
        &self,
        id: u8,
        cmd: ChlorinatorCommand,
    ) -> Result<ChlorinatorRuntimeState, Box<dyn std::error::Error + Send + Sync>>;
    fn chlorinator_state(
        &self,
        id: u8,
    ) -> Result<ChlorinatorRuntimeState, Box<dyn std::error::Error + Send + Sync>>;
}

/// Body id for equipment shared by the pool (1) and spa (2). It counts as
/// running while either of them runs.
pub const SHARED_BODY: u8 = 32;

/// Read-only status of the wider pool system.
pub trait PoolStatus: Send + Sync {
    fn is_body_on(&self, body: u8) -> bool;
    fn freeze_active(&self) -> bool;
    /// Water temperature in Celsius, when a sensor is available.
    fn water_temperature_c(&self) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::SensorValue;

    #[test]
    fn switch_values_parse_loosely() {
        assert!(SensorValue::Text("ON".into()).as_bool());
        assert!(SensorValue::Number(1.0).as_bool());
        assert!(!SensorValue::Text("off".into()).as_bool());
        assert!(!SensorValue::Bool(false).as_bool());
    }

    #[test]
    fn numeric_values_reject_garbage() {
        assert_eq!(SensorValue::Text(" 12.5 ".into()).as_f64(), Some(12.5));
        assert_eq!(SensorValue::Text("abc".into()).as_f64(), None);
        assert_eq!(SensorValue::Number(f64::NAN).as_f64(), None);
    }
}
