//! In-process stand-ins for the relay bus, chlorinators and pool status.
//!
//! They honour the dead-man contract of the real devices: a relay activation
//! or chlorinator `is_dosing` latch drops out on its own once its window
//! expires, so a stalled controller cannot leave anything running. Time comes
//! from a [`Clock`] so tests can step it by hand.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chem_traits::{
    ActivationResult, ChlorinatorCommand, ChlorinatorControl, ChlorinatorRuntimeState, Clock, DeviceStatus,
    PoolStatus, SHARED_BODY, SensorValue, Transport,
};

use crate::error::{HwError, Result};

type BoxErr = Box<dyn std::error::Error + Send + Sync>;
type SharedClock = Arc<dyn Clock + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|_| HwError::Gpio("simulator state poisoned".into()))
}

/// Moves a sensor value while a relay is energised, e.g. acid lowering pH.
#[derive(Debug, Clone)]
struct Response {
    relay: String,
    sensor: String,
    per_sec: f64,
}

#[derive(Debug, Default)]
struct BusState {
    relays: HashMap<String, Option<Instant>>,
    sensors: HashMap<String, SensorValue>,
    faults: HashSet<String>,
    responses: Vec<Response>,
    settled_at: Option<Instant>,
}

impl BusState {
    fn energised(&self, binding: &str, now: Instant) -> bool {
        matches!(self.relays.get(binding), Some(Some(off_at)) if *off_at > now)
    }

    /// Apply sensor responses for the relay on-time since the last settle.
    fn settle(&mut self, now: Instant) {
        let since = self.settled_at.unwrap_or(now);
        self.settled_at = Some(now);
        for r in &self.responses {
            let Some(Some(off_at)) = self.relays.get(&r.relay) else {
                continue;
            };
            let end = (*off_at).min(now);
            if end <= since {
                continue;
            }
            let secs = end.duration_since(since).as_secs_f64();
            if let Some(SensorValue::Number(v)) = self.sensors.get_mut(&r.sensor) {
                *v += r.per_sec * secs;
            }
        }
    }
}

/// Simulated relay/sensor bus.
pub struct SimTransport {
    clock: SharedClock,
    state: Mutex<BusState>,
}

impl std::fmt::Debug for SimTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimTransport").finish_non_exhaustive()
    }
}

impl SimTransport {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            state: Mutex::new(BusState::default()),
        }
    }

    pub fn with_relay(self, binding: &str) -> Self {
        if let Ok(mut s) = self.state.lock() {
            s.relays.insert(binding.to_string(), None);
        }
        self
    }

    pub fn with_sensor(self, binding: &str, value: SensorValue) -> Self {
        if let Ok(mut s) = self.state.lock() {
            s.sensors.insert(binding.to_string(), value);
        }
        self
    }

    /// While `relay` is energised, change numeric sensor `sensor` by
    /// `per_sec` per second.
    pub fn with_response(self, relay: &str, sensor: &str, per_sec: f64) -> Self {
        if let Ok(mut s) = self.state.lock() {
            s.responses.push(Response {
                relay: relay.to_string(),
                sensor: sensor.to_string(),
                per_sec,
            });
        }
        self
    }

    pub fn set_value(&self, binding: &str, value: SensorValue) -> Result<()> {
        let now = self.clock.now();
        let mut s = lock(&self.state)?;
        s.settle(now);
        s.sensors.insert(binding.to_string(), value);
        Ok(())
    }

    pub fn set_fault(&self, binding: &str, fault: bool) -> Result<()> {
        let mut s = lock(&self.state)?;
        if fault {
            s.faults.insert(binding.to_string());
        } else {
            s.faults.remove(binding);
        }
        Ok(())
    }

    pub fn is_energised(&self, binding: &str) -> bool {
        let now = self.clock.now();
        lock(&self.state).is_ok_and(|s| s.energised(binding, now))
    }
}

impl Transport for SimTransport {
    fn activate(&self, binding: &str, duration_ms: u64) -> std::result::Result<ActivationResult, BoxErr> {
        let now = self.clock.now();
        let mut s = lock(&self.state)?;
        s.settle(now);
        if !s.relays.contains_key(binding) {
            return Err(HwError::UnknownBinding(binding.to_string()).into());
        }
        if s.faults.contains(binding) {
            return Ok(ActivationResult {
                success: false,
                current_state: s.energised(binding, now),
            });
        }
        s.relays
            .insert(binding.to_string(), Some(now + Duration::from_millis(duration_ms)));
        tracing::trace!(binding, duration_ms, "sim relay on");
        Ok(ActivationResult {
            success: true,
            current_state: true,
        })
    }

    fn deactivate(&self, binding: &str) -> std::result::Result<ActivationResult, BoxErr> {
        let now = self.clock.now();
        let mut s = lock(&self.state)?;
        s.settle(now);
        match s.relays.get_mut(binding) {
            Some(off_at) => {
                if off_at.is_some_and(|t| t > now) {
                    *off_at = Some(now);
                }
                tracing::trace!(binding, "sim relay off");
                Ok(ActivationResult {
                    success: true,
                    current_state: false,
                })
            }
            None => Err(HwError::UnknownBinding(binding.to_string()).into()),
        }
    }

    fn query_status(&self, binding: &str) -> std::result::Result<DeviceStatus, BoxErr> {
        let s = lock(&self.state)?;
        if s.relays.contains_key(binding) || s.sensors.contains_key(binding) {
            Ok(DeviceStatus {
                has_fault: s.faults.contains(binding),
            })
        } else {
            Err(HwError::UnknownBinding(binding.to_string()).into())
        }
    }

    fn read_value(&self, binding: &str) -> std::result::Result<SensorValue, BoxErr> {
        let now = self.clock.now();
        let mut s = lock(&self.state)?;
        s.settle(now);
        s.sensors
            .get(binding)
            .cloned()
            .ok_or_else(|| HwError::UnknownBinding(binding.to_string()).into())
    }
}

#[derive(Debug, Clone, Default)]
struct SimUnit {
    disabled: bool,
    /// `Some(None)` = dosing with no expiry.
    dosing: Option<Option<Instant>>,
    super_chlor: bool,
    output: u8,
    fault: bool,
}

impl SimUnit {
    fn is_dosing(&self, now: Instant) -> bool {
        match self.dosing {
            Some(Some(until)) => !self.disabled && now < until,
            Some(None) => !self.disabled,
            None => false,
        }
    }

    fn view(&self, id: u8, now: Instant) -> ChlorinatorRuntimeState {
        let dosing = self.is_dosing(now);
        ChlorinatorRuntimeState {
            id,
            disabled: self.disabled,
            is_dosing: dosing,
            super_chlor: self.super_chlor,
            current_output: if dosing || self.super_chlor { 100 } else { self.output },
            fault: self.fault,
        }
    }
}

/// Simulated chlorinators addressed by id.
pub struct SimChlorinators {
    clock: SharedClock,
    units: Mutex<HashMap<u8, SimUnit>>,
}

impl std::fmt::Debug for SimChlorinators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimChlorinators").finish_non_exhaustive()
    }
}

impl SimChlorinators {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            units: Mutex::new(HashMap::new()),
        }
    }

    /// Add a unit running at `output` percent on its own schedule.
    pub fn with_unit(self, id: u8, output: u8) -> Self {
        if let Ok(mut u) = self.units.lock() {
            u.insert(
                id,
                SimUnit {
                    output: output.min(100),
                    ..SimUnit::default()
                },
            );
        }
        self
    }

    pub fn set_super_chlor(&self, id: u8, on: bool) -> Result<()> {
        self.update(id, |u| u.super_chlor = on)
    }

    pub fn set_fault(&self, id: u8, fault: bool) -> Result<()> {
        self.update(id, |u| u.fault = fault)
    }

    fn update(&self, id: u8, f: impl FnOnce(&mut SimUnit)) -> Result<()> {
        let mut units = lock(&self.units)?;
        let unit = units
            .get_mut(&id)
            .ok_or_else(|| HwError::UnknownBinding(format!("chlorinator {id}")))?;
        f(unit);
        Ok(())
    }
}

impl ChlorinatorControl for SimChlorinators {
    fn set_chlorinator(&self, id: u8, cmd: ChlorinatorCommand) -> std::result::Result<ChlorinatorRuntimeState, BoxErr> {
        let now = self.clock.now();
        let mut units = lock(&self.units)?;
        let unit = units
            .get_mut(&id)
            .ok_or_else(|| HwError::UnknownBinding(format!("chlorinator {id}")))?;
        if let Some(d) = cmd.disabled {
            unit.disabled = d;
        }
        match cmd.is_dosing {
            Some(true) if !unit.disabled => unit.dosing = Some(cmd.latch.map(|l| now + l)),
            Some(_) => unit.dosing = None,
            None => {}
        }
        Ok(unit.view(id, now))
    }

    fn chlorinator_state(&self, id: u8) -> std::result::Result<ChlorinatorRuntimeState, BoxErr> {
        let now = self.clock.now();
        let units = lock(&self.units)?;
        units
            .get(&id)
            .map(|u| u.view(id, now))
            .ok_or_else(|| HwError::UnknownBinding(format!("chlorinator {id}")).into())
    }
}

#[derive(Debug)]
struct PoolState {
    bodies_on: HashSet<u8>,
    freeze: bool,
    temperature_c: Option<f64>,
}

/// Simulated pool automation status.
#[derive(Debug)]
pub struct SimPool {
    state: Mutex<PoolState>,
}

impl Default for SimPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPool {
    /// Body 1 running at 26 °C.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                bodies_on: HashSet::from([1]),
                freeze: false,
                temperature_c: Some(26.0),
            }),
        }
    }

    pub fn set_body_on(&self, body: u8, on: bool) -> Result<()> {
        let mut s = lock(&self.state)?;
        if on {
            s.bodies_on.insert(body);
        } else {
            s.bodies_on.remove(&body);
        }
        Ok(())
    }

    pub fn set_freeze(&self, on: bool) -> Result<()> {
        lock(&self.state)?.freeze = on;
        Ok(())
    }

    pub fn set_temperature_c(&self, t: Option<f64>) -> Result<()> {
        lock(&self.state)?.temperature_c = t;
        Ok(())
    }
}

impl PoolStatus for SimPool {
    fn is_body_on(&self, body: u8) -> bool {
        lock(&self.state).is_ok_and(|s| {
            s.bodies_on.contains(&body)
                || (body == SHARED_BODY && (s.bodies_on.contains(&1) || s.bodies_on.contains(&2)))
        })
    }

    fn freeze_active(&self) -> bool {
        lock(&self.state).is_ok_and(|s| s.freeze)
    }

    fn water_temperature_c(&self) -> Option<f64> {
        lock(&self.state).ok().and_then(|s| s.temperature_c)
    }
}
