//! Test and helper fakes for chem_core.
//!
//! Each fake records what the engine asked of it and lets a test script the
//! answers. They are plain `Mutex`-guarded state so a test can share an
//! `Arc` with a controller running on another thread.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chem_traits::{
    ActivationResult, ChlorinatorCommand, ChlorinatorControl, ChlorinatorRuntimeState, DeviceStatus, PoolStatus,
    SensorValue, Transport,
};

type BoxErr = Box<dyn std::error::Error + Send + Sync>;

/// One call made against `FakeTransport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Activate { binding: String, duration_ms: u64 },
    Deactivate { binding: String },
    QueryStatus { binding: String },
    ReadValue { binding: String },
}

/// Scripted response for the next activation.
#[derive(Debug, Clone)]
pub enum Scripted {
    Confirm,
    Reject,
    Fail(String),
}

#[derive(Debug, Default)]
struct TransportState {
    calls: Vec<TransportCall>,
    /// Consumed front to back; empty means confirm.
    activations: Vec<Scripted>,
    values: HashMap<String, SensorValue>,
    faults: HashMap<String, bool>,
    energised: HashMap<String, bool>,
}

/// Relay/sensor transport that always succeeds unless told otherwise.
#[derive(Debug, Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut TransportState) -> T) -> T {
        match self.state.lock() {
            Ok(mut g) => f(&mut g),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Queue responses for the next activations, in order.
    pub fn script(&self, responses: impl IntoIterator<Item = Scripted>) {
        self.with(|s| s.activations.extend(responses));
    }

    pub fn set_value(&self, binding: &str, value: SensorValue) {
        self.with(|s| {
            s.values.insert(binding.to_string(), value);
        });
    }

    pub fn set_fault(&self, binding: &str, fault: bool) {
        self.with(|s| {
            s.faults.insert(binding.to_string(), fault);
        });
    }

    pub fn is_energised(&self, binding: &str) -> bool {
        self.with(|s| s.energised.get(binding).copied().unwrap_or(false))
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.with(|s| s.calls.clone())
    }

    pub fn activations(&self, binding: &str) -> usize {
        self.with(|s| {
            s.calls
                .iter()
                .filter(|c| matches!(c, TransportCall::Activate { binding: b, .. } if b == binding))
                .count()
        })
    }

    pub fn deactivations(&self, binding: &str) -> usize {
        self.with(|s| {
            s.calls
                .iter()
                .filter(|c| matches!(c, TransportCall::Deactivate { binding: b } if b == binding))
                .count()
        })
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }
}

impl Transport for FakeTransport {
    fn activate(&self, binding: &str, duration_ms: u64) -> Result<ActivationResult, BoxErr> {
        self.with(|s| {
            s.calls.push(TransportCall::Activate {
                binding: binding.to_string(),
                duration_ms,
            });
            let next = if s.activations.is_empty() {
                Scripted::Confirm
            } else {
                s.activations.remove(0)
            };
            match next {
                Scripted::Confirm => {
                    s.energised.insert(binding.to_string(), true);
                    Ok(ActivationResult {
                        success: true,
                        current_state: true,
                    })
                }
                Scripted::Reject => Ok(ActivationResult {
                    success: false,
                    current_state: s.energised.get(binding).copied().unwrap_or(false),
                }),
                Scripted::Fail(msg) => Err(msg.into()),
            }
        })
    }

    fn deactivate(&self, binding: &str) -> Result<ActivationResult, BoxErr> {
        self.with(|s| {
            s.calls.push(TransportCall::Deactivate {
                binding: binding.to_string(),
            });
            s.energised.insert(binding.to_string(), false);
            Ok(ActivationResult {
                success: true,
                current_state: false,
            })
        })
    }

    fn query_status(&self, binding: &str) -> Result<DeviceStatus, BoxErr> {
        self.with(|s| {
            s.calls.push(TransportCall::QueryStatus {
                binding: binding.to_string(),
            });
            Ok(DeviceStatus {
                has_fault: s.faults.get(binding).copied().unwrap_or(false),
            })
        })
    }

    fn read_value(&self, binding: &str) -> Result<SensorValue, BoxErr> {
        self.with(|s| {
            s.calls.push(TransportCall::ReadValue {
                binding: binding.to_string(),
            });
            s.values
                .get(binding)
                .cloned()
                .ok_or_else(|| format!("no value for binding '{binding}'").into())
        })
    }
}

#[derive(Debug, Default)]
struct ChlorState {
    units: HashMap<u8, ChlorinatorRuntimeState>,
    commands: Vec<(u8, ChlorinatorCommand)>,
    fail: bool,
}

/// Chlorinators that apply commands immediately.
#[derive(Debug, Default)]
pub struct FakeChlorinators {
    state: Mutex<ChlorState>,
}

impl FakeChlorinators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chlorinator with default (enabled, idle) state.
    pub fn with_unit(self, id: u8) -> Self {
        self.with(|s| {
            s.units.insert(
                id,
                ChlorinatorRuntimeState {
                    id,
                    ..Default::default()
                },
            );
        });
        self
    }

    fn with<T>(&self, f: impl FnOnce(&mut ChlorState) -> T) -> T {
        match self.state.lock() {
            Ok(mut g) => f(&mut g),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Every call fails while set.
    pub fn set_failing(&self, fail: bool) {
        self.with(|s| s.fail = fail);
    }

    pub fn set_super_chlor(&self, id: u8, on: bool) {
        self.with(|s| {
            if let Some(u) = s.units.get_mut(&id) {
                u.super_chlor = on;
            }
        });
    }

    pub fn set_fault(&self, id: u8, fault: bool) {
        self.with(|s| {
            if let Some(u) = s.units.get_mut(&id) {
                u.fault = fault;
            }
        });
    }

    pub fn state(&self, id: u8) -> Option<ChlorinatorRuntimeState> {
        self.with(|s| s.units.get(&id).cloned())
    }

    pub fn commands(&self) -> Vec<(u8, ChlorinatorCommand)> {
        self.with(|s| s.commands.clone())
    }
}

impl ChlorinatorControl for FakeChlorinators {
    fn set_chlorinator(&self, id: u8, cmd: ChlorinatorCommand) -> Result<ChlorinatorRuntimeState, BoxErr> {
        self.with(|s| {
            s.commands.push((id, cmd));
            if s.fail {
                return Err("chlorinator offline".into());
            }
            let unit = s
                .units
                .get_mut(&id)
                .ok_or_else(|| -> BoxErr { format!("unknown chlorinator {id}").into() })?;
            if let Some(d) = cmd.disabled {
                unit.disabled = d;
            }
            if let Some(d) = cmd.is_dosing {
                unit.is_dosing = d;
            }
            unit.current_output = if unit.is_dosing && !unit.disabled { 100 } else { 0 };
            Ok(unit.clone())
        })
    }

    fn chlorinator_state(&self, id: u8) -> Result<ChlorinatorRuntimeState, BoxErr> {
        self.with(|s| {
            if s.fail {
                return Err("chlorinator offline".into());
            }
            s.units
                .get(&id)
                .cloned()
                .ok_or_else(|| format!("unknown chlorinator {id}").into())
        })
    }
}

/// Pool status with settable body, freeze and temperature.
#[derive(Debug)]
pub struct FixedPool {
    body_on: AtomicBool,
    freeze: AtomicBool,
    temperature_c: Mutex<Option<f64>>,
}

impl Default for FixedPool {
    fn default() -> Self {
        Self {
            body_on: AtomicBool::new(true),
            freeze: AtomicBool::new(false),
            temperature_c: Mutex::new(None),
        }
    }
}

impl FixedPool {
    /// Body on, no freeze, no temperature sensor.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_body_on(&self, on: bool) {
        self.body_on.store(on, Ordering::SeqCst);
    }

    pub fn set_freeze(&self, on: bool) {
        self.freeze.store(on, Ordering::SeqCst);
    }

    pub fn set_temperature_c(&self, t: Option<f64>) {
        if let Ok(mut g) = self.temperature_c.lock() {
            *g = t;
        }
    }
}

impl PoolStatus for FixedPool {
    fn is_body_on(&self, _body: u8) -> bool {
        self.body_on.load(Ordering::SeqCst)
    }

    fn freeze_active(&self) -> bool {
        self.freeze.load(Ordering::SeqCst)
    }

    fn water_temperature_c(&self) -> Option<f64> {
        self.temperature_c.lock().ok().and_then(|g| *g)
    }
}
