//! Relays and switch inputs wired straight to Raspberry Pi GPIO.
//!
//! Bindings are `gpio:<bcm pin>`. A watchdog thread drops every relay whose
//! activation window has expired.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chem_traits::{ActivationResult, DeviceStatus, SensorValue, Transport};
use rppal::gpio::{Gpio, InputPin, OutputPin};

use crate::error::{HwError, Result};
use crate::util::{parse_gpio_binding, wait_until_with_timeout};

type BoxErr = Box<dyn std::error::Error + Send + Sync>;

const WATCHDOG_PERIOD: Duration = Duration::from_millis(50);
const READBACK_TIMEOUT: Duration = Duration::from_millis(20);

fn gpio_err(e: rppal::gpio::Error) -> HwError {
    HwError::Gpio(e.to_string())
}

struct Relay {
    pin: OutputPin,
    off_at: Option<Instant>,
}

#[derive(Default)]
struct Pins {
    relays: HashMap<String, Relay>,
    inputs: HashMap<String, InputPin>,
}

fn lock(pins: &Mutex<Pins>) -> Result<MutexGuard<'_, Pins>> {
    pins.lock().map_err(|_| HwError::Gpio("pin table poisoned".into()))
}

pub struct GpioTransport {
    pins: Arc<Mutex<Pins>>,
    shutdown: Arc<AtomicBool>,
    watchdog: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for GpioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioTransport").finish_non_exhaustive()
    }
}

impl GpioTransport {
    /// Claim the relay outputs (driven low) and switch inputs.
    pub fn try_new(relays: &[String], inputs: &[String]) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let mut pins = Pins::default();
        for binding in relays {
            let n = parse_gpio_binding(binding)?;
            let pin = gpio.get(n).map_err(gpio_err)?.into_output_low();
            pins.relays.insert(binding.clone(), Relay { pin, off_at: None });
        }
        for binding in inputs {
            let n = parse_gpio_binding(binding)?;
            let pin = gpio.get(n).map_err(gpio_err)?.into_input_pulldown();
            pins.inputs.insert(binding.clone(), pin);
        }
        tracing::info!(relays = relays.len(), inputs = inputs.len(), "gpio transport ready");

        let pins = Arc::new(Mutex::new(pins));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (p, s) = (pins.clone(), shutdown.clone());
        let watchdog = std::thread::Builder::new()
            .name("gpio-watchdog".into())
            .spawn(move || watchdog(&p, &s))?;
        Ok(Self {
            pins,
            shutdown,
            watchdog: Some(watchdog),
        })
    }
}

fn watchdog(pins: &Mutex<Pins>, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(WATCHDOG_PERIOD);
        let Ok(mut p) = lock(pins) else {
            break;
        };
        let now = Instant::now();
        for (binding, relay) in &mut p.relays {
            if relay.off_at.is_some_and(|t| t <= now) {
                relay.pin.set_low();
                relay.off_at = None;
                tracing::debug!(binding = %binding, "relay latch expired");
            }
        }
    }
}

impl Transport for GpioTransport {
    fn activate(&self, binding: &str, duration_ms: u64) -> std::result::Result<ActivationResult, BoxErr> {
        let mut p = lock(&self.pins)?;
        let relay = p
            .relays
            .get_mut(binding)
            .ok_or_else(|| HwError::UnknownBinding(binding.to_string()))?;
        relay.pin.set_high();
        relay.off_at = Some(Instant::now() + Duration::from_millis(duration_ms));
        let on = relay.pin.is_set_high();
        Ok(ActivationResult {
            success: on,
            current_state: on,
        })
    }

    fn deactivate(&self, binding: &str) -> std::result::Result<ActivationResult, BoxErr> {
        let mut p = lock(&self.pins)?;
        let relay = p
            .relays
            .get_mut(binding)
            .ok_or_else(|| HwError::UnknownBinding(binding.to_string()))?;
        relay.pin.set_low();
        relay.off_at = None;
        let pin = &relay.pin;
        wait_until_with_timeout(|| pin.is_set_low(), READBACK_TIMEOUT, Duration::from_millis(1))?;
        Ok(ActivationResult {
            success: true,
            current_state: false,
        })
    }

    fn query_status(&self, binding: &str) -> std::result::Result<DeviceStatus, BoxErr> {
        let p = lock(&self.pins)?;
        if p.relays.contains_key(binding) || p.inputs.contains_key(binding) {
            Ok(DeviceStatus::default())
        } else {
            Err(HwError::UnknownBinding(binding.to_string()).into())
        }
    }

    fn read_value(&self, binding: &str) -> std::result::Result<SensorValue, BoxErr> {
        let p = lock(&self.pins)?;
        if let Some(input) = p.inputs.get(binding) {
            return Ok(SensorValue::Bool(input.is_high()));
        }
        if let Some(relay) = p.relays.get(binding) {
            return Ok(SensorValue::Bool(relay.pin.is_set_high()));
        }
        Err(HwError::UnknownBinding(binding.to_string()).into())
    }
}

impl Drop for GpioTransport {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.watchdog.take() {
            let _ = h.join();
        }
        if let Ok(mut p) = lock(&self.pins) {
            for relay in p.relays.values_mut() {
                relay.pin.set_low();
            }
        }
    }
}
