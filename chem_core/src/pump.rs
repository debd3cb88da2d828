//! Relay dosing pump driven by a renewable dead-man latch.
//!
//! The relay is only ever energised for `LATCH` at a time; a dose keeps it on
//! by re-latching every tick. If the control loop stalls, the relay drops out
//! by itself within `LATCH`.

use std::time::Duration;

use chem_traits::Transport;
use eyre::WrapErr;

use crate::config::PumpCfg;
use crate::error::Result;
use crate::hw_error::map_hw_error;

/// Activation window requested on every latch.
pub const LATCH: Duration = Duration::from_secs(3);

/// Consecutive failed activations before the pump is flagged as faulted.
pub const FAULT_AFTER_FAILURES: u32 = 3;

#[derive(Debug)]
pub struct DosingPump {
    cfg: PumpCfg,
    is_on: bool,
    consecutive_failures: u32,
}

impl DosingPump {
    pub fn new(cfg: PumpCfg) -> Self {
        Self {
            cfg,
            is_on: false,
            consecutive_failures: 0,
        }
    }

    pub fn cfg(&self) -> &PumpCfg {
        &self.cfg
    }

    /// mL per second at the rated flow.
    pub fn rate_per_sec(&self) -> f64 {
        self.cfg.ml_per_sec()
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_faulted(&self) -> bool {
        self.consecutive_failures >= FAULT_AFTER_FAILURES
    }

    /// Renew the latch. `Ok(true)` only when the device confirmed the command;
    /// a declined activation is `Ok(false)`. Both failure paths count toward
    /// the pump fault.
    pub fn latch(&mut self, transport: &dyn Transport) -> Result<bool> {
        let ms = u64::try_from(LATCH.as_millis()).unwrap_or(u64::MAX);
        let res = match transport.activate(&self.cfg.binding, ms) {
            Ok(r) => r,
            Err(e) => {
                self.record_failure();
                return Err(eyre::Report::new(map_hw_error(&*e)))
                    .wrap_err_with(|| format!("activate {}", self.cfg.binding));
            }
        };
        if res.success {
            self.consecutive_failures = 0;
            self.is_on = true;
            tracing::trace!(binding = %self.cfg.binding, state = res.current_state, "pump latched");
            Ok(true)
        } else {
            self.record_failure();
            tracing::warn!(
                binding = %self.cfg.binding,
                failures = self.consecutive_failures,
                "pump activation not confirmed"
            );
            Ok(false)
        }
    }

    /// Command the relay off. The local on-flag is cleared even when the
    /// command fails; the latch will expire on its own.
    pub fn stop(&mut self, transport: &dyn Transport) -> Result<()> {
        self.is_on = false;
        transport
            .deactivate(&self.cfg.binding)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("pump stop")?;
        Ok(())
    }

    /// Device-reported fault bit.
    pub fn query_fault(&self, transport: &dyn Transport) -> Result<bool> {
        let st = transport
            .query_status(&self.cfg.binding)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("pump status")?;
        Ok(st.has_fault)
    }

    fn record_failure(&mut self) {
        self.is_on = false;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{FakeTransport, Scripted, TransportCall};

    fn pump() -> DosingPump {
        DosingPump::new(PumpCfg {
            binding: "relay:ph".into(),
            rated_flow: 120.0,
        })
    }

    #[test]
    fn latch_requests_the_dead_man_window() {
        let t = FakeTransport::new();
        let mut p = pump();
        assert!(p.latch(&t).unwrap());
        assert!(p.is_on());
        assert_eq!(
            t.calls(),
            vec![TransportCall::Activate {
                binding: "relay:ph".into(),
                duration_ms: 3_000,
            }]
        );
        assert!((p.rate_per_sec() - 2.0).abs() < 1e-12);
        p.stop(&t).unwrap();
        assert!(!p.is_on());
        assert!(!t.is_energised("relay:ph"));
    }

    #[test]
    fn consecutive_failures_fault_the_pump_until_a_confirmed_latch() {
        let t = FakeTransport::new();
        t.script([Scripted::Reject, Scripted::Fail("bus down".into()), Scripted::Reject]);
        let mut p = pump();
        assert!(!p.latch(&t).unwrap());
        assert!(p.latch(&t).is_err());
        assert_eq!(p.consecutive_failures(), 2);
        assert!(!p.is_faulted());
        assert!(!p.latch(&t).unwrap());
        assert!(p.is_faulted());

        assert!(p.latch(&t).unwrap());
        assert_eq!(p.consecutive_failures(), 0);
        assert!(!p.is_faulted());
    }

    #[test]
    fn device_fault_bit_is_reported() {
        let t = FakeTransport::new();
        let p = pump();
        assert!(!p.query_fault(&t).unwrap());
        t.set_fault("relay:ph", true);
        assert!(p.query_fault(&t).unwrap());
    }
}
