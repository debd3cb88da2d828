//! Device backend assembly: simulated devices by default, GPIO relays with
//! the `hardware` feature.

use std::sync::Arc;

use chem_config::{ChemicalKind, Config, FlowSensorKind, PhSupply, ProbeKind, PumpKind};
use chem_core::Services;
use chem_hardware::{SimChlorinators, SimPool, SimTransport};
use chem_traits::{Clock, MonotonicClock, SensorValue};

/// pH change per second of acid or base pump on-time in the simulator.
const SIM_PH_PER_SEC: f64 = 0.000_5;
/// ORP change (mV) per second of ORP pump on-time in the simulator.
const SIM_ORP_PER_SEC: f64 = 0.05;
/// Output of a simulated chlorinator running its own schedule.
const SIM_CHLOR_OUTPUT: u8 = 50;

/// Every relay binding the config drives.
pub fn relay_bindings(cfg: &Config) -> Vec<String> {
    let mut out: Vec<String> = cfg
        .controllers
        .iter()
        .flat_map(|c| &c.chemicals)
        .filter(|c| c.pump.kind == PumpKind::Relay)
        .map(|c| c.pump.binding.clone())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Every sensor binding (flow sensors and remote probes).
pub fn sensor_bindings(cfg: &Config) -> Vec<String> {
    let mut out = Vec::new();
    for ctl in &cfg.controllers {
        if ctl.flow_sensor.kind != FlowSensorKind::None {
            out.push(ctl.flow_sensor.binding.clone());
        }
        for chem in &ctl.chemicals {
            if chem.probe.kind == ProbeKind::Remote {
                out.push(chem.probe.binding.clone());
            }
        }
    }
    out.sort();
    out.dedup();
    out
}

fn sim_transport(cfg: &Config, clock: Arc<dyn Clock + Send + Sync>) -> SimTransport {
    let mut t = SimTransport::new(clock);
    for binding in relay_bindings(cfg) {
        t = t.with_relay(&binding);
    }
    for ctl in &cfg.controllers {
        let flow = &ctl.flow_sensor;
        t = match flow.kind {
            FlowSensorKind::None => t,
            FlowSensorKind::Switch => t.with_sensor(&flow.binding, SensorValue::Bool(true)),
            FlowSensorKind::Rate => t.with_sensor(&flow.binding, SensorValue::Number(flow.minimum_flow.max(0.0) + 20.0)),
            FlowSensorKind::Pressure => {
                t.with_sensor(&flow.binding, SensorValue::Number(flow.minimum_pressure.max(0.0) + 10.0))
            }
        };
        for chem in &ctl.chemicals {
            if chem.probe.kind != ProbeKind::Remote {
                continue;
            }
            let start = chem.level.unwrap_or(chem.setpoint);
            t = t.with_sensor(&chem.probe.binding, SensorValue::Number(start));
            if chem.pump.kind != PumpKind::Relay {
                continue;
            }
            let per_sec = match (chem.kind, chem.ph_supply) {
                (ChemicalKind::Ph, PhSupply::Acid) => -SIM_PH_PER_SEC,
                (ChemicalKind::Ph, PhSupply::Base) => SIM_PH_PER_SEC,
                (ChemicalKind::Orp, _) => SIM_ORP_PER_SEC,
                (ChemicalKind::Generic, _) => continue,
            };
            t = t.with_response(&chem.pump.binding, &chem.probe.binding, per_sec);
        }
    }
    t
}

fn sim_chlorinators(cfg: &Config, clock: Arc<dyn Clock + Send + Sync>) -> SimChlorinators {
    cfg.chlorinators
        .iter()
        .fold(SimChlorinators::new(clock), |c, unit| c.with_unit(unit.id, SIM_CHLOR_OUTPUT))
}

fn sim_pool(cfg: &Config) -> eyre::Result<SimPool> {
    let pool = SimPool::new();
    for body in &cfg.bodies {
        pool.set_body_on(body.id, true)?;
    }
    Ok(pool)
}

/// Simulated relay bus, chlorinators and pool status for `cfg`.
pub fn sim_services(cfg: &Config) -> eyre::Result<Services> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    Ok(Services::new(
        Arc::new(sim_transport(cfg, clock.clone())),
        Arc::new(sim_chlorinators(cfg, clock.clone())),
        Arc::new(sim_pool(cfg)?),
        clock,
    ))
}

/// Services for this build: GPIO relays with the `hardware` feature,
/// simulated devices otherwise. Chlorinators and pool status are always
/// simulated until a bus integration is configured.
pub fn services(cfg: &Config) -> eyre::Result<Services> {
    #[cfg(feature = "hardware")]
    {
        use eyre::WrapErr;
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
        let (inputs, other): (Vec<String>, Vec<String>) =
            sensor_bindings(cfg).into_iter().partition(|b| b.starts_with("gpio:"));
        for binding in &other {
            tracing::warn!(binding = %binding, "sensor binding is not a GPIO input; reads will fail");
        }
        let transport =
            chem_hardware::GpioTransport::try_new(&relay_bindings(cfg), &inputs).wrap_err("open gpio relays")?;
        tracing::info!("using GPIO transport");
        Ok(Services::new(
            Arc::new(transport),
            Arc::new(sim_chlorinators(cfg, clock.clone())),
            Arc::new(sim_pool(cfg)?),
            clock,
        ))
    }
    #[cfg(not(feature = "hardware"))]
    {
        tracing::info!("using simulated devices");
        sim_services(cfg)
    }
}
