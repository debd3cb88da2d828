//! `check` (config summary) and `self-check` (device probe) commands.

use chem_config::Config;
use chem_core::{ControllerCfg, Services};

use crate::backend::{relay_bindings, sensor_bindings};

/// One line per controller and chemical after validation.
pub fn summary(cfg: &Config) -> Vec<String> {
    let mut lines = Vec::new();
    for ctl in ControllerCfg::all_from_config(cfg) {
        lines.push(format!(
            "controller {} '{}' body {} ({} chemical(s))",
            ctl.id,
            ctl.name,
            ctl.body,
            ctl.chemicals.len()
        ));
        for chem in &ctl.chemicals {
            let actuator = match (&chem.pump, chem.chlorinator()) {
                (Some(p), _) => format!("pump {} @ {} mL/min", p.binding, p.rated_flow),
                (None, Some(link)) => format!("chlorinator {}", link.id),
                (None, None) => "monitor only".to_string(),
            };
            lines.push(format!(
                "  {}: setpoint {} {}, {}",
                chem.kind(),
                chem.setpoint,
                if chem.enabled { "enabled" } else { "disabled" },
                actuator
            ));
        }
    }
    lines
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub device: String,
    pub ok: bool,
    pub detail: String,
}

/// Query every configured binding and chlorinator once.
pub fn self_check(cfg: &Config, services: &Services) -> Vec<ProbeResult> {
    let mut out = Vec::new();
    for binding in relay_bindings(cfg) {
        let res = services.transport.query_status(&binding);
        out.push(match res {
            Ok(st) if st.has_fault => ProbeResult {
                device: binding,
                ok: false,
                detail: "relay reports a fault".into(),
            },
            Ok(_) => ProbeResult {
                device: binding,
                ok: true,
                detail: "relay ok".into(),
            },
            Err(e) => ProbeResult {
                device: binding,
                ok: false,
                detail: e.to_string(),
            },
        });
    }
    for binding in sensor_bindings(cfg) {
        let res = services.transport.read_value(&binding);
        out.push(match res {
            Ok(v) => ProbeResult {
                device: binding,
                ok: true,
                detail: format!("reads {v:?}"),
            },
            Err(e) => ProbeResult {
                device: binding,
                ok: false,
                detail: e.to_string(),
            },
        });
    }
    for unit in &cfg.chlorinators {
        let device = format!("chlorinator {}", unit.id);
        out.push(match services.chlorinators.chlorinator_state(unit.id) {
            Ok(st) if st.fault => ProbeResult {
                device,
                ok: false,
                detail: "chlorinator reports a fault".into(),
            },
            Ok(st) => ProbeResult {
                device,
                ok: true,
                detail: format!("output {}%", st.current_output),
            },
            Err(e) => ProbeResult {
                device,
                ok: false,
                detail: e.to_string(),
            },
        });
    }
    out
}
