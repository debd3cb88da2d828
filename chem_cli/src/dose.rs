//! One-shot operator commands: manual dose, pump calibration and dose plans.
//!
//! These start their own controller, so they should not run against the same
//! relays as a live `chemctl run`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chem_config::{Config, ProbeKind};
use chem_core::error::ChemError;
use chem_core::{
    ChemController, ChemicalKind, ChemicalSnapshot, ControllerCfg, ControllerCollection, DoseRecord, EquipmentEvent,
    Services, parse_amount, parse_chemical,
};
use crossbeam_channel as xch;
use eyre::WrapErr;

use crate::run::{DoseLog, print_record};

const EVENT_WAIT: Duration = Duration::from_millis(100);
/// Extra time allowed past the expected run time before giving up.
const FINISH_SLACK_SECS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneShot {
    Dose,
    Calibrate,
}

fn controller_cfg(cfg: &Config, id: u8) -> eyre::Result<ControllerCfg> {
    let ctl = cfg.controllers.iter().find(|c| c.id == id).ok_or_else(|| {
        eyre::Report::new(ChemError::InvalidId {
            kind: "controller",
            id: id.to_string(),
        })
    })?;
    Ok(ControllerCfg::from_config(cfg, ctl))
}

/// Seconds the pump should need at its rated flow.
fn expected_secs(ctl: &ControllerCfg, kind: ChemicalKind, op: OneShot, amount: f64) -> f64 {
    if op == OneShot::Calibrate {
        return amount;
    }
    let rate = ctl
        .chemicals
        .iter()
        .find(|c| c.kind() == kind)
        .and_then(|c| c.pump.as_ref())
        .map_or(0.0, chem_core::config::PumpCfg::ml_per_sec);
    if rate > 0.0 { amount / rate } else { 0.0 }
}

fn wait_for_record(
    coll: &ControllerCollection,
    events: &xch::Receiver<EquipmentEvent>,
    controller: u8,
    kind: ChemicalKind,
    limit: Duration,
    shutdown: &AtomicBool,
) -> eyre::Result<DoseRecord> {
    let started = Instant::now();
    let mut cancelled = false;
    loop {
        if !cancelled && shutdown.load(Ordering::Relaxed) {
            tracing::info!(controller, chemical = %kind, "interrupted; cancelling dose");
            coll.cancel_dose(controller, kind)?;
            cancelled = true;
        }
        if started.elapsed() > limit {
            let _ = coll.cancel_dose(controller, kind);
            return Err(eyre::Report::new(ChemError::Timeout)).wrap_err("waiting for the dose to finish");
        }
        match events.recv_timeout(EVENT_WAIT) {
            Ok(EquipmentEvent::DoseFinished { controller: c, record })
                if c == controller && record.chemical == kind && record.method != chem_core::DoseMethod::Auto =>
            {
                return Ok(record);
            }
            Ok(_) | Err(xch::RecvTimeoutError::Timeout) => {}
            Err(xch::RecvTimeoutError::Disconnected) => {
                eyre::bail!("controller {controller} stopped before the dose finished")
            }
        }
    }
}

/// Run a manual dose or calibration to the end and print its record.
#[allow(clippy::too_many_arguments)]
pub fn run_one_shot(
    cfg: &Config,
    services: Services,
    op: OneShot,
    controller: u8,
    chemical: &str,
    amount: &str,
    json: bool,
    shutdown: &AtomicBool,
) -> eyre::Result<DoseRecord> {
    let kind = parse_chemical(chemical)?;
    let amount = parse_amount(amount)?;
    let ctl = controller_cfg(cfg, controller)?;
    let expected = expected_secs(&ctl, kind, op, amount);

    let mut coll = ControllerCollection::new(services);
    let events = coll.subscribe();
    coll.create(ctl)?;
    match op {
        OneShot::Dose => coll.manual_dose(controller, kind, amount)?,
        OneShot::Calibrate => coll.calibrate_dose(controller, kind, amount)?,
    }
    tracing::info!(controller, chemical = %kind, amount, ?op, "one-shot started");

    let limit = Duration::from_secs_f64(expected.ceil() + FINISH_SLACK_SECS);
    let record = wait_for_record(&coll, &events, controller, kind, limit, shutdown);
    coll.close();
    let record = record?;
    if let Some(path) = cfg.logging.dose_log.as_deref() {
        DoseLog::open(Path::new(path))?.append(controller, &record)?;
    }
    print_record(controller, &record, json);
    Ok(record)
}

/// What a single evaluation at `level` would do for one chemical.
pub fn plan(
    mut cfg: Config,
    services: Services,
    controller: u8,
    chemical: &str,
    level: f64,
) -> eyre::Result<ChemicalSnapshot> {
    let kind = parse_chemical(chemical)?;
    if !level.is_finite() {
        return Err(ChemError::InvalidData(format!("level must be a number, got {level}")).into());
    }
    // The operator-supplied level stands in for every probe reading.
    for ctl in cfg.controllers.iter_mut().filter(|c| c.id == controller) {
        for chem in &mut ctl.chemicals {
            if chem.probe.kind == ProbeKind::Remote {
                chem.probe.kind = ProbeKind::Other;
            }
        }
    }
    let ctl_cfg = controller_cfg(&cfg, controller)?;
    let mut ctl = ChemController::builder()
        .with_config(ctl_cfg)
        .with_services(services)
        .try_build()?;
    ctl.set_level(kind, level)?;
    ctl.poll();
    let snap = ctl.snapshot();
    ctl.close();
    snap.chemical(kind).cloned().ok_or_else(|| {
        eyre::Report::new(ChemError::InvalidId {
            kind: "chemical",
            id: chemical.to_string(),
        })
    })
}

pub fn print_plan(snap: &ChemicalSnapshot, json: bool) -> eyre::Result<()> {
    if json {
        println!("{}", serde_json::to_string(snap).wrap_err("encoding plan")?);
        return Ok(());
    }
    println!("{}: {} (demand {:.3})", snap.kind, snap.status, snap.demand);
    match &snap.dose {
        Some(d) => println!("  would dose {:.2} over {:.0}s", d.volume, d.time),
        None => println!("  no dose"),
    }
    for m in &snap.messages {
        println!("  {m}");
    }
    Ok(())
}
