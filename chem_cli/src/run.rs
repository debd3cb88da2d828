//! Long-running mode: start every configured controller, log finished doses
//! and persist runtime state until shutdown.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chem_config::Config;
use chem_core::{ControllerCfg, ControllerCollection, DoseRecord, EquipmentEvent, SavedState, Services};
use crossbeam_channel as xch;
use eyre::WrapErr;

const EVENT_WAIT: Duration = Duration::from_millis(200);
const PERSIST_EVERY: Duration = Duration::from_secs(60);

/// Append-only JSON-lines file of finished doses.
pub struct DoseLog {
    file: File,
}

impl DoseLog {
    pub fn open(path: &Path) -> eyre::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("opening dose log {}", path.display()))?;
        Ok(Self { file })
    }

    pub fn append(&mut self, controller: u8, record: &DoseRecord) -> eyre::Result<()> {
        let line = serde_json::json!({ "controller": controller, "record": record });
        writeln!(self.file, "{line}").wrap_err("writing dose log")
    }
}

/// One-line summary of a finished dose for the console.
pub fn describe(controller: u8, record: &DoseRecord) -> String {
    format!(
        "controller {controller} {} dose {} {}: {:.2} dosed in {:.0}s (target {:.2})",
        record.chemical,
        record.id,
        record.reason,
        record.volume_dosed,
        record.time_dosed,
        record.volume.max(0.0),
    )
}

pub fn print_record(controller: u8, record: &DoseRecord, json: bool) {
    if json {
        let ev = EquipmentEvent::DoseFinished {
            controller,
            record: record.clone(),
        };
        match serde_json::to_string(&ev) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "dose record not serializable"),
        }
    } else {
        println!("{}", describe(controller, record));
    }
}

pub struct RunOptions {
    pub state: PathBuf,
    pub for_secs: Option<u64>,
    pub service: bool,
    pub json: bool,
}

fn persist(coll: &ControllerCollection, path: &Path) {
    match SavedState::new(coll.persist_all()).save(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "state saved"),
        Err(e) => tracing::warn!(error = %e, "state save failed"),
    }
}

fn handle_event(ev: &EquipmentEvent, log: Option<&mut DoseLog>, json: bool) {
    match ev {
        EquipmentEvent::DoseFinished { controller, record } => {
            tracing::info!(
                controller,
                chemical = %record.chemical,
                reason = %record.reason,
                volume_dosed = record.volume_dosed,
                "dose finished"
            );
            if let Some(log) = log {
                if let Err(e) = log.append(*controller, record) {
                    tracing::warn!(error = %e, "dose log append failed");
                }
            }
            print_record(*controller, record, json);
        }
        EquipmentEvent::Changed(snap) => {
            tracing::trace!(controller = snap.id, "controller changed");
        }
    }
}

pub fn run(cfg: &Config, services: Services, opts: &RunOptions, shutdown: &Arc<AtomicBool>) -> eyre::Result<()> {
    let mut saved = SavedState::load(&opts.state)?;
    let mut coll = ControllerCollection::new(services);
    if opts.service {
        coll.set_service_mode(true)?;
    }
    for ctl in ControllerCfg::all_from_config(cfg) {
        let id = ctl.id;
        coll.create_restored(ctl, saved.take(id))
            .wrap_err_with(|| format!("starting controller {id}"))?;
    }
    tracing::info!(controllers = coll.len(), service = opts.service, "controllers running");

    let mut log = match cfg.logging.dose_log.as_deref() {
        Some(p) => Some(DoseLog::open(Path::new(p))?),
        None => None,
    };
    let events = coll.subscribe();
    let deadline = opts.for_secs.map(|s| Instant::now() + Duration::from_secs(s));
    let mut last_persist = Instant::now();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match events.recv_timeout(EVENT_WAIT) {
            Ok(ev) => handle_event(&ev, log.as_mut(), opts.json),
            Err(xch::RecvTimeoutError::Timeout) => {}
            Err(xch::RecvTimeoutError::Disconnected) => break,
        }
        if last_persist.elapsed() >= PERSIST_EVERY {
            persist(&coll, &opts.state);
            last_persist = Instant::now();
        }
    }

    // Save before closing so interrupted doses resume on the next start.
    persist(&coll, &opts.state);
    coll.close();
    for ev in events.try_iter() {
        handle_event(&ev, log.as_mut(), opts.json);
    }
    Ok(())
}
