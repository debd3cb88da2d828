//! Registry of running controllers keyed by id.
//!
//! Creation validates the config and the chlorinator claims across the whole
//! collection, then spawns a worker thread. Operator commands are looked up
//! by controller id and forwarded to that worker. Errors are returned as
//! `eyre::Report` wrapping a `ChemError`, so callers can downcast.

use std::collections::BTreeMap;

use crossbeam_channel as xch;

use crate::config::{ChemicalCfg, ChemicalKind, ControllerCfg};
use crate::context::Services;
use crate::controller::ChemController;
use crate::error::{ChemError, Result};
use crate::runner::ControllerHandle;
use crate::state::{ControllerSnapshot, EquipmentEvent, PersistedChemical};

/// Operator mix duration; the parts are summed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MixDuration {
    pub hours: f64,
    pub minutes: f64,
    pub seconds: f64,
}

impl MixDuration {
    pub fn from_secs(seconds: f64) -> Self {
        Self {
            seconds,
            ..Self::default()
        }
    }

    pub fn total_secs(&self) -> f64 {
        self.hours * 3_600.0 + self.minutes * 60.0 + self.seconds
    }
}

/// Parse an operator-entered amount (mL or seconds). Must be finite and > 0.
pub fn parse_amount(s: &str) -> std::result::Result<f64, ChemError> {
    let v: f64 = s
        .trim()
        .parse()
        .map_err(|_| ChemError::InvalidData(format!("'{s}' is not a number")))?;
    if !v.is_finite() || v <= 0.0 {
        return Err(ChemError::InvalidData(format!("amount must be > 0, got {s}")));
    }
    Ok(v)
}

pub fn parse_chemical(s: &str) -> std::result::Result<ChemicalKind, ChemError> {
    s.parse::<ChemicalKind>()
        .map_err(|_| ChemError::InvalidId {
            kind: "chemical",
            id: s.to_string(),
        })
}

fn report(e: ChemError) -> eyre::Report {
    eyre::Report::new(e)
}

pub struct ControllerCollection {
    services: Services,
    controllers: BTreeMap<u8, ControllerHandle>,
    events_tx: xch::Sender<EquipmentEvent>,
    events_rx: xch::Receiver<EquipmentEvent>,
    service_mode: bool,
}

impl std::fmt::Debug for ControllerCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerCollection")
            .field("controllers", &self.controllers.keys().collect::<Vec<_>>())
            .field("service_mode", &self.service_mode)
            .finish_non_exhaustive()
    }
}

impl ControllerCollection {
    pub fn new(services: Services) -> Self {
        let (events_tx, events_rx) = xch::unbounded();
        Self {
            services,
            controllers: BTreeMap::new(),
            events_tx,
            events_rx,
            service_mode: false,
        }
    }

    /// Observer stream shared by every controller. Each receiver clone
    /// competes for events; use a single consumer.
    pub fn subscribe(&self) -> xch::Receiver<EquipmentEvent> {
        self.events_rx.clone()
    }

    pub fn ids(&self) -> Vec<u8> {
        self.controllers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn in_service_mode(&self) -> bool {
        self.service_mode
    }

    fn handle(&self, id: u8) -> Result<&ControllerHandle> {
        self.controllers.get(&id).ok_or_else(|| {
            report(ChemError::InvalidId {
                kind: "controller",
                id: id.to_string(),
            })
        })
    }

    /// A chlorinator may serve at most one ORP doser collection-wide.
    fn check_claims(&self, owner: u8, claimed: impl IntoIterator<Item = u8>) -> Result<()> {
        for chlor in claimed {
            let taken_by = self
                .controllers
                .values()
                .find(|h| h.id() != owner && h.claimed_chlorinators().contains(&chlor));
            if let Some(other) = taken_by {
                return Err(report(ChemError::Config(format!(
                    "chlorinator {chlor} is already used by controller {}",
                    other.id()
                ))));
            }
        }
        Ok(())
    }

    pub fn create(&mut self, cfg: ControllerCfg) -> Result<()> {
        self.create_restored(cfg, Vec::new())
    }

    /// Create a controller and resume the runtime state saved before a
    /// restart.
    pub fn create_restored(&mut self, cfg: ControllerCfg, saved: Vec<(ChemicalKind, PersistedChemical)>) -> Result<()> {
        let id = cfg.id;
        if self.controllers.contains_key(&id) {
            return Err(report(ChemError::InvalidId {
                kind: "controller",
                id: format!("{id} already exists"),
            }));
        }
        self.check_claims(id, cfg.claimed_chlorinators())?;

        let mut ctl = ChemController::builder()
            .with_config(cfg)
            .with_services(self.services.clone())
            .with_restored_state(saved)
            .try_build()?;
        if self.service_mode {
            ctl.set_service_mode(true);
        }
        let handle = ControllerHandle::spawn(ctl, Some(self.events_tx.clone()))
            .map_err(|e| eyre::Report::new(e).wrap_err(format!("spawn controller {id}")))?;
        tracing::info!(controller = id, "controller created");
        self.controllers.insert(id, handle);
        Ok(())
    }

    /// Stop and join a controller's worker. Active doses end with "closing".
    pub fn remove(&mut self, id: u8) -> Result<()> {
        let handle = self.controllers.remove(&id).ok_or_else(|| {
            report(ChemError::InvalidId {
                kind: "controller",
                id: id.to_string(),
            })
        })?;
        drop(handle);
        tracing::info!(controller = id, "controller removed");
        Ok(())
    }

    pub fn manual_dose(&self, id: u8, chemical: ChemicalKind, volume: f64) -> Result<()> {
        if !volume.is_finite() || volume <= 0.0 {
            return Err(report(ChemError::InvalidData(format!("dose volume must be > 0, got {volume}"))));
        }
        self.handle(id)?.manual_dose(chemical, volume).map_err(report)
    }

    pub fn calibrate_dose(&self, id: u8, chemical: ChemicalKind, secs: f64) -> Result<()> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(report(ChemError::InvalidData(format!("calibration time must be > 0, got {secs}"))));
        }
        self.handle(id)?.calibrate(chemical, secs).map_err(report)
    }

    pub fn cancel_dose(&self, id: u8, chemical: ChemicalKind) -> Result<()> {
        self.handle(id)?.cancel_dose(chemical).map_err(report)
    }

    pub fn manual_mix(&self, id: u8, chemical: ChemicalKind, duration: MixDuration) -> Result<()> {
        let secs = duration.total_secs();
        if !secs.is_finite() || secs <= 0.0 {
            return Err(report(ChemError::InvalidData(format!("mix time must be > 0, got {secs}"))));
        }
        self.handle(id)?.manual_mix(chemical, secs).map_err(report)
    }

    pub fn cancel_mix(&self, id: u8, chemical: ChemicalKind) -> Result<()> {
        self.handle(id)?.cancel_mix(chemical).map_err(report)
    }

    pub fn set_level(&self, id: u8, chemical: ChemicalKind, level: f64) -> Result<()> {
        self.handle(id)?.set_level(chemical, level).map_err(report)
    }

    pub fn set_tank_level(&self, id: u8, chemical: ChemicalKind, level: f64) -> Result<()> {
        self.handle(id)?.set_tank_level(chemical, level).map_err(report)
    }

    /// Replace one chemical's settings on a running controller.
    ///
    /// Claims are checked here so a chlorinator cannot move onto a second
    /// controller through a config update.
    pub fn set_chemical_config(&mut self, id: u8, cfg: ChemicalCfg) -> Result<()> {
        self.handle(id)?;
        self.check_claims(id, cfg.chlorinator().map(|l| l.id))?;
        self.handle(id)?.set_chemical_config(cfg).map_err(report)
    }

    /// Enter or leave service mode on every controller, including ones
    /// created while it is active.
    pub fn set_service_mode(&mut self, on: bool) -> Result<()> {
        self.service_mode = on;
        tracing::info!(on, "service mode");
        let mut first_err = None;
        for handle in self.controllers.values() {
            if let Err(e) = handle.set_service_mode(on) {
                tracing::warn!(controller = handle.id(), error = %e, "service mode change failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(report(e)),
            None => Ok(()),
        }
    }

    pub fn poll_now(&self, id: u8) -> Result<()> {
        self.handle(id)?.poll_now().map_err(report)
    }

    pub fn snapshot(&self, id: u8) -> Result<ControllerSnapshot> {
        self.handle(id)?.snapshot().map_err(report)
    }

    /// Snapshots of every controller that answered, in id order.
    pub fn snapshots(&self) -> Vec<ControllerSnapshot> {
        self.controllers
            .values()
            .filter_map(|h| match h.snapshot() {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(controller = h.id(), error = %e, "snapshot failed");
                    None
                }
            })
            .collect()
    }

    pub fn persist_all(&self) -> BTreeMap<u8, Vec<(ChemicalKind, PersistedChemical)>> {
        let mut out = BTreeMap::new();
        for (id, h) in &self.controllers {
            match h.persist() {
                Ok(p) => {
                    out.insert(*id, p);
                }
                Err(e) => tracing::warn!(controller = id, error = %e, "persist failed"),
            }
        }
        out
    }

    /// Stop every controller; doses end with "closing".
    pub fn close(&mut self) {
        let ids = self.ids();
        for id in ids {
            if let Some(h) = self.controllers.remove(&id) {
                drop(h);
                tracing::debug!(controller = id, "controller closed");
            }
        }
    }
}

impl Drop for ControllerCollection {
    fn drop(&mut self) {
        self.close();
    }
}
