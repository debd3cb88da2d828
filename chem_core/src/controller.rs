//! One chemistry controller: a body, its flow sensor and up to one doser per
//! chemical.
//!
//! `poll` runs the full evaluation (flow → setup validation → alarms → dosing
//! decisions) and is skipped while the suspend counter is held. `tick` only
//! advances active doses and mixes. A failure in one chemical is logged and
//! never stops the others.

use std::time::Instant;

use crate::alarms::{AlarmEvaluator, ControllerAlarmInputs, ControllerAlarms, ControllerWarnings};
use crate::chemistry::{WaterBalance, saturation_index};
use crate::config::{ChemicalCfg, ChemicalKind, ControllerCfg};
use crate::context::{Services, TickContext};
use crate::doser::ChemicalDoser;
use crate::error::ChemError;
use crate::flow::FlowSensor;
use crate::state::{ControllerSnapshot, EquipmentEvent, PersistedChemical};
use crate::status::{CancelReason, DosingStatus};
use crate::suspend::{SuspendCounter, SuspendGuard};

/// Body/flow conditions for one evaluation.
#[derive(Debug, Clone, Copy)]
struct Env {
    now: Instant,
    body_on: bool,
    flow_detected: bool,
    freeze_active: bool,
    flowing_since: Option<Instant>,
}

/// pH reading and priority state as seen by its siblings.
fn ph_view(chemicals: &[ChemicalDoser]) -> (Option<f64>, bool) {
    chemicals
        .iter()
        .find(|c| c.kind() == ChemicalKind::Ph)
        .map_or((None, false), |ph| (ph.level(), ph.is_priority_dosing()))
}

fn make_ctx<'a>(
    services: &'a Services,
    cfg: &ControllerCfg,
    interlock: &'a [u8],
    env: Env,
    chemicals: &[ChemicalDoser],
) -> TickContext<'a> {
    let (ph_level, ph_priority_dosing) = ph_view(chemicals);
    TickContext {
        services,
        now: env.now,
        body_on: env.body_on,
        flow_detected: env.flow_detected,
        freeze_active: env.freeze_active,
        flowing_since: env.flowing_since,
        ph_level,
        ph_priority_dosing,
        gallons: cfg.bodies.capacity(cfg.body),
        size_adj: cfg.bodies.size_adjustment(cfg.body),
        water: cfg.water,
        interlock_chlorinators: interlock,
    }
}

pub struct ChemController {
    cfg: ControllerCfg,
    services: Services,
    flow: FlowSensor,
    chemicals: Vec<ChemicalDoser>,
    interlock: Vec<u8>,
    suspend: SuspendCounter,
    service_guard: Option<SuspendGuard>,
    body_on: bool,
    freeze_active: bool,
    alarms: ControllerAlarms,
    warnings: ControllerWarnings,
    saturation_index: Option<f64>,
    changed: bool,
}

impl std::fmt::Debug for ChemController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChemController")
            .field("id", &self.cfg.id)
            .field("body", &self.cfg.body)
            .field("chemicals", &self.chemicals)
            .field("suspended", &self.suspend.count())
            .finish()
    }
}

impl ChemController {
    pub(crate) fn new(cfg: ControllerCfg, services: Services, suspend: SuspendCounter) -> Self {
        let mut chemicals: Vec<ChemicalDoser> = cfg.chemicals.iter().cloned().map(ChemicalDoser::new).collect();
        // pH is evaluated first so ORP sees its priority state.
        chemicals.sort_by_key(ChemicalDoser::kind);
        Self {
            flow: FlowSensor::new(cfg.flow_sensor.clone()),
            interlock: cfg.interlock_chlorinators(),
            cfg,
            services,
            chemicals,
            suspend,
            service_guard: None,
            body_on: false,
            freeze_active: false,
            alarms: ControllerAlarms::default(),
            warnings: ControllerWarnings::default(),
            saturation_index: None,
            changed: true,
        }
    }

    pub fn builder() -> crate::builder::ControllerBuilder {
        crate::builder::ControllerBuilder::default()
    }

    pub fn id(&self) -> u8 {
        self.cfg.id
    }

    pub fn cfg(&self) -> &ControllerCfg {
        &self.cfg
    }

    pub fn suspend_counter(&self) -> SuspendCounter {
        self.suspend.clone()
    }

    pub fn in_service_mode(&self) -> bool {
        self.service_guard.is_some()
    }

    pub fn alarms(&self) -> ControllerAlarms {
        self.alarms
    }

    pub fn chemical(&self, kind: ChemicalKind) -> Option<&ChemicalDoser> {
        self.chemicals.iter().find(|c| c.kind() == kind)
    }

    pub fn chemicals(&self) -> &[ChemicalDoser] {
        &self.chemicals
    }

    fn chemical_index(&self, kind: ChemicalKind) -> Result<usize, ChemError> {
        self.chemicals
            .iter()
            .position(|c| c.kind() == kind)
            .ok_or_else(|| ChemError::InvalidId {
                kind: "chemical",
                id: format!("{kind} on controller {}", self.cfg.id),
            })
    }

    /// Conditions for commands and fine ticks: live body/freeze state, flow
    /// from the last poll.
    fn live_env(&mut self) -> Env {
        let body_on = self.services.pool.is_body_on(self.cfg.body);
        let freeze_active = self.services.pool.freeze_active();
        self.note_conditions(body_on, freeze_active);
        Env {
            now: self.services.now(),
            body_on,
            flow_detected: body_on && self.flow.last().flow_detected,
            freeze_active,
            flowing_since: self.flow.flowing_since(),
        }
    }

    fn note_conditions(&mut self, body_on: bool, freeze_active: bool) {
        if self.body_on != body_on || self.freeze_active != freeze_active {
            self.body_on = body_on;
            self.freeze_active = freeze_active;
            self.changed = true;
        }
    }

    /// Full evaluation. Skipped while suspended.
    pub fn poll(&mut self) {
        if self.suspend.is_suspended() {
            tracing::debug!(controller = self.cfg.id, holders = self.suspend.count(), "poll skipped while suspended");
            return;
        }
        let now = self.services.now();
        let body_on = self.services.pool.is_body_on(self.cfg.body);
        let freeze_active = self.services.pool.freeze_active();
        self.note_conditions(body_on, freeze_active);

        let before = self.flow.last();
        let reading = self.flow.check(&*self.services.transport, body_on, now);
        if reading.flow_detected != before.flow_detected {
            tracing::info!(controller = self.cfg.id, flow = reading.flow_detected, "flow changed");
            self.changed = true;
        }
        let env = Env {
            now,
            body_on,
            flow_detected: reading.flow_detected,
            freeze_active,
            flowing_since: self.flow.flowing_since(),
        };

        let mut comms_ok = true;
        for i in 0..self.chemicals.len() {
            let ctx = make_ctx(&self.services, &self.cfg, &self.interlock, env, &self.chemicals);
            comms_ok &= self.chemicals[i].validate_setup(&ctx);
        }

        let alarms = AlarmEvaluator::controller(&ControllerAlarmInputs {
            has_flow_sensor: self.flow.has_sensor(),
            body_on,
            flow_detected: reading.flow_detected,
            flow_sensor_fault: reading.sensor_fault,
            comms_fault: !comms_ok,
            freeze_active,
            any_disable_on_freeze: self.chemicals.iter().any(ChemicalDoser::disables_on_freeze),
        });
        if alarms != self.alarms {
            for m in alarms.messages() {
                tracing::warn!(controller = self.cfg.id, alarm = %m, "controller alarm");
            }
            self.alarms = alarms;
            self.changed = true;
        }
        for i in 0..self.chemicals.len() {
            let ctx = make_ctx(&self.services, &self.cfg, &self.interlock, env, &self.chemicals);
            self.chemicals[i].process_alarms(&ctx);
        }
        self.update_water_balance(reading.flow_detected);

        for i in 0..self.chemicals.len() {
            let ctx = make_ctx(&self.services, &self.cfg, &self.interlock, env, &self.chemicals);
            let chem = &mut self.chemicals[i];
            if let Err(e) = chem.check_dosing(&ctx) {
                tracing::error!(controller = self.cfg.id, chemical = %chem.kind(), error = ?e, "dosing check failed");
            }
        }
    }

    fn update_water_balance(&mut self, flow_detected: bool) {
        let ph = self.chemical(ChemicalKind::Ph).and_then(ChemicalDoser::level);
        let temp = self.services.pool.water_temperature_c();
        let si = match (ph, temp) {
            (Some(ph), Some(t)) if flow_detected => {
                saturation_index(ph, t, &self.cfg.water, !self.cfg.body_chlorinators.is_empty())
            }
            _ => None,
        };
        let balance = si.map_or(WaterBalance::Ok, WaterBalance::classify);
        if si != self.saturation_index || balance != self.warnings.water_chemistry {
            self.saturation_index = si;
            self.warnings.water_chemistry = balance;
            self.changed = true;
        }
    }

    /// Advance active doses and mixes; runs even while suspended so operator
    /// doses keep going.
    pub fn tick(&mut self) {
        if self
            .chemicals
            .iter()
            .all(|c| c.status() == DosingStatus::Monitoring && c.dose().is_none())
        {
            return;
        }
        let env = self.live_env();
        for i in 0..self.chemicals.len() {
            let ctx = make_ctx(&self.services, &self.cfg, &self.interlock, env, &self.chemicals);
            self.chemicals[i].tick(&ctx);
        }
    }

    fn with_chemical<T>(
        &mut self,
        kind: ChemicalKind,
        f: impl FnOnce(&mut ChemicalDoser, &TickContext<'_>) -> Result<T, ChemError>,
    ) -> Result<T, ChemError> {
        let _guard = self.suspend.hold();
        let idx = self.chemical_index(kind)?;
        let env = self.live_env();
        let ctx = make_ctx(&self.services, &self.cfg, &self.interlock, env, &self.chemicals);
        f(&mut self.chemicals[idx], &ctx)
    }

    pub fn manual_dose(&mut self, kind: ChemicalKind, volume: f64) -> Result<(), ChemError> {
        tracing::info!(controller = self.cfg.id, chemical = %kind, volume, "manual dose requested");
        self.with_chemical(kind, |c, ctx| c.manual_dose(ctx, volume))
    }

    pub fn calibrate(&mut self, kind: ChemicalKind, secs: f64) -> Result<(), ChemError> {
        tracing::info!(controller = self.cfg.id, chemical = %kind, secs, "calibration dose requested");
        self.with_chemical(kind, |c, ctx| c.calibrate(ctx, secs))
    }

    pub fn cancel_dose(&mut self, kind: ChemicalKind) -> Result<(), ChemError> {
        self.with_chemical(kind, |c, ctx| {
            c.cancel_dose(ctx);
            Ok(())
        })
    }

    pub fn manual_mix(&mut self, kind: ChemicalKind, secs: f64) -> Result<(), ChemError> {
        tracing::info!(controller = self.cfg.id, chemical = %kind, secs, "manual mix requested");
        self.with_chemical(kind, |c, ctx| c.manual_mix(ctx, secs))
    }

    pub fn cancel_mix(&mut self, kind: ChemicalKind) -> Result<(), ChemError> {
        self.with_chemical(kind, |c, _| {
            c.cancel_mix();
            Ok(())
        })
    }

    pub fn set_level(&mut self, kind: ChemicalKind, level: f64) -> Result<(), ChemError> {
        self.with_chemical(kind, |c, _| c.set_level(level))
    }

    pub fn set_tank_level(&mut self, kind: ChemicalKind, level: f64) -> Result<(), ChemError> {
        self.with_chemical(kind, |c, _| c.set_tank_level(level))
    }

    /// Replace one chemical's settings.
    pub fn set_chemical_config(&mut self, cfg: ChemicalCfg) -> Result<(), ChemError> {
        let kind = cfg.kind();
        let stored = cfg.clone();
        self.with_chemical(kind, |c, ctx| c.set_config(ctx, cfg))?;
        if let Some(slot) = self.cfg.chemicals.iter_mut().find(|c| c.kind() == kind) {
            *slot = stored;
        }
        self.interlock = self.cfg.interlock_chlorinators();
        Ok(())
    }

    /// Entering ends every dose and mix and holds the poll off until exit.
    pub fn set_service_mode(&mut self, on: bool) {
        match (on, self.service_guard.is_some()) {
            (true, false) => {
                tracing::info!(controller = self.cfg.id, "entering service mode");
                self.service_guard = Some(self.suspend.hold());
                self.halt_all(CancelReason::ServiceMode);
            }
            (false, true) => {
                tracing::info!(controller = self.cfg.id, "leaving service mode");
                self.service_guard = None;
            }
            _ => {}
        }
        self.changed = true;
    }

    fn halt_all(&mut self, reason: CancelReason) {
        let env = self.live_env();
        for i in 0..self.chemicals.len() {
            let ctx = make_ctx(&self.services, &self.cfg, &self.interlock, env, &self.chemicals);
            self.chemicals[i].halt(&ctx, reason);
        }
    }

    /// Stop everything before the controller goes away.
    pub fn close(&mut self) {
        tracing::info!(controller = self.cfg.id, "closing controller");
        self.halt_all(CancelReason::Closing);
        self.service_guard = None;
    }

    pub fn persist(&self) -> Vec<(ChemicalKind, PersistedChemical)> {
        self.chemicals.iter().map(|c| (c.kind(), c.persist())).collect()
    }

    pub fn restore(&mut self, saved: &[(ChemicalKind, PersistedChemical)]) {
        for (kind, p) in saved {
            match self.chemicals.iter_mut().find(|c| c.kind() == *kind) {
                Some(c) => c.restore(p),
                None => tracing::warn!(controller = self.cfg.id, chemical = %kind, "no doser for persisted state"),
            }
        }
        self.changed = true;
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let mut messages = self.alarms.messages();
        match self.warnings.water_chemistry {
            WaterBalance::Ok => {}
            WaterBalance::Corrosive => messages.push("water is corrosive".to_string()),
            WaterBalance::Scaling => messages.push("water is scaling".to_string()),
        }
        ControllerSnapshot {
            id: self.cfg.id,
            name: self.cfg.name.clone(),
            body: self.cfg.body,
            is_body_on: self.body_on,
            flow_detected: self.flow.last().flow_detected,
            freeze_active: self.freeze_active,
            suspended: self.suspend.is_suspended(),
            saturation_index: self.saturation_index,
            alarms: self.alarms,
            warnings: self.warnings,
            messages,
            chemicals: self.chemicals.iter().map(ChemicalDoser::snapshot).collect(),
        }
    }

    /// Events accumulated since the last call: finished doses, then one
    /// snapshot if anything changed.
    pub fn take_events(&mut self) -> Vec<EquipmentEvent> {
        let id = self.cfg.id;
        let mut events = Vec::new();
        let mut changed = std::mem::take(&mut self.changed);
        for chem in &mut self.chemicals {
            changed |= chem.take_changed();
            events.extend(
                chem.take_finished()
                    .into_iter()
                    .map(|record| EquipmentEvent::DoseFinished { controller: id, record }),
            );
        }
        if changed {
            events.push(EquipmentEvent::Changed(self.snapshot()));
        }
        events
    }
}
