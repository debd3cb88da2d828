//! The per-chemical state machine (`ChemicalDoser`).
//!
//! Drives one chemical through monitoring → dosing → mixing. The controller
//! calls [`ChemicalDoser::check_dosing`] every poll and
//! [`ChemicalDoser::tick`] every second; operator commands land on the
//! `manual_*`/`cancel_*` methods. All transitions go through `start_dose`,
//! `end_dose`, `start_mix` and `stop_mixing` so the status always matches the
//! active dose/mix.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chem_traits::{ChlorinatorCommand, ChlorinatorRuntimeState};
use chrono::NaiveDate;
use eyre::WrapErr;

use crate::alarms::{AlarmEvaluator, ChemicalAlarmInputs};
use crate::chemistry::ph_demand_ml;
use crate::chlorinator::{ChlorinatorBridge, interval_remainder};
use crate::config::{ChemicalCfg, ChemicalKind, DosingMethod, KindCfg, ProbeCfg};
use crate::context::TickContext;
use crate::demand::DemandHistory;
use crate::dose::{Dose, DoseRecord};
use crate::dosing_strategy::{DoseLimits, DosePlan};
use crate::error::{ChemError, Result};
use crate::hw_error::map_hw_error;
use crate::mix::MixCycle;
use crate::pump::{DosingPump, LATCH};
use crate::state::{
    ChemicalRuntimeState, ChemicalSnapshot, DoseProgress, MixProgress, PersistedChemical,
    TankSnapshot,
};
use crate::status::{CancelReason, DoseMethod, DosingStatus};
use crate::tank::Tank;
use crate::util::{round_to, secs_for_volume, secs_to_duration};

/// Finished doses kept for snapshots and the CLI.
const HISTORY_LEN: usize = 50;

#[derive(Debug)]
enum Actuator {
    None,
    Pump(DosingPump),
    Chlorinator(ChlorinatorBridge),
}

impl Actuator {
    fn from_cfg(cfg: &ChemicalCfg) -> Self {
        if let Some(link) = cfg.chlorinator() {
            Actuator::Chlorinator(ChlorinatorBridge::new(*link))
        } else if let Some(p) = &cfg.pump {
            Actuator::Pump(DosingPump::new(p.clone()))
        } else {
            Actuator::None
        }
    }

    fn is_on(&self) -> bool {
        match self {
            Actuator::None => false,
            Actuator::Pump(p) => p.is_on(),
            Actuator::Chlorinator(c) => c.is_on(),
        }
    }

    fn is_faulted(&self) -> bool {
        match self {
            Actuator::None => false,
            Actuator::Pump(p) => p.is_faulted(),
            Actuator::Chlorinator(c) => c.is_faulted(),
        }
    }

    fn rate_per_sec(&self) -> f64 {
        match self {
            Actuator::None => 0.0,
            Actuator::Pump(p) => p.rate_per_sec(),
            Actuator::Chlorinator(c) => c.rate_per_sec(),
        }
    }

    fn latch(&mut self, ctx: &TickContext<'_>) -> Result<bool> {
        match self {
            Actuator::None => Ok(false),
            Actuator::Pump(p) => p.latch(ctx.transport()),
            Actuator::Chlorinator(c) => c.latch(ctx.chlorinators()),
        }
    }

    fn stop(&mut self, ctx: &TickContext<'_>) -> Result<()> {
        match self {
            Actuator::None => Ok(()),
            Actuator::Pump(p) => p.stop(ctx.transport()),
            Actuator::Chlorinator(c) => c.stop(ctx.chlorinators()),
        }
    }
}

/// What a poll decided for an enabled, non-manual chemical.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Decision {
    /// Monitor only; nothing to start or stop.
    Idle,
    Cancel(CancelReason),
    /// Keep the active dose; the tick drives it.
    Continue,
    /// Rebuild an interrupted dose from persisted progress.
    Resume,
    Start(DosePlan),
}

pub struct ChemicalDoser {
    cfg: ChemicalCfg,
    state: ChemicalRuntimeState,
    actuator: Actuator,
    tank: Tank,
    dose: Option<Dose>,
    mix: Option<MixCycle>,
    /// Auto mixes track the configured mixing time; manual and chlorinator
    /// interval mixes keep their own total.
    mix_follows_config: bool,
    demand_history: DemandHistory,
    last_dose_start: Option<Instant>,
    held_chlorinators: Vec<u8>,
    probe_fault: bool,
    pump_status_fault: bool,
    chlor_state: Option<ChlorinatorRuntimeState>,
    chlor_comms_fault: bool,
    invalid_setup: bool,
    history: VecDeque<DoseRecord>,
    finished: Vec<DoseRecord>,
    next_dose_id: u64,
}

impl std::fmt::Debug for ChemicalDoser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChemicalDoser")
            .field("kind", &self.kind())
            .field("status", &self.state.status())
            .field("dose", &self.dose.as_ref().map(|d| d.id))
            .field("mixing", &self.mix.is_some())
            .finish()
    }
}

impl ChemicalDoser {
    pub fn new(cfg: ChemicalCfg) -> Self {
        let mut state = ChemicalRuntimeState::default();
        state.set_level(cfg.initial_level);
        Self {
            actuator: Actuator::from_cfg(&cfg),
            tank: Tank::new(&cfg.tank),
            cfg,
            state,
            dose: None,
            mix: None,
            mix_follows_config: true,
            demand_history: DemandHistory::default(),
            last_dose_start: None,
            held_chlorinators: Vec::new(),
            probe_fault: false,
            pump_status_fault: false,
            chlor_state: None,
            chlor_comms_fault: false,
            invalid_setup: false,
            history: VecDeque::with_capacity(HISTORY_LEN),
            finished: Vec::new(),
            next_dose_id: 0,
        }
    }

    pub fn kind(&self) -> ChemicalKind {
        self.cfg.kind()
    }

    pub fn cfg(&self) -> &ChemicalCfg {
        &self.cfg
    }

    pub fn state(&self) -> &ChemicalRuntimeState {
        &self.state
    }

    pub fn status(&self) -> DosingStatus {
        self.state.status()
    }

    pub fn tank(&self) -> &Tank {
        &self.tank
    }

    pub fn dose(&self) -> Option<&Dose> {
        self.dose.as_ref()
    }

    pub fn mix(&self) -> Option<&MixCycle> {
        self.mix.as_ref()
    }

    pub fn level(&self) -> Option<f64> {
        self.state.level()
    }

    pub fn recent_doses(&self) -> impl Iterator<Item = &DoseRecord> {
        self.history.iter()
    }

    /// Records finished since the last call.
    pub fn take_finished(&mut self) -> Vec<DoseRecord> {
        std::mem::take(&mut self.finished)
    }

    pub fn take_changed(&mut self) -> bool {
        self.state.take_changed()
    }

    fn uses_pump(&self) -> bool {
        matches!(self.actuator, Actuator::Pump(_))
    }

    /// Priority pH dose in progress; the ORP chlorinator must stand down.
    pub fn is_priority_dosing(&self) -> bool {
        let priority = matches!(&self.cfg.kind, KindCfg::Ph(p) if p.dose_priority);
        priority
            && self.state.status() == DosingStatus::Dosing
            && self.dose.as_ref().is_some_and(|d| d.method != DoseMethod::Calibration)
    }

    pub fn disables_on_freeze(&self) -> bool {
        self.cfg.enabled && self.cfg.disable_on_freeze
    }

    fn holds_chlorinators(&self) -> bool {
        match &self.cfg.kind {
            KindCfg::Ph(p) => p.dose_priority,
            KindCfg::Generic(g) => g.disable_chlorinator,
            KindCfg::Orp(_) => false,
        }
    }

    pub fn daily_limit_reached(&self) -> bool {
        AlarmEvaluator::daily_limit_reached(&self.cfg, self.state.daily_volume_dosed())
    }

    // ---- configuration and operator readings -------------------------------

    /// Operator-entered reading (probe type `Other`, or a manual override).
    pub fn set_level(&mut self, level: f64) -> std::result::Result<(), ChemError> {
        if !level.is_finite() {
            return Err(ChemError::InvalidData(format!("{} level must be a number", self.kind())));
        }
        if self.kind() == ChemicalKind::Ph && !(0.0..=14.0).contains(&level) {
            return Err(ChemError::InvalidData(format!("pH level {level} is outside 0..14")));
        }
        self.state.set_level(Some(level));
        Ok(())
    }

    pub fn set_tank_level(&mut self, level: f64) -> std::result::Result<(), ChemError> {
        if !level.is_finite() || level < 0.0 {
            return Err(ChemError::InvalidData(format!("tank level must be >= 0, got {level}")));
        }
        self.tank.set_level(level);
        self.state.mark_changed();
        Ok(())
    }

    /// Swap in new settings. A changed actuator ends any dose first.
    pub fn set_config(&mut self, ctx: &TickContext<'_>, cfg: ChemicalCfg) -> std::result::Result<(), ChemError> {
        if cfg.kind() != self.kind() {
            return Err(ChemError::InvalidData(format!(
                "cannot change a {} doser into {}",
                self.kind(),
                cfg.kind()
            )));
        }
        let actuator_changed = cfg.pump != self.cfg.pump || cfg.chlorinator() != self.cfg.chlorinator();
        if actuator_changed {
            self.cancel_dosing(ctx, CancelReason::Cancelled);
            self.actuator = Actuator::from_cfg(&cfg);
            self.chlor_state = None;
        }
        self.tank.reconfigure(&cfg.tank);
        self.cfg = cfg;
        self.invalid_setup = false;
        self.state.mark_changed();
        tracing::info!(chemical = %self.kind(), actuator_changed, "chemical configuration updated");
        Ok(())
    }

    // ---- restart state -----------------------------------------------------

    pub fn persist(&self) -> PersistedChemical {
        self.state
            .to_persisted(self.uses_pump().then(|| self.tank.level()))
    }

    /// Load persisted progress. The interrupted dose or mix is rebuilt on the
    /// next `check_dosing`.
    pub fn restore(&mut self, p: &PersistedChemical) {
        self.state.restore(p);
        if let Some(level) = p.tank_level {
            self.tank.set_level(level);
        }
        tracing::info!(chemical = %self.kind(), status = %p.status, "restored runtime state");
    }

    // ---- per-poll evaluation -----------------------------------------------

    fn roll_daily(&mut self, today: NaiveDate) {
        if self.state.daily_date() == Some(today) {
            return;
        }
        if self.state.daily_date().is_some() {
            tracing::info!(
                chemical = %self.kind(),
                dosed = self.state.daily_volume_dosed(),
                "daily dosing volume reset"
            );
        }
        self.state.set_daily_volume_dosed(0.0);
        self.state.set_daily_date(Some(today));
        let mut w = self.state.warnings();
        w.daily_limit_reached = self.cfg.enabled && self.daily_limit_reached();
        self.state.set_warnings(w);
    }

    /// Query probe, pump and chlorinator status. Returns false when any
    /// device could not be reached.
    pub fn validate_setup(&mut self, ctx: &TickContext<'_>) -> bool {
        let mut comms_ok = true;
        let kind = self.kind();

        self.probe_fault = false;
        if let ProbeCfg::Remote { binding } = &self.cfg.probe {
            match ctx.transport().read_value(binding) {
                Ok(v) => match v.as_f64() {
                    Some(x) => self.state.set_level(Some(round_to(x, 3))),
                    None => {
                        tracing::warn!(chemical = %kind, binding = %binding, value = ?v, "probe returned a non-numeric value");
                        self.probe_fault = true;
                    }
                },
                Err(e) => {
                    tracing::warn!(chemical = %kind, binding = %binding, error = %map_hw_error(&*e), "probe read failed");
                    self.probe_fault = true;
                    comms_ok = false;
                }
            }
            match ctx.transport().query_status(binding) {
                Ok(st) => self.probe_fault |= st.has_fault,
                Err(e) => {
                    tracing::warn!(chemical = %kind, binding = %binding, error = %map_hw_error(&*e), "probe status query failed");
                    self.probe_fault = true;
                    comms_ok = false;
                }
            }
        }

        match &self.actuator {
            Actuator::None => {}
            Actuator::Pump(p) => match p.query_fault(ctx.transport()) {
                Ok(f) => self.pump_status_fault = f,
                Err(e) => {
                    tracing::warn!(chemical = %kind, error = %e, "pump status query failed");
                    comms_ok = false;
                }
            },
            Actuator::Chlorinator(c) => match c.state(ctx.chlorinators()) {
                Ok(st) => {
                    self.chlor_comms_fault = false;
                    self.chlor_state = Some(st);
                }
                Err(e) => {
                    tracing::warn!(chemical = %kind, error = %e, "chlorinator status query failed");
                    self.chlor_comms_fault = true;
                    self.chlor_state = None;
                    comms_ok = false;
                }
            },
        }
        comms_ok
    }

    pub fn process_alarms(&mut self, ctx: &TickContext<'_>) {
        self.roll_daily(ctx.services.clock.today());
        let chlorinator_fault =
            self.chlor_comms_fault || self.chlor_state.as_ref().is_some_and(|s| s.fault);
        let inputs = ChemicalAlarmInputs {
            cfg: &self.cfg,
            tank: self.uses_pump().then_some(&self.tank),
            level: self.state.level(),
            flow_detected: ctx.flow_detected,
            probe_fault: self.probe_fault,
            pump_fault: self.pump_status_fault || self.actuator.is_faulted(),
            chlorinator_fault,
            invalid_setup: self.invalid_setup,
            daily_volume_dosed: self.state.daily_volume_dosed(),
            ph_level: ctx.ph_level,
        };
        let (alarms, warnings) = AlarmEvaluator::chemical(&inputs);
        self.state.set_alarms(alarms);
        self.state.set_warnings(warnings);
    }

    /// Decide whether to start, continue or cancel a dose.
    pub fn check_dosing(&mut self, ctx: &TickContext<'_>) -> Result<()> {
        self.roll_daily(ctx.services.clock.today());
        self.state.set_is_body_on(ctx.body_on);
        self.state.set_flow_detected(ctx.flow_detected);
        self.state
            .set_freeze_protect(ctx.freeze_active && ctx.body_on && self.cfg.disable_on_freeze);

        if !self.cfg.enabled {
            self.cancel_dosing(ctx, CancelReason::Disabled);
            self.stop_mixing();
            return Ok(());
        }
        if self.cfg.suspend_dosing {
            self.cancel_dosing(ctx, CancelReason::Suspended);
            return Ok(());
        }

        match self.state.status() {
            DosingStatus::Monitoring => {
                // Leftovers from an interrupted transition.
                if self.mix.is_some() {
                    self.stop_mixing();
                }
                self.cancel_dosing(ctx, CancelReason::Unknown);
            }
            DosingStatus::Mixing => {
                self.cancel_dosing(ctx, CancelReason::Unknown);
                if self.mix.is_none() {
                    self.resume_mix(ctx);
                }
                return Ok(());
            }
            DosingStatus::Dosing => {}
        }

        if self.state.manual_dosing() {
            if self.dose.is_none() {
                self.resume_dose(ctx, DoseMethod::Manual);
            }
            let calibrating = self.dose.as_ref().is_some_and(|d| d.method == DoseMethod::Calibration);
            if self.uses_pump() && self.tank.is_empty() && !calibrating {
                self.cancel_dosing(ctx, CancelReason::EmptyTank);
            }
            return Ok(());
        }

        if self.daily_limit_reached() {
            self.cancel_dosing(ctx, CancelReason::DailyLimit);
            return Ok(());
        }

        match self.decide(ctx)? {
            Decision::Idle | Decision::Continue => {}
            Decision::Cancel(reason) => self.cancel_dosing(ctx, reason),
            Decision::Resume => self.resume_dose(ctx, DoseMethod::Auto),
            Decision::Start(plan) => self.start_dose(ctx, DoseMethod::Auto, plan.volume, plan.time),
        }
        Ok(())
    }

    fn update_demand(&mut self, ctx: &TickContext<'_>) -> f64 {
        let level = self.state.level();
        let demand = match &self.cfg.kind {
            KindCfg::Ph(ph) => match (level, ctx.gallons) {
                (Some(l), Some(gal)) => ph_demand_ml(l, self.cfg.setpoint, gal, &ctx.water, ph.supply, ph.acid),
                _ => 0.0,
            },
            KindCfg::Orp(_) => match level {
                Some(l) => {
                    let d = self.cfg.setpoint - l;
                    if ctx.flow_detected {
                        self.demand_history.push(ctx.now, d);
                    }
                    d
                }
                None => 0.0,
            },
            KindCfg::Generic(g) => g.dosing_volume,
        };
        self.state.set_demand(round_to(demand, 3));
        demand
    }

    fn decide(&mut self, ctx: &TickContext<'_>) -> Result<Decision> {
        let demand = self.update_demand(ctx);

        if !ctx.body_on {
            return Ok(Decision::Cancel(CancelReason::BodyOff));
        }
        if ctx.freeze_active && self.cfg.disable_on_freeze {
            return Ok(Decision::Cancel(CancelReason::Freeze));
        }
        if !ctx.flow_detected {
            return Ok(Decision::Cancel(CancelReason::NoFlow));
        }
        if let KindCfg::Orp(orp) = &self.cfg.kind {
            if self.cfg.probe.is_present() && ctx.ph_level.is_some_and(|ph| ph > orp.ph_lockout) {
                return Ok(Decision::Cancel(CancelReason::PhLockout));
            }
        }

        let resuming = self.state.status() == DosingStatus::Dosing && self.dose.is_none();
        let daily_left = (self.cfg.max_daily_volume - self.state.daily_volume_dosed()).max(0.0);

        let Actuator::Pump(pump) = &self.actuator else {
            if let Actuator::Chlorinator(bridge) = &self.actuator {
                let decision = self.decide_chlorinator(ctx, bridge, demand, resuming);
                self.invalid_setup = decision.is_err();
                return decision;
            }
            return Ok(Decision::Idle);
        };
        let rated_flow = pump.cfg().rated_flow;

        let want = match &self.cfg.kind {
            KindCfg::Ph(_) => demand.min(daily_left),
            KindCfg::Orp(_) if demand > 0.0 => self.cfg.max_dosing_volume.min(daily_left),
            KindCfg::Orp(_) => 0.0,
            KindCfg::Generic(_) => demand.min(daily_left),
        };
        if want <= 0.0 {
            return Ok(Decision::Cancel(CancelReason::SetpointReached));
        }
        if self.tank.is_empty() {
            return Ok(Decision::Cancel(CancelReason::EmptyTank));
        }
        if self.dose.is_some() {
            return Ok(Decision::Continue);
        }
        if resuming {
            return Ok(Decision::Resume);
        }

        let limits = DoseLimits {
            method: self.cfg.dosing_method,
            max_time: self.cfg.max_dosing_time as f64,
            max_volume: self.cfg.max_dosing_volume,
            rated_flow,
        };
        let plan = limits.apply(DosePlan::for_volume(round_to(want, 0), rated_flow));
        if plan.is_empty() || plan.time <= 0.0 {
            return Ok(Decision::Cancel(CancelReason::SetpointReached));
        }
        Ok(Decision::Start(plan))
    }

    fn decide_chlorinator(
        &self,
        ctx: &TickContext<'_>,
        bridge: &ChlorinatorBridge,
        demand: f64,
        resuming: bool,
    ) -> Result<Decision> {
        if !bridge.drives_output() {
            return Ok(Decision::Idle);
        }
        if self.chlor_state.as_ref().is_some_and(|s| s.super_chlor) {
            return Ok(Decision::Cancel(CancelReason::SuperChlor));
        }
        if ctx.ph_priority_dosing {
            return Ok(Decision::Cancel(CancelReason::PhPriority));
        }
        if self.dose.is_some() {
            return Ok(Decision::Continue);
        }
        if resuming {
            return Ok(Decision::Resume);
        }
        let slope = self.demand_history.slope_per_hour();
        match bridge.plan(demand, slope, ctx.size_adj) {
            Ok(Some(plan)) => Ok(Decision::Start(plan)),
            Ok(None) => Ok(Decision::Cancel(CancelReason::SetpointReached)),
            Err(e) => Err(eyre::Report::new(e)).wrap_err("planning chlorinator dose"),
        }
    }

    // ---- dose lifecycle ----------------------------------------------------

    fn start_dose(&mut self, ctx: &TickContext<'_>, method: DoseMethod, volume: f64, time: f64) {
        self.next_dose_id += 1;
        let dose = Dose::new(
            self.next_dose_id,
            method,
            volume,
            time,
            0.0,
            Duration::ZERO,
            ctx.now,
            self.state.demand(),
            self.state.level(),
        );
        tracing::info!(chemical = %self.kind(), id = dose.id, ?method, volume, time, "dose started");
        self.begin(ctx, dose);
    }

    /// Rebuild an interrupted dose from the persisted progress fields.
    fn resume_dose(&mut self, ctx: &TickContext<'_>, method: DoseMethod) {
        let calibrating = self.state.dose_volume() < 0.0;
        let dosed = self.state.volume_dosed();
        let time_dosed = self.state.time_dosed();
        let mut time = time_dosed + self.state.dosing_time_remaining();
        let volume = if calibrating {
            -1.0
        } else {
            dosed + self.state.dosing_volume_remaining()
        };
        if !calibrating && self.state.dosing_time_remaining() <= 0.0 {
            if let Actuator::Pump(p) = &self.actuator {
                time = time_dosed + secs_for_volume(self.state.dosing_volume_remaining(), p.cfg().rated_flow);
            }
        }
        if time <= time_dosed || (!calibrating && volume <= dosed) {
            tracing::info!(chemical = %self.kind(), "nothing left of interrupted dose");
            self.state.set_manual_dosing(false);
            self.state.clear_dose_fields();
            self.state.set_status(DosingStatus::Monitoring);
            return;
        }
        let method = if calibrating { DoseMethod::Calibration } else { method };
        self.next_dose_id += 1;
        let dose = Dose::new(
            self.next_dose_id,
            method,
            volume,
            time,
            dosed,
            secs_to_duration(time_dosed.max(0.0)).unwrap_or_default(),
            ctx.now,
            self.state.demand(),
            self.state.level(),
        );
        tracing::info!(chemical = %self.kind(), id = dose.id, ?method, volume, volume_dosed = dosed, "resuming interrupted dose");
        self.begin(ctx, dose);
    }

    fn begin(&mut self, ctx: &TickContext<'_>, dose: Dose) {
        self.stop_mixing();
        let calibrating = dose.method == DoseMethod::Calibration;
        self.last_dose_start = Some(ctx.now);
        self.dose = Some(dose);
        self.state.set_status(DosingStatus::Dosing);
        self.sync_dose_fields();
        if !calibrating {
            self.hold_chlorinators(ctx);
        }
        self.dose_step(ctx);
    }

    fn sync_dose_fields(&mut self) {
        let Some(d) = &self.dose else {
            return;
        };
        let (volume, time, dosed, time_dosed, vol_rem, time_rem) = (
            d.volume,
            d.time,
            d.volume_dosed,
            round_to(d.time_dosed.as_secs_f64(), 3),
            round_to(d.volume_remaining(), 6),
            d.time_remaining(),
        );
        self.state.set_dose_volume(volume);
        self.state.set_dose_time(time);
        self.state.set_volume_dosed(dosed);
        self.state.set_time_dosed(time_dosed);
        self.state.set_dosing_volume_remaining(vol_rem);
        self.state.set_dosing_time_remaining(time_rem);
    }

    fn step_blocker(&self, dose: &Dose, ctx: &TickContext<'_>) -> Option<CancelReason> {
        let calibrating = dose.method == DoseMethod::Calibration;
        if !ctx.body_on {
            return Some(CancelReason::BodyOff);
        }
        if ctx.freeze_active && self.cfg.disable_on_freeze {
            return Some(CancelReason::Freeze);
        }
        if !ctx.flow_detected {
            return Some(CancelReason::NoFlow);
        }
        if self.uses_pump() && self.tank.is_empty() && !calibrating {
            return Some(CancelReason::EmptyTank);
        }
        if dose.is_satisfied() {
            return Some(CancelReason::Completed);
        }
        if dose.method == DoseMethod::Auto && self.uses_pump() {
            let m = self.cfg.dosing_method;
            if m != DosingMethod::Volume && dose.time_dosed.as_secs() >= self.cfg.max_dosing_time {
                return Some(CancelReason::TimeLimit);
            }
            if m != DosingMethod::Time && dose.volume_dosed >= self.cfg.max_dosing_volume {
                return Some(CancelReason::VolumeLimit);
            }
        }
        None
    }

    fn start_delay_remaining(&self, ctx: &TickContext<'_>) -> Option<Duration> {
        if self.cfg.start_delay.is_zero() {
            return None;
        }
        let since = ctx.flowing_since?;
        let rem = self
            .cfg
            .start_delay
            .saturating_sub(ctx.now.saturating_duration_since(since));
        (!rem.is_zero()).then_some(rem)
    }

    /// One actuator tick: check interlocks, renew the latch and account for
    /// the on-time confirmed since the previous latch.
    fn dose_step(&mut self, ctx: &TickContext<'_>) {
        let Some(mut dose) = self.dose.take() else {
            return;
        };
        if let Some(reason) = self.step_blocker(&dose, ctx) {
            self.dose = Some(dose);
            self.end_dose(ctx, reason);
            return;
        }

        let calibrating = dose.method == DoseMethod::Calibration;
        if !calibrating {
            if let Some(rem) = self.start_delay_remaining(ctx) {
                self.state.set_flow_delay(true);
                self.state.set_delay_time_remaining(rem.as_secs_f64().ceil());
                if self.actuator.is_on() {
                    if let Err(e) = self.actuator.stop(ctx) {
                        tracing::warn!(chemical = %self.kind(), error = %e, "actuator stop failed during start delay");
                    }
                }
                dose.last_latch = None;
                self.dose = Some(dose);
                return;
            }
        }
        self.state.set_flow_delay(false);
        self.state.set_delay_time_remaining(0.0);
        if !calibrating {
            // Picks up any chlorinator whose hold failed on an earlier tick.
            self.hold_chlorinators(ctx);
        }

        match self.actuator.latch(ctx) {
            Ok(true) => {
                if let Some(prev) = dose.last_latch {
                    // The relay drops out on its own after one latch window.
                    let on_time = ctx.now.saturating_duration_since(prev).min(LATCH);
                    let added = dose.accrue(on_time, self.actuator.rate_per_sec());
                    if self.uses_pump() {
                        self.tank.draw_ml(added);
                        if !calibrating {
                            let daily = round_to(self.state.daily_volume_dosed() + added, 6);
                            self.state.set_daily_volume_dosed(daily);
                        }
                    }
                }
                dose.last_latch = Some(ctx.now);
            }
            Ok(false) => dose.last_latch = None,
            Err(e) => {
                tracing::warn!(chemical = %self.kind(), id = dose.id, error = %e, "actuator latch failed; retrying next tick");
                dose.last_latch = None;
            }
        }

        let done = dose.is_satisfied();
        self.dose = Some(dose);
        self.sync_dose_fields();
        if done {
            self.end_dose(ctx, CancelReason::Completed);
        }
    }

    /// Stop the actuator, record the dose and move to mixing (completion) or
    /// monitoring (anything else).
    fn end_dose(&mut self, ctx: &TickContext<'_>, reason: CancelReason) {
        let kind = self.kind();
        let dose = self.dose.take();
        if let Err(e) = self.actuator.stop(ctx) {
            tracing::warn!(chemical = %kind, error = %e, "actuator stop failed");
        }
        self.release_chlorinators(ctx);
        self.state.clear_dose_fields();
        self.state.set_manual_dosing(false);

        let calibrating = dose.as_ref().is_some_and(|d| d.method == DoseMethod::Calibration);
        if let Some(d) = dose {
            let record = d.finish(kind, reason);
            tracing::info!(
                chemical = %kind,
                id = record.id,
                reason = %reason,
                volume_dosed = record.volume_dosed,
                time_dosed = record.time_dosed,
                "dose ended"
            );
            if self.history.len() == HISTORY_LEN {
                self.history.pop_front();
            }
            self.history.push_back(record.clone());
            self.finished.push(record);
        } else {
            tracing::info!(chemical = %kind, reason = %reason, "dosing cancelled");
        }

        if reason.is_completion() && !calibrating {
            self.start_post_dose_mix(ctx);
        } else {
            self.state.set_status(DosingStatus::Monitoring);
        }
    }

    /// Idempotent: with nothing active this only makes sure the actuator is
    /// off and any held chlorinator is released.
    pub fn cancel_dosing(&mut self, ctx: &TickContext<'_>, reason: CancelReason) {
        let active = self.dose.is_some() || self.state.status() == DosingStatus::Dosing;
        if active {
            self.end_dose(ctx, reason);
            return;
        }
        if self.actuator.is_on() {
            if let Err(e) = self.actuator.stop(ctx) {
                tracing::warn!(chemical = %self.kind(), error = %e, "actuator stop failed");
            }
        }
        if !self.held_chlorinators.is_empty() {
            self.release_chlorinators(ctx);
        }
        self.state.set_manual_dosing(false);
    }

    fn hold_chlorinators(&mut self, ctx: &TickContext<'_>) {
        if !self.holds_chlorinators() {
            return;
        }
        for &id in ctx.interlock_chlorinators {
            if self.held_chlorinators.contains(&id) {
                continue;
            }
            let cmd = ChlorinatorCommand {
                disabled: Some(true),
                is_dosing: Some(false),
                latch: None,
            };
            match ctx.chlorinators().set_chlorinator(id, cmd) {
                Ok(_) => {
                    tracing::info!(chemical = %self.kind(), chlorinator = id, "chlorinator held for dose priority");
                    self.held_chlorinators.push(id);
                }
                Err(e) => {
                    tracing::warn!(chemical = %self.kind(), chlorinator = id, error = %map_hw_error(&*e), "failed to hold chlorinator");
                }
            }
        }
    }

    /// Re-enable held chlorinators. Failures stay held and are retried on
    /// the next cancel.
    fn release_chlorinators(&mut self, ctx: &TickContext<'_>) {
        let kind = self.kind();
        self.held_chlorinators.retain(|&id| {
            let cmd = ChlorinatorCommand {
                disabled: Some(false),
                ..ChlorinatorCommand::default()
            };
            match ctx.chlorinators().set_chlorinator(id, cmd) {
                Ok(_) => {
                    tracing::info!(chemical = %kind, chlorinator = id, "chlorinator released");
                    false
                }
                Err(e) => {
                    tracing::warn!(chemical = %kind, chlorinator = id, error = %map_hw_error(&*e), "failed to release chlorinator");
                    true
                }
            }
        });
    }

    pub fn held_chlorinators(&self) -> &[u8] {
        &self.held_chlorinators
    }

    // ---- mixing ------------------------------------------------------------

    fn start_post_dose_mix(&mut self, ctx: &TickContext<'_>) {
        if self.cfg.uses_chlorinator() {
            let total = interval_remainder(self.last_dose_start, ctx.now);
            self.start_mix(ctx.now, total, Duration::ZERO, false, false);
        } else {
            let total = Duration::from_secs(self.cfg.mixing_time);
            self.start_mix(ctx.now, total, Duration::ZERO, false, true);
        }
    }

    fn start_mix(&mut self, now: Instant, total: Duration, mixed: Duration, manual: bool, follows_config: bool) {
        let mix = MixCycle::new(total, mixed, manual, now);
        let remaining = mix.remaining();
        self.mix = Some(mix);
        self.mix_follows_config = follows_config;
        self.state.set_status(DosingStatus::Mixing);
        self.state.set_manual_mixing(manual);
        self.state.set_mix_time_remaining(remaining.as_secs_f64().round());
        tracing::info!(chemical = %self.kind(), manual, secs = remaining.as_secs(), "mixing started");
    }

    /// Rebuild a mix interrupted by a restart.
    fn resume_mix(&mut self, ctx: &TickContext<'_>) {
        let Some(remaining) = secs_to_duration(self.state.mix_time_remaining().max(0.0)) else {
            tracing::warn!(chemical = %self.kind(), secs = self.state.mix_time_remaining(), "dropping unusable saved mix time");
            self.state.set_manual_mixing(false);
            self.state.set_mix_time_remaining(0.0);
            self.state.set_status(DosingStatus::Monitoring);
            return;
        };
        if self.state.manual_mixing() || self.cfg.uses_chlorinator() {
            let manual = self.state.manual_mixing();
            self.start_mix(ctx.now, remaining, Duration::ZERO, manual, false);
        } else {
            let total = Duration::from_secs(self.cfg.mixing_time);
            let mixed = total.saturating_sub(remaining);
            self.start_mix(ctx.now, total, mixed, false, true);
        }
    }

    fn mix_step(&mut self, ctx: &TickContext<'_>) {
        let can_advance = !self.cfg.flow_only_mixing
            || (ctx.body_on
                && ctx.flow_detected
                && !(ctx.freeze_active && self.cfg.disable_on_freeze));
        let follows = self.mix_follows_config;
        let configured = Duration::from_secs(self.cfg.mixing_time);
        let Some(mix) = self.mix.as_mut() else {
            return;
        };
        if follows && !mix.manual {
            mix.set_total(configured);
        }
        let remaining = mix.advance(ctx.now, can_advance);
        self.state.set_mix_time_remaining(remaining.as_secs_f64().round());
        if remaining.is_zero() {
            tracing::info!(chemical = %self.kind(), "mixing complete");
            self.stop_mixing();
        }
    }

    /// Idempotent.
    pub fn stop_mixing(&mut self) {
        let had_mix = self.mix.take().is_some();
        if had_mix || self.state.status() == DosingStatus::Mixing {
            self.state.set_status(DosingStatus::Monitoring);
        }
        self.state.set_mix_time_remaining(0.0);
        self.state.set_manual_mixing(false);
    }

    // ---- fine tick ---------------------------------------------------------

    /// Advance the active dose or mix.
    pub fn tick(&mut self, ctx: &TickContext<'_>) {
        self.roll_daily(ctx.services.clock.today());
        if !self.cfg.enabled {
            self.cancel_dosing(ctx, CancelReason::Disabled);
            self.stop_mixing();
            return;
        }
        match self.state.status() {
            DosingStatus::Dosing => self.dose_step(ctx),
            DosingStatus::Mixing => self.mix_step(ctx),
            DosingStatus::Monitoring => {}
        }
    }

    // ---- operator commands -------------------------------------------------

    fn pump_rated_flow(&self) -> std::result::Result<f64, ChemError> {
        match &self.actuator {
            Actuator::Pump(p) => Ok(p.cfg().rated_flow),
            _ => Err(ChemError::EquipmentNotFound(format!("{} has no dosing pump", self.kind()))),
        }
    }

    fn ensure_enabled(&self) -> std::result::Result<(), ChemError> {
        if self.cfg.enabled {
            Ok(())
        } else {
            Err(ChemError::State(format!("{} dosing is disabled", self.kind())))
        }
    }

    /// Operator dose of `volume` mL at the pump's rated flow.
    pub fn manual_dose(&mut self, ctx: &TickContext<'_>, volume: f64) -> std::result::Result<(), ChemError> {
        if !volume.is_finite() || volume <= 0.0 {
            return Err(ChemError::InvalidData(format!("dose volume must be > 0, got {volume}")));
        }
        self.ensure_enabled()?;
        let rated_flow = self.pump_rated_flow()?;
        if self.tank.is_empty() {
            return Err(ChemError::EmptyTank(format!("{} tank is empty", self.kind())));
        }
        self.cancel_dosing(ctx, CancelReason::ManualOverride);
        self.stop_mixing();
        self.state.set_manual_dosing(true);
        let time = secs_for_volume(volume, rated_flow).max(1.0);
        self.start_dose(ctx, DoseMethod::Manual, volume, time);
        Ok(())
    }

    /// Run the pump for `secs` to measure its output. Not blocked by an empty
    /// tank reading; does not count toward the daily volume.
    pub fn calibrate(&mut self, ctx: &TickContext<'_>, secs: f64) -> std::result::Result<(), ChemError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ChemError::InvalidData(format!("calibration time must be > 0, got {secs}")));
        }
        self.ensure_enabled()?;
        self.pump_rated_flow()?;
        self.cancel_dosing(ctx, CancelReason::ManualOverride);
        self.stop_mixing();
        self.state.set_manual_dosing(true);
        self.start_dose(ctx, DoseMethod::Calibration, -1.0, secs.round().max(1.0));
        Ok(())
    }

    pub fn cancel_dose(&mut self, ctx: &TickContext<'_>) {
        self.cancel_dosing(ctx, CancelReason::Cancelled);
    }

    /// Mix for `secs`; an active dose is cancelled first.
    pub fn manual_mix(&mut self, ctx: &TickContext<'_>, secs: f64) -> std::result::Result<(), ChemError> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ChemError::InvalidData(format!("mix time must be > 0, got {secs}")));
        }
        let Some(total) = secs_to_duration(secs) else {
            return Err(ChemError::InvalidData(format!("mix time {secs}s is out of range")));
        };
        self.cancel_dosing(ctx, CancelReason::MixOverride);
        self.stop_mixing();
        self.start_mix(ctx.now, total, Duration::ZERO, true, false);
        Ok(())
    }

    pub fn cancel_mix(&mut self) {
        if self.mix.is_some() {
            tracing::info!(chemical = %self.kind(), "mixing cancelled");
        }
        self.stop_mixing();
    }

    /// Service mode and shutdown both end everything.
    pub fn halt(&mut self, ctx: &TickContext<'_>, reason: CancelReason) {
        self.cancel_dosing(ctx, reason);
        self.stop_mixing();
        self.release_chlorinators(ctx);
    }

    // ---- observers ---------------------------------------------------------

    pub fn snapshot(&self) -> ChemicalSnapshot {
        let kind = self.kind();
        let alarms = self.state.alarms();
        let warnings = self.state.warnings();
        let mut messages = alarms.messages(kind);
        messages.extend(warnings.messages(kind));
        ChemicalSnapshot {
            kind,
            enabled: self.cfg.enabled,
            status: self.state.status(),
            setpoint: self.cfg.setpoint,
            level: self.state.level(),
            demand: self.state.demand(),
            daily_volume_dosed: self.state.daily_volume_dosed(),
            manual_dosing: self.state.manual_dosing(),
            manual_mixing: self.state.manual_mixing(),
            flow_delay: self.state.flow_delay(),
            delay_time_remaining: self.state.delay_time_remaining(),
            dose: self.dose.as_ref().map(|d| DoseProgress {
                id: d.id,
                method: d.method,
                volume: d.volume,
                time: d.time,
                volume_dosed: d.volume_dosed,
                time_dosed: round_to(d.time_dosed.as_secs_f64(), 3),
                volume_remaining: round_to(d.volume_remaining(), 6),
                time_remaining: d.time_remaining(),
            }),
            mix: self.mix.as_ref().map(|m| MixProgress {
                total: m.total.as_secs_f64(),
                remaining: m.remaining().as_secs_f64().round(),
                manual: m.manual,
            }),
            tank: self.uses_pump().then(|| TankSnapshot {
                capacity: self.tank.capacity(),
                level: self.tank.level(),
                units: self.tank.units(),
                level_pct: round_to(self.tank.level_pct(), 1),
            }),
            alarms,
            warnings,
            messages,
        }
    }
}
