//! Worker thread per controller.
//!
//! The thread owns its `ChemController` and multiplexes four sources with
//! `select!`: the poll ticker, the fine dose/mix ticker, operator commands and
//! the shutdown channel. Commands carry their own reply channel, so callers
//! see the result synchronously while the controller itself is never shared.
//!
//! Each `ControllerHandle` spawns exactly one thread, which is stopped and
//! joined when the handle is dropped.

use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::{ChemicalCfg, ChemicalKind};
use crate::controller::ChemController;
use crate::error::ChemError;
use crate::state::{ControllerSnapshot, EquipmentEvent, PersistedChemical};
use crate::suspend::SuspendCounter;

/// How long a caller waits for the worker to answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const COMMAND_QUEUE: usize = 16;

type Reply<T> = xch::Sender<Result<T, ChemError>>;

pub enum Command {
    ManualDose { chemical: ChemicalKind, volume: f64, reply: Reply<()> },
    Calibrate { chemical: ChemicalKind, secs: f64, reply: Reply<()> },
    CancelDose { chemical: ChemicalKind, reply: Reply<()> },
    ManualMix { chemical: ChemicalKind, secs: f64, reply: Reply<()> },
    CancelMix { chemical: ChemicalKind, reply: Reply<()> },
    SetLevel { chemical: ChemicalKind, level: f64, reply: Reply<()> },
    SetTankLevel { chemical: ChemicalKind, level: f64, reply: Reply<()> },
    SetChemicalConfig { cfg: Box<ChemicalCfg>, reply: Reply<()> },
    ServiceMode { on: bool, reply: Reply<()> },
    PollNow { reply: Reply<()> },
    Snapshot { reply: Reply<ControllerSnapshot> },
    Persist { reply: Reply<Vec<(ChemicalKind, PersistedChemical)>> },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::ManualDose { .. } => "ManualDose",
            Command::Calibrate { .. } => "Calibrate",
            Command::CancelDose { .. } => "CancelDose",
            Command::ManualMix { .. } => "ManualMix",
            Command::CancelMix { .. } => "CancelMix",
            Command::SetLevel { .. } => "SetLevel",
            Command::SetTankLevel { .. } => "SetTankLevel",
            Command::SetChemicalConfig { .. } => "SetChemicalConfig",
            Command::ServiceMode { .. } => "ServiceMode",
            Command::PollNow { .. } => "PollNow",
            Command::Snapshot { .. } => "Snapshot",
            Command::Persist { .. } => "Persist",
        };
        f.write_str(name)
    }
}

fn send_reply<T>(reply: &Reply<T>, value: Result<T, ChemError>) {
    // Caller may have timed out and gone away.
    if reply.send(value).is_err() {
        tracing::debug!("command caller disconnected before reply");
    }
}

fn handle(ctl: &mut ChemController, cmd: Command) {
    tracing::trace!(controller = ctl.id(), command = ?cmd, "command received");
    match cmd {
        Command::ManualDose { chemical, volume, reply } => {
            send_reply(&reply, ctl.manual_dose(chemical, volume));
        }
        Command::Calibrate { chemical, secs, reply } => send_reply(&reply, ctl.calibrate(chemical, secs)),
        Command::CancelDose { chemical, reply } => send_reply(&reply, ctl.cancel_dose(chemical)),
        Command::ManualMix { chemical, secs, reply } => send_reply(&reply, ctl.manual_mix(chemical, secs)),
        Command::CancelMix { chemical, reply } => send_reply(&reply, ctl.cancel_mix(chemical)),
        Command::SetLevel { chemical, level, reply } => send_reply(&reply, ctl.set_level(chemical, level)),
        Command::SetTankLevel { chemical, level, reply } => {
            send_reply(&reply, ctl.set_tank_level(chemical, level));
        }
        Command::SetChemicalConfig { cfg, reply } => send_reply(&reply, ctl.set_chemical_config(*cfg)),
        Command::ServiceMode { on, reply } => {
            ctl.set_service_mode(on);
            send_reply(&reply, Ok(()));
        }
        Command::PollNow { reply } => {
            ctl.poll();
            send_reply(&reply, Ok(()));
        }
        Command::Snapshot { reply } => send_reply(&reply, Ok(ctl.snapshot())),
        Command::Persist { reply } => send_reply(&reply, Ok(ctl.persist())),
    }
}

fn publish(ctl: &mut ChemController, events: Option<&xch::Sender<EquipmentEvent>>) {
    let pending = ctl.take_events();
    let Some(tx) = events else {
        return;
    };
    for ev in pending {
        if tx.send(ev).is_err() {
            tracing::trace!(controller = ctl.id(), "event subscriber gone");
            break;
        }
    }
}

fn run(
    mut ctl: ChemController,
    cmd_rx: xch::Receiver<Command>,
    done_rx: xch::Receiver<()>,
    shutdown: Arc<AtomicBool>,
    events: Option<xch::Sender<EquipmentEvent>>,
) {
    let poll = xch::tick(ctl.cfg().poll_interval);
    let fine = xch::tick(ctl.cfg().tick_interval);
    ctl.poll();
    publish(&mut ctl, events.as_ref());

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        xch::select! {
            recv(done_rx) -> _ => break,
            recv(cmd_rx) -> msg => match msg {
                Ok(cmd) => handle(&mut ctl, cmd),
                Err(_) => break,
            },
            recv(poll) -> _ => ctl.poll(),
            recv(fine) -> _ => ctl.tick(),
        }
        publish(&mut ctl, events.as_ref());
    }

    ctl.close();
    publish(&mut ctl, events.as_ref());
    tracing::debug!(controller = ctl.id(), "controller thread exiting");
}

pub struct ControllerHandle {
    id: u8,
    claimed: Vec<u8>,
    tx: xch::Sender<Command>,
    suspend: SuspendCounter,
    shutdown: Arc<AtomicBool>,
    /// Dropping the sender wakes the worker's select.
    done_tx: Option<xch::Sender<()>>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("id", &self.id)
            .field("claimed", &self.claimed)
            .finish_non_exhaustive()
    }
}

impl ControllerHandle {
    pub fn spawn(ctl: ChemController, events: Option<xch::Sender<EquipmentEvent>>) -> std::io::Result<Self> {
        let id = ctl.id();
        let claimed = ctl.cfg().claimed_chlorinators().collect();
        let suspend = ctl.suspend_counter();
        let (tx, cmd_rx) = xch::bounded(COMMAND_QUEUE);
        let (done_tx, done_rx) = xch::bounded(0);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let join_handle = std::thread::Builder::new()
            .name(format!("chem-ctl-{id}"))
            .spawn(move || run(ctl, cmd_rx, done_rx, shutdown_clone, events))?;
        tracing::info!(controller = id, "controller thread started");
        Ok(Self {
            id,
            claimed,
            tx,
            suspend,
            shutdown,
            done_tx: Some(done_tx),
            join_handle: Some(join_handle),
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Chlorinator ids claimed by this controller's ORP doser.
    pub fn claimed_chlorinators(&self) -> &[u8] {
        &self.claimed
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend.is_suspended()
    }

    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, ChemError> {
        let (reply, rx) = xch::bounded(1);
        self.tx
            .send_timeout(build(reply), REPLY_TIMEOUT)
            .map_err(|e| match e {
                xch::SendTimeoutError::Timeout(_) => ChemError::Timeout,
                xch::SendTimeoutError::Disconnected(_) => ChemError::Closed(self.id),
            })?;
        match rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(r) => r,
            Err(xch::RecvTimeoutError::Timeout) => Err(ChemError::Timeout),
            Err(xch::RecvTimeoutError::Disconnected) => Err(ChemError::Closed(self.id)),
        }
    }

    pub fn manual_dose(&self, chemical: ChemicalKind, volume: f64) -> Result<(), ChemError> {
        self.request(|reply| Command::ManualDose { chemical, volume, reply })
    }

    pub fn calibrate(&self, chemical: ChemicalKind, secs: f64) -> Result<(), ChemError> {
        self.request(|reply| Command::Calibrate { chemical, secs, reply })
    }

    pub fn cancel_dose(&self, chemical: ChemicalKind) -> Result<(), ChemError> {
        self.request(|reply| Command::CancelDose { chemical, reply })
    }

    pub fn manual_mix(&self, chemical: ChemicalKind, secs: f64) -> Result<(), ChemError> {
        self.request(|reply| Command::ManualMix { chemical, secs, reply })
    }

    pub fn cancel_mix(&self, chemical: ChemicalKind) -> Result<(), ChemError> {
        self.request(|reply| Command::CancelMix { chemical, reply })
    }

    pub fn set_level(&self, chemical: ChemicalKind, level: f64) -> Result<(), ChemError> {
        self.request(|reply| Command::SetLevel { chemical, level, reply })
    }

    pub fn set_tank_level(&self, chemical: ChemicalKind, level: f64) -> Result<(), ChemError> {
        self.request(|reply| Command::SetTankLevel { chemical, level, reply })
    }

    pub fn set_chemical_config(&self, cfg: ChemicalCfg) -> Result<(), ChemError> {
        self.request(|reply| Command::SetChemicalConfig { cfg: Box::new(cfg), reply })
    }

    pub fn set_service_mode(&self, on: bool) -> Result<(), ChemError> {
        self.request(|reply| Command::ServiceMode { on, reply })
    }

    /// Run a full poll now instead of waiting for the ticker.
    pub fn poll_now(&self) -> Result<(), ChemError> {
        self.request(|reply| Command::PollNow { reply })
    }

    pub fn snapshot(&self) -> Result<ControllerSnapshot, ChemError> {
        self.request(|reply| Command::Snapshot { reply })
    }

    pub fn persist(&self) -> Result<Vec<(ChemicalKind, PersistedChemical)>, ChemError> {
        self.request(|reply| Command::Persist { reply })
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        drop(self.done_tx.take());
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!(controller = self.id, "controller thread joined"),
                Err(e) => tracing::warn!(controller = self.id, ?e, "controller thread panicked during shutdown"),
            }
        }
    }
}
