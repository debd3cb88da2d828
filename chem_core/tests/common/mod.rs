//! Shared rig for driving a controller by hand against fakes and a test clock.
#![allow(dead_code)]

use std::sync::Arc;

use chem_core::config::{
    BodyCapacities, ChemicalCfg, ChlorDosingMethod, ChlorinatorLink, ControllerCfg, KindCfg, OrpCfg, PhCfg,
    ProbeCfg, PumpCfg, TankCfg,
};
use chem_core::mocks::{FakeChlorinators, FakeTransport, FixedPool};
use chem_core::{ChemController, ChemicalKind, EquipmentEvent, PersistedChemical, Services};
use chem_traits::clock::test_clock::TestClock;

pub const PH_PUMP: &str = "relay:ph";
pub const ORP_PUMP: &str = "relay:orp";

pub fn pump(binding: &str) -> Option<PumpCfg> {
    Some(PumpCfg {
        binding: binding.to_string(),
        rated_flow: 100.0,
    })
}

pub fn full_tank() -> TankCfg {
    TankCfg {
        capacity: 1_000.0,
        level: 1_000.0,
        ..TankCfg::default()
    }
}

/// pH on a 100 mL/min relay pump with a full 1 L tank and no reading.
pub fn ph_pump_cfg() -> ChemicalCfg {
    let mut c = ChemicalCfg::new(KindCfg::Ph(PhCfg::default()));
    c.pump = pump(PH_PUMP);
    c.tank = full_tank();
    c.probe = ProbeCfg::Other;
    c
}

pub fn orp_chlor_cfg(chlorinator: u8, lbs_per_day: Option<f64>) -> ChemicalCfg {
    let mut c = ChemicalCfg::new(KindCfg::Orp(OrpCfg {
        chlorinator: Some(ChlorinatorLink {
            id: chlorinator,
            method: ChlorDosingMethod::Target,
            lbs_per_day,
        }),
        ..OrpCfg::default()
    }));
    c.probe = ProbeCfg::Other;
    c
}

pub fn controller_cfg(id: u8, chemicals: Vec<ChemicalCfg>) -> ControllerCfg {
    let mut cfg = ControllerCfg::new(id, 1);
    cfg.bodies = BodyCapacities {
        pool: Some(20_000.0),
        ..BodyCapacities::default()
    };
    cfg.chemicals = chemicals;
    cfg
}

pub struct Rig {
    pub clock: TestClock,
    pub transport: Arc<FakeTransport>,
    pub chlorinators: Arc<FakeChlorinators>,
    pub pool: Arc<FixedPool>,
    pub ctl: ChemController,
}

pub struct Fakes {
    pub clock: TestClock,
    pub transport: Arc<FakeTransport>,
    pub chlorinators: Arc<FakeChlorinators>,
    pub pool: Arc<FixedPool>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::with_clock(TestClock::new())
    }

    pub fn with_clock(clock: TestClock) -> Self {
        Self {
            clock,
            transport: Arc::new(FakeTransport::new()),
            chlorinators: Arc::new(FakeChlorinators::new().with_unit(1).with_unit(2)),
            pool: Arc::new(FixedPool::new()),
        }
    }

    pub fn services(&self) -> Services {
        Services::new(
            self.transport.clone(),
            self.chlorinators.clone(),
            self.pool.clone(),
            Arc::new(self.clock.clone()),
        )
    }

    pub fn build(self, cfg: ControllerCfg) -> Rig {
        self.build_restored(cfg, Vec::new())
    }

    pub fn build_restored(self, cfg: ControllerCfg, saved: Vec<(ChemicalKind, PersistedChemical)>) -> Rig {
        let ctl = ChemController::builder()
            .with_config(cfg)
            .with_services(self.services())
            .with_restored_state(saved)
            .try_build()
            .expect("build controller");
        Rig {
            clock: self.clock,
            transport: self.transport,
            chlorinators: self.chlorinators,
            pool: self.pool,
            ctl,
        }
    }
}

impl Rig {
    pub fn new(cfg: ControllerCfg) -> Self {
        Fakes::new().build(cfg)
    }

    /// Advance the clock one second per tick.
    pub fn run_secs(&mut self, secs: u64) {
        for _ in 0..secs {
            self.clock.advance_secs(1);
            self.ctl.tick();
        }
    }

    pub fn chem(&self, kind: ChemicalKind) -> &chem_core::ChemicalDoser {
        self.ctl.chemical(kind).expect("chemical configured")
    }

    pub fn finished(&mut self) -> Vec<chem_core::DoseRecord> {
        self.ctl
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                EquipmentEvent::DoseFinished { record, .. } => Some(record),
                EquipmentEvent::Changed(_) => None,
            })
            .collect()
    }
}
