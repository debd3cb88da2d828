//! ORP dosing through a chlorinator and through a relay pump.

mod common;

use chem_core::config::{ChlorDosingMethod, KindCfg, OrpCfg};
use chem_core::{CancelReason, ChemicalKind, DosingStatus};
use common::*;

const ORP: ChemicalKind = ChemicalKind::Orp;
const PH: ChemicalKind = ChemicalKind::Ph;

#[test]
fn chlorinator_runs_for_its_duty_cycle() {
    let mut rig = Rig::new(controller_cfg(1, vec![orp_chlor_cfg(1, Some(1.4))]));
    rig.ctl.set_level(ORP, 640.0).unwrap();
    rig.ctl.poll();

    let chem = rig.chem(ORP);
    assert_eq!(chem.status(), DosingStatus::Dosing);
    let dose = chem.dose().unwrap();
    // demand 10 mV: (10/0.7 + 28.57)% of the window, boosted 10% for a flat trend.
    assert_eq!(dose.time, 424.0);
    assert!((dose.volume - 1.4 / 86_400.0 * 424.0).abs() < 1e-6);
    assert!(rig.chlorinators.state(1).unwrap().is_dosing);

    rig.run_secs(424);
    assert_eq!(rig.chem(ORP).status(), DosingStatus::Mixing);
    // The mix fills the rest of the 15 minute window.
    let remaining = rig.chem(ORP).mix().unwrap().remaining().as_secs();
    assert_eq!(remaining, 900 - 424);
    assert!(!rig.chlorinators.state(1).unwrap().is_dosing);
}

#[test]
fn far_above_setpoint_does_not_chlorinate() {
    let mut rig = Rig::new(controller_cfg(1, vec![orp_chlor_cfg(1, Some(1.4))]));
    rig.ctl.set_level(ORP, 700.0).unwrap();
    rig.ctl.poll();
    assert_eq!(rig.chem(ORP).status(), DosingStatus::Monitoring);
    assert_eq!(rig.chem(ORP).state().demand(), -50.0);
}

#[test]
fn missing_production_model_flags_invalid_setup() {
    let mut rig = Rig::new(controller_cfg(1, vec![orp_chlor_cfg(1, None)]));
    rig.ctl.set_level(ORP, 600.0).unwrap();
    rig.ctl.poll();
    rig.ctl.poll();
    let chem = rig.chem(ORP);
    assert_eq!(chem.status(), DosingStatus::Monitoring);
    assert!(chem.state().warnings().invalid_setup);
    assert!(rig.chlorinators.commands().is_empty());
}

#[test]
fn chlor_method_only_monitors() {
    let mut c = orp_chlor_cfg(1, Some(1.4));
    if let KindCfg::Orp(OrpCfg {
        chlorinator: Some(link),
        ..
    }) = &mut c.kind
    {
        link.method = ChlorDosingMethod::Chlor;
    }
    let mut rig = Rig::new(controller_cfg(1, vec![c]));
    rig.ctl.set_level(ORP, 500.0).unwrap();
    rig.ctl.poll();
    assert_eq!(rig.chem(ORP).status(), DosingStatus::Monitoring);
    assert!(rig.chem(ORP).state().demand() > 0.0);
}

#[test]
fn super_chlorinate_cancels_the_dose() {
    let mut rig = Rig::new(controller_cfg(1, vec![orp_chlor_cfg(1, Some(1.4))]));
    rig.ctl.set_level(ORP, 640.0).unwrap();
    rig.ctl.poll();
    assert_eq!(rig.chem(ORP).status(), DosingStatus::Dosing);

    rig.chlorinators.set_super_chlor(1, true);
    rig.ctl.poll();
    assert_eq!(rig.chem(ORP).status(), DosingStatus::Monitoring);
    assert_eq!(rig.finished()[0].reason, CancelReason::SuperChlor);
}

#[test]
fn high_ph_locks_out_orp() {
    let mut ph = ph_pump_cfg();
    ph.max_daily_volume = 0.0;
    let mut rig = Rig::new(controller_cfg(1, vec![ph, orp_chlor_cfg(1, Some(1.4))]));
    rig.ctl.set_level(PH, 8.1).unwrap();
    rig.ctl.set_level(ORP, 600.0).unwrap();
    rig.ctl.poll();

    let orp = rig.chem(ORP);
    assert_eq!(orp.status(), DosingStatus::Monitoring);
    assert!(orp.state().warnings().ph_lockout);
    assert!(
        rig.ctl
            .snapshot()
            .chemical(ORP)
            .unwrap()
            .messages
            .iter()
            .any(|m| m.contains("high pH"))
    );
}

#[test]
fn priority_ph_dose_stands_the_chlorinator_down() {
    let mut ph = ph_pump_cfg();
    if let KindCfg::Ph(p) = &mut ph.kind {
        p.dose_priority = true;
    }
    let mut rig = Rig::new(controller_cfg(1, vec![ph, orp_chlor_cfg(1, Some(1.4))]));
    rig.ctl.set_level(ORP, 640.0).unwrap();
    rig.ctl.poll();
    assert_eq!(rig.chem(ORP).status(), DosingStatus::Dosing);

    rig.ctl.set_level(PH, 7.7).unwrap();
    rig.ctl.poll();
    assert!(rig.chem(PH).is_priority_dosing());
    assert_eq!(rig.chem(ORP).status(), DosingStatus::Monitoring);
    assert!(rig.chlorinators.state(1).unwrap().disabled);
    let reasons: Vec<CancelReason> = rig.finished().into_iter().map(|r| r.reason).collect();
    assert!(reasons.contains(&CancelReason::PhPriority));

    rig.ctl.cancel_dose(PH).unwrap();
    assert!(!rig.chlorinators.state(1).unwrap().disabled);
}

#[test]
fn orp_pump_doses_the_max_volume_on_demand() {
    let mut c = chem_core::ChemicalCfg::new(KindCfg::Orp(OrpCfg::default()));
    c.pump = pump(ORP_PUMP);
    c.tank = full_tank();
    c.probe = chem_core::config::ProbeCfg::Other;
    c.max_dosing_volume = 50.0;
    let mut rig = Rig::new(controller_cfg(1, vec![c]));
    rig.ctl.set_level(ORP, 600.0).unwrap();
    rig.ctl.poll();

    let dose = rig.chem(ORP).dose().unwrap();
    assert_eq!(dose.volume, 50.0);
    assert_eq!(dose.time, 30.0);
    rig.run_secs(30);
    assert_eq!(rig.chem(ORP).status(), DosingStatus::Mixing);
}
