mod common;

use std::sync::Arc;
use std::time::Duration;

use chem_core::config::{ChemicalCfg, GenericCfg, KindCfg, OrpCfg};
use chem_core::error::BuildError;
use chem_core::mocks::{FakeChlorinators, FakeTransport, FixedPool};
use chem_core::{ChemController, ControllerCfg};
use common::*;
use rstest::rstest;

fn expect_build_error(result: chem_core::Result<ChemController>) -> BuildError {
    let err = result.expect_err("build should fail");
    match err.downcast_ref::<BuildError>() {
        Some(e) => e.clone(),
        None => panic!("expected a BuildError, got: {err:?}"),
    }
}

#[rstest]
fn missing_config_yields_typed_build_error() {
    let err = expect_build_error(ChemController::builder().with_services(Fakes::new().services()).try_build());
    assert_eq!(err, BuildError::MissingConfig);
}

#[rstest]
fn missing_transport_yields_typed_build_error() {
    let err = expect_build_error(
        ChemController::builder()
            .with_config(controller_cfg(1, vec![ph_pump_cfg()]))
            .with_chlorinators(Arc::new(FakeChlorinators::new()))
            .with_pool_status(Arc::new(FixedPool::new()))
            .try_build(),
    );
    assert_eq!(err, BuildError::MissingTransport);
}

#[rstest]
fn missing_pool_status_yields_typed_build_error() {
    let err = expect_build_error(
        ChemController::builder()
            .with_config(controller_cfg(1, vec![ph_pump_cfg()]))
            .with_transport(Arc::new(FakeTransport::new()))
            .with_chlorinators(Arc::new(FakeChlorinators::new()))
            .try_build(),
    );
    assert_eq!(err, BuildError::MissingPoolStatus);
}

fn generic_cfg() -> ChemicalCfg {
    let mut c = ChemicalCfg::new(KindCfg::Generic(GenericCfg {
        dosing_volume: 25.0,
        disable_chlorinator: false,
    }));
    c.pump = pump("relay:generic");
    c
}

fn no_chemicals() -> ControllerCfg {
    controller_cfg(1, Vec::new())
}

fn duplicate_ph() -> ControllerCfg {
    controller_cfg(1, vec![ph_pump_cfg(), ph_pump_cfg()])
}

fn generic_shares() -> ControllerCfg {
    controller_cfg(1, vec![ph_pump_cfg(), generic_cfg()])
}

fn zero_rated_flow() -> ControllerCfg {
    let mut c = ph_pump_cfg();
    if let Some(p) = c.pump.as_mut() {
        p.rated_flow = 0.0;
    }
    controller_cfg(1, vec![c])
}

fn blank_binding() -> ControllerCfg {
    controller_cfg(1, vec![{
        let mut c = ph_pump_cfg();
        c.pump = pump("  ");
        c
    }])
}

fn pump_and_chlorinator() -> ControllerCfg {
    let mut c = orp_chlor_cfg(1, Some(1.4));
    c.pump = pump(ORP_PUMP);
    controller_cfg(1, vec![c])
}

fn generic_without_pump() -> ControllerCfg {
    let mut c = generic_cfg();
    c.pump = None;
    controller_cfg(1, vec![c])
}

fn zero_poll_interval() -> ControllerCfg {
    let mut cfg = controller_cfg(1, vec![ph_pump_cfg()]);
    cfg.poll_interval = Duration::ZERO;
    cfg
}

#[rstest]
#[case::no_chemicals(no_chemicals())]
#[case::duplicate_chemical(duplicate_ph())]
#[case::generic_shares_controller(generic_shares())]
#[case::zero_rated_flow(zero_rated_flow())]
#[case::blank_binding(blank_binding())]
#[case::pump_and_chlorinator(pump_and_chlorinator())]
#[case::generic_without_pump(generic_without_pump())]
#[case::zero_poll_interval(zero_poll_interval())]
fn invalid_configs_are_rejected(#[case] cfg: ControllerCfg) {
    let err = expect_build_error(
        ChemController::builder()
            .with_config(cfg)
            .with_services(Fakes::new().services())
            .try_build(),
    );
    assert!(matches!(err, BuildError::InvalidConfig(_)), "got {err:?}");
}

#[test]
fn orp_without_actuator_still_builds() {
    let mut c = ChemicalCfg::new(KindCfg::Orp(OrpCfg::default()));
    c.probe = chem_core::config::ProbeCfg::Other;
    let ctl = ChemController::builder()
        .with_config(controller_cfg(1, vec![c]))
        .with_services(Fakes::new().services())
        .try_build()
        .expect("monitor-only ORP is valid");
    assert_eq!(ctl.id(), 1);
}
