use std::sync::Arc;
use std::time::Duration;

use chem_hardware::error::HwError;
use chem_hardware::{SimChlorinators, SimPool, SimTransport};
use chem_traits::clock::test_clock::TestClock;
use chem_traits::{ChlorinatorCommand, ChlorinatorControl, PoolStatus, SHARED_BODY, SensorValue, Transport};

fn bus(clock: &TestClock) -> SimTransport {
    SimTransport::new(Arc::new(clock.clone()))
        .with_relay("relay:ph")
        .with_sensor("probe:ph", SensorValue::Number(7.8))
        .with_sensor("flow", SensorValue::Bool(true))
        .with_response("relay:ph", "probe:ph", -0.01)
}

#[test]
fn relay_drops_out_when_its_latch_expires() {
    let clock = TestClock::new();
    let t = bus(&clock);
    let res = t.activate("relay:ph", 3_000).unwrap();
    assert!(res.success && res.current_state);
    clock.advance(Duration::from_millis(2_999));
    assert!(t.is_energised("relay:ph"));
    clock.advance(Duration::from_millis(1));
    assert!(!t.is_energised("relay:ph"));
}

#[test]
fn energised_relay_moves_its_sensor() {
    let clock = TestClock::new();
    let t = bus(&clock);
    t.activate("relay:ph", 3_000).unwrap();
    clock.advance_secs(10);
    // Only the 3 s latch window counts.
    let v = t.read_value("probe:ph").unwrap().as_f64().unwrap();
    assert!((v - 7.77).abs() < 1e-9, "got {v}");

    t.activate("relay:ph", 3_000).unwrap();
    clock.advance_secs(1);
    t.deactivate("relay:ph").unwrap();
    clock.advance_secs(5);
    let v = t.read_value("probe:ph").unwrap().as_f64().unwrap();
    assert!((v - 7.76).abs() < 1e-9, "got {v}");
}

#[test]
fn unknown_bindings_are_typed_errors() {
    let clock = TestClock::new();
    let t = bus(&clock);
    let err = t.activate("relay:nope", 1_000).unwrap_err();
    assert!(matches!(err.downcast_ref::<HwError>(), Some(HwError::UnknownBinding(_))));
    assert!(t.read_value("probe:orp").is_err());
}

#[test]
fn faulted_relay_refuses_activation() {
    let clock = TestClock::new();
    let t = bus(&clock);
    t.set_fault("relay:ph", true).unwrap();
    assert!(!t.activate("relay:ph", 3_000).unwrap().success);
    assert!(t.query_status("relay:ph").unwrap().has_fault);
    t.set_fault("relay:ph", false).unwrap();
    assert!(t.activate("relay:ph", 3_000).unwrap().success);
}

#[test]
fn chlorinator_latch_expires_and_disable_wins() {
    let clock = TestClock::new();
    let c = SimChlorinators::new(Arc::new(clock.clone())).with_unit(1, 40);
    let on = ChlorinatorCommand {
        disabled: None,
        is_dosing: Some(true),
        latch: Some(Duration::from_secs(3)),
    };
    let st = c.set_chlorinator(1, on).unwrap();
    assert!(st.is_dosing);
    assert_eq!(st.current_output, 100);
    clock.advance_secs(3);
    let st = c.chlorinator_state(1).unwrap();
    assert!(!st.is_dosing);
    assert_eq!(st.current_output, 40);

    let hold = ChlorinatorCommand {
        disabled: Some(true),
        is_dosing: Some(false),
        latch: None,
    };
    c.set_chlorinator(1, hold).unwrap();
    let st = c.set_chlorinator(1, on).unwrap();
    assert!(st.disabled);
    assert!(!st.is_dosing);
    assert!(c.chlorinator_state(2).is_err());
}

#[test]
fn pool_status_defaults_to_body_one_running() {
    let pool = SimPool::new();
    assert!(pool.is_body_on(1));
    assert!(!pool.is_body_on(2));
    pool.set_body_on(2, true).unwrap();
    pool.set_freeze(true).unwrap();
    assert!(pool.is_body_on(2));
    assert!(pool.freeze_active());
    assert_eq!(pool.water_temperature_c(), Some(26.0));
}

#[test]
fn shared_body_runs_with_either_pool_or_spa() {
    let pool = SimPool::new();
    assert!(pool.is_body_on(SHARED_BODY));
    pool.set_body_on(1, false).unwrap();
    assert!(!pool.is_body_on(SHARED_BODY));
    pool.set_body_on(2, true).unwrap();
    assert!(pool.is_body_on(SHARED_BODY));
}
