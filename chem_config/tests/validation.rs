use chem_config::{ChemicalKind, FlowSensorKind, PumpKind, chlorinator_model_lbs_per_day, load_file, load_toml};
use rstest::rstest;

const BASE: &str = r#"
[controller]
poll_interval_ms = 10000
tick_interval_ms = 1000

[[bodies]]
id = 1
capacity = 20000

[[chlorinators]]
id = 1
body = 1
model = "intellichlor--40"

[[controllers]]
id = 1
body = 1

[controllers.flow_sensor]
kind = "switch"
binding = "gpio:17"

[[controllers.chemicals]]
kind = "ph"
setpoint = 7.4

[controllers.chemicals.pump]
kind = "relay"
rated_flow = 100
binding = "gpio:5"

[controllers.chemicals.tank]
capacity = 5
level = 4
units = "gal"

[controllers.chemicals.probe]
kind = "other"

[[controllers.chemicals]]
kind = "orp"
setpoint = 700
use_chlorinator = true
chlorinator_id = 1
"#;

fn validate(toml: &str) -> eyre::Result<()> {
    load_toml(toml).expect("parse TOML").validate()
}

#[test]
fn sample_config_is_valid() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config");
    let ctl = &cfg.controllers[0];
    assert_eq!(ctl.flow_sensor.kind, FlowSensorKind::Switch);
    assert_eq!(ctl.chemicals.len(), 2);
    assert_eq!(ctl.chemicals[0].kind, ChemicalKind::Ph);
    assert_eq!(ctl.chemicals[0].pump.kind, PumpKind::Relay);
    assert_eq!(ctl.chemicals[1].pump.kind, PumpKind::None);
    assert_eq!(cfg.chlorinator(1).and_then(|c| c.lbs_per_day()), Some(1.40));
}

#[rstest]
#[case("poll_interval_ms = 10000", "poll_interval_ms = 0", "poll_interval_ms must be > 0")]
#[case("tick_interval_ms = 1000", "tick_interval_ms = 20000", "must be <= poll_interval_ms")]
#[case("setpoint = 7.4", "setpoint = 15.0", "within 0..=14")]
#[case("rated_flow = 100", "rated_flow = 0", "rated_flow must be > 0")]
#[case("level = 4", "level = 6", "tank.level must be within")]
#[case("model = \"intellichlor--40\"", "model = \"mystery\"", "not a known model")]
#[case("chlorinator_id = 1", "chlorinator_id = 9", "does not match")]
#[case("binding = \"gpio:17\"", "binding = \"\"", "flow_sensor.binding must be set")]
#[case("kind = \"other\"", "kind = \"remote\"", "probe.binding must be set")]
#[case("[[controllers]]\nid = 1\nbody = 1", "[[controllers]]\nid = 1\nbody = 7", "body must be 1..=4 or 32")]
fn rejects_bad_values(#[case] from: &str, #[case] to: &str, #[case] needle: &str) {
    let toml = BASE.replacen(from, to, 1);
    assert_ne!(toml, BASE, "case did not change the config");
    let err = validate(&toml).expect_err("config should be rejected");
    assert!(err.to_string().contains(needle), "expected '{needle}' in '{err}'");
}

#[test]
fn rejects_unknown_rotation() {
    let toml = format!("[logging]\nrotation = \"weekly\"\n{BASE}");
    let err = validate(&toml).expect_err("weekly rotation is not supported");
    assert!(err.to_string().contains("logging.rotation"));
}

#[test]
fn a_chlorinator_serves_one_orp_doser() {
    let toml = format!(
        "{BASE}
[[controllers]]
id = 2
body = 1

[[controllers.chemicals]]
kind = \"orp\"
use_chlorinator = true
chlorinator_id = 1
"
    );
    let err = validate(&toml).expect_err("second claim should be rejected");
    assert!(err.to_string().contains("already used"), "{err}");
}

#[test]
fn shared_body_is_accepted() {
    let toml = BASE.replacen("[[controllers]]\nid = 1\nbody = 1", "[[controllers]]\nid = 1\nbody = 32", 1);
    assert_ne!(toml, BASE);
    validate(&toml).expect("pool and spa share the controller");
}

#[test]
fn one_doser_per_chemical() {
    let toml = r#"
[[controllers]]
id = 1

[[controllers.chemicals]]
kind = "orp"

[[controllers.chemicals]]
kind = "orp"
"#;
    let err = validate(toml).expect_err("two ORP dosers on one controller");
    assert!(err.to_string().contains("duplicate Orp chemical"), "{err}");
}

#[test]
fn generic_doser_stands_alone() {
    let toml = r#"
[[controllers]]
id = 1

[[controllers.chemicals]]
kind = "generic"
[controllers.chemicals.pump]
kind = "relay"
rated_flow = 50
binding = "gpio:6"

[[controllers.chemicals]]
kind = "ph"
"#;
    let err = validate(toml).expect_err("generic must be alone");
    assert!(err.to_string().contains("cannot share"), "{err}");
}

#[test]
fn generic_doser_needs_a_pump() {
    let toml = r#"
[[controllers]]
id = 1

[[controllers.chemicals]]
kind = "generic"
"#;
    let err = validate(toml).expect_err("generic without pump");
    assert!(err.to_string().contains("pump.kind must be relay"), "{err}");
}

#[test]
fn chemicals_are_required() {
    let err = validate("[[controllers]]\nid = 3\n").expect_err("empty controller");
    assert!(err.to_string().contains("chemicals must not be empty"), "{err}");
}

#[test]
fn model_lookup_ignores_case() {
    assert_eq!(chlorinator_model_lbs_per_day("AquaRite-T15"), Some(1.47));
    assert_eq!(chlorinator_model_lbs_per_day("nope"), None);
}

#[test]
fn load_file_reads_and_validates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("chemctl.toml");
    std::fs::write(&path, BASE).expect("write config");
    let cfg = load_file(&path).expect("load");
    assert_eq!(cfg.controllers.len(), 1);

    let missing = dir.path().join("missing.toml");
    let err = load_file(&missing).expect_err("missing file");
    assert!(err.to_string().contains("reading config"), "{err}");
}
