use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Fast timings so one-shot doses finish in well under a second in sim mode.
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let dose_log = dir.path().join("doses.jsonl");
    let toml = format!(
        r#"
[controller]
poll_interval_ms = 1000
tick_interval_ms = 100

[logging]
dose_log = "{}"

[[bodies]]
id = 1
capacity = 20000

[[controllers]]
id = 1
body = 1

[[controllers.chemicals]]
kind = "ph"
setpoint = 7.5
mixing_time = 5

[controllers.chemicals.pump]
kind = "relay"
# 10 mL/s
rated_flow = 600
binding = "relay:ph"

[controllers.chemicals.tank]
capacity = 1000
level = 900
units = "ml"

[controllers.chemicals.probe]
kind = "other"
"#,
        dose_log.display().to_string().replace('\\', "/")
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["check"], 0, "Config OK", "stdout")]
#[case(&["self-check"], 0, "relay:ph", "stdout")]
#[case(&["dose", "--chemical", "ph", "--volume", "1"], 0, "completed", "stdout")]
#[case(&["calibrate", "--chemical", "ph", "--secs", "1"], 0, "completed", "stdout")]
#[case(&["dose-plan", "--chemical", "ph", "--level", "8.0"], 0, "ph:", "stdout")]
#[case(&["dose", "--chemical", "ph"], 2, "required", "stderr")]
#[case(&["dose", "--chemical", "ph", "--volume", "abc"], 2, "not a number", "stderr")]
#[case(&["dose", "--chemical", "ph", "--volume", "0"], 2, "amount must be > 0", "stderr")]
#[case(&["dose", "--controller", "9", "--chemical", "ph", "--volume", "1"], 2, "Unknown controller", "stderr")]
#[case(&["dose", "--chemical", "chlorine", "--volume", "1"], 2, "Unknown chemical", "stderr")]
#[case(&["dose", "--chemical", "orp", "--volume", "1"], 2, "Unknown chemical", "stderr")]
fn cli_table_cases(#[case] args: &[&str], #[case] exit_code: i32, #[case] needle: &str, #[case] stream: &str) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("chemctl").unwrap();
    cmd.arg("--log-level").arg("error").arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn invalid_config_is_explained() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("bad.toml");
    fs::write(&cfg, "[controller]\npoll_interval_ms = 0\n").unwrap();

    Command::cargo_bin("chemctl")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration is invalid"))
        .stderr(predicate::str::contains("poll_interval_ms"));
}

#[rstest]
fn missing_config_is_explained() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("chemctl")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not read the config file"));
}

#[rstest]
fn json_errors_carry_a_reason() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let out = Command::cargo_bin("chemctl")
        .unwrap()
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .args(["dose", "--controller", "7", "--chemical", "ph", "--volume", "1"])
        .assert()
        .code(2)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&out);
    let line = stderr.lines().find(|l| l.contains("\"reason\"")).unwrap_or("");
    let v: serde_json::Value = serde_json::from_str(line).expect("valid JSON error line");
    assert_eq!(v["reason"], "InvalidId");
    assert!(v["message"].as_str().is_some_and(|m| m.contains("controller")));
}

#[rstest]
fn run_saves_state_and_stops_on_time() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let state = dir.path().join("state.json");

    Command::cargo_bin("chemctl")
        .unwrap()
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("run")
        .arg("--for-secs")
        .arg("1")
        .arg("--state")
        .arg(&state)
        .assert()
        .success();

    let text = fs::read_to_string(&state).expect("state file written");
    let v: serde_json::Value = serde_json::from_str(&text).expect("state is JSON");
    let chems = v["controllers"]["1"].as_array().expect("controller 1 saved");
    assert_eq!(chems.len(), 1);
    assert_eq!(chems[0][0], "ph");
    assert_eq!(chems[0][1]["status"], "monitoring");
}
