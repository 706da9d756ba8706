use assert_cmd::prelude::*;
use rstest::rstest;
use serde_json::Value;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn run_json(extra_toml: &str, args: &[&str]) -> (Option<i32>, String, String) {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, extra_toml).unwrap();
    let out = Command::cargo_bin("stroker")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("--fast")
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .unwrap();
    (
        out.status.code(),
        String::from_utf8_lossy(&out.stdout).into_owned(),
        String::from_utf8_lossy(&out.stderr).into_owned(),
    )
}

/// Last line of `s` that parses as a JSON object.
fn last_json(s: &str) -> Value {
    s.lines()
        .rev()
        .find_map(|l| serde_json::from_str::<Value>(l).ok().filter(Value::is_object))
        .unwrap_or_else(|| panic!("no JSON object in output: {s}"))
}

#[rstest]
fn home_reports_travel() {
    let (code, stdout, _) = run_json("", &["home"]);
    assert_eq!(code, Some(0));
    let v = last_json(&stdout);
    assert_eq!(v["homed"], true);
    let travel = v["usable_travel_mm"].as_f64().unwrap();
    assert!(travel > 0.0 && travel <= 75.0, "travel {travel}");
}

#[rstest]
fn run_summary_has_stable_keys() {
    let (code, stdout, _) = run_json("", &["run", "--duration-s", "2", "--speed", "40"]);
    assert_eq!(code, Some(0));
    let v = last_json(&stdout);
    for key in ["cause", "ticks", "elapsed_ms", "strokes", "distance_m", "run_mode"] {
        assert!(v.get(key).is_some(), "missing {key} in {v}");
    }
    assert_eq!(v["cause"], "Duration");
    assert!(v["strokes"].as_u64().unwrap() > 0);
}

#[rstest]
fn patterns_lists_every_name() {
    let (code, stdout, _) = run_json("", &["patterns"]);
    assert_eq!(code, Some(0));
    let v = last_json(&stdout);
    let names: Vec<&str> = v["patterns"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(
        names,
        ["Simple Stroke", "Teasing or Pounding", "Half'n'Half", "Deeper"]
    );
}

#[rstest]
fn interlock_error_carries_reason_and_thresholds() {
    let (code, _, stderr) = run_json(
        "[safety]\nmin_supply_volts = 30.0\nmax_supply_volts = 36.0\n",
        &["home"],
    );
    assert_eq!(code, Some(4));
    let v = last_json(&stderr);
    assert_eq!(v["reason"], "SupplyVoltage");
    assert_eq!(v["details"]["min_supply_volts"].as_f64(), Some(30.0));
    assert!(v["message"].as_str().unwrap().contains("interlock"));
}

#[rstest]
fn config_error_is_structured() {
    let (code, _, stderr) = run_json("[control]\nremote_queue = 0\n", &["health"]);
    assert_eq!(code, Some(2));
    let v = last_json(&stderr);
    assert_eq!(v["reason"], "InvalidConfig");
}
