use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

/// Simulated rail with a short stroke so sessions are quick on the virtual clock.
const BASE: &str = r#"
[calibration]
max_stroke_length_mm = 60.0
stroke_zero_offset_mm = 5.0

[control]
life_stats_save_ms = 1000
"#;

fn write_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("cfg.toml");
    fs::write(&path, format!("{BASE}\n{extra}")).unwrap();
    path
}

fn stroker(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("stroker").unwrap();
    cmd.arg("--config").arg(cfg).arg("--fast");
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["home"], 0, "homed: usable travel", "stdout")]
#[case(&["run", "--duration-s", "2"], 0, "session complete", "stdout")]
#[case(&["run", "--duration-s", "2", "--mode", "pattern", "--pattern", "2"], 0, "session complete", "stdout")]
#[case(&["run", "--speed", "150"], 2, "outside 0..=100", "stderr")]
#[case(&["run", "--duration-s", "1", "--pattern", "9"], 1, "pattern 9 out of range", "stderr")]
#[case(&["patterns"], 0, "Half'n'Half", "stdout")]
#[case(&["self-check"], 0, "OK", "stdout")]
#[case(&["health"], 0, "healthy", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    let mut cmd = stroker(&cfg);
    cmd.args(args);

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
fn missing_config_exits_with_config_code() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("stroker").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("health");
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("config file could not be used"));
}

#[rstest]
#[case("[safety]\nema_alpha = 0.0\n", "ema_alpha")]
#[case("[homing]\nstall_current_amps = 9.0\n", "stall_current_amps")]
#[case("[control]\ntick_hz = 0\n", "tick_hz")]
fn invalid_config_is_explained(#[case] extra: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, extra);
    stroker(&cfg)
        .arg("self-check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains(needle));
}

#[rstest]
fn homing_without_an_end_stop_exits_3() {
    let dir = tempdir().unwrap();
    let cfg = write_config(
        &dir,
        "[homing]\nmax_distance_mm = 80.0\n\n[sim]\nrail_length_mm = 1000.0\nstart_position_mm = 900.0\n",
    );
    stroker(&cfg)
        .arg("home")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Homing failed"));
}

#[rstest]
fn supply_out_of_range_exits_4() {
    let dir = tempdir().unwrap();
    let cfg = write_config(
        &dir,
        "[safety]\nmin_supply_volts = 30.0\nmax_supply_volts = 36.0\n",
    );
    stroker(&cfg)
        .args(["run", "--duration-s", "1"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Safety interlock latched"));
}

#[rstest]
fn session_persists_life_stats_to_the_store() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("store");
    let cfg = write_config(
        &dir,
        &format!("[sim]\nstore_dir = {:?}\n", store.display().to_string()),
    );
    stroker(&cfg)
        .args(["run", "--duration-s", "2", "--speed", "50"])
        .assert()
        .success();
    let text = fs::read_to_string(store.join("life_stats.toml")).unwrap();
    assert!(text.contains("number_strokes"));
    assert!(!text.contains("number_strokes = 0\n"));
}
