use std::io::Write;

use rstest::rstest;
use stroker_config::{HomingMethod, load_file, load_toml};

fn rejects_with(toml: &str, needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("config should be rejected");
    assert!(
        format!("{err}").to_lowercase().contains(needle),
        "error {err} does not mention {needle}"
    );
}

#[rstest]
#[case("steps_per_revolution")]
#[case("gearing_ratio")]
#[case("pulley_tooth_count")]
#[case("belt_pitch_mm")]
#[case("max_speed_mm_per_second")]
#[case("max_stroke_length_mm")]
#[case("acceleration_scaling")]
#[case("command_deadzone_percentage")]
fn rejects_non_positive_calibration(#[case] field: &str) {
    let toml = format!("[calibration]\n{field} = 0.0\n");
    rejects_with(&toml, &format!("calibration.{field} must be > 0"));
}

#[test]
fn rejects_negative_zero_offset() {
    rejects_with(
        "[calibration]\nstroke_zero_offset_mm = -2.0\n",
        "stroke_zero_offset_mm must be > 0",
    );
}

#[rstest]
#[case(0.0)]
#[case(1.5)]
#[case(-0.1)]
fn rejects_alpha_outside_unit_interval(#[case] alpha: f32) {
    let toml = format!("[safety]\nema_alpha = {alpha:?}\n");
    rejects_with(&toml, "ema_alpha must be in (0.0, 1.0]");
}

#[test]
fn accepts_alpha_of_one() {
    let cfg = load_toml("[safety]\nema_alpha = 1.0\n").expect("parse");
    cfg.validate().expect("alpha = 1.0 is allowed");
}

#[test]
fn rejects_stall_threshold_at_or_above_overcurrent() {
    rejects_with(
        r#"
[safety]
overcurrent_amps = 4.0
sustained_amps = 2.0

[homing]
stall_current_amps = 4.0
"#,
        "stall_current_amps must be < safety.overcurrent_amps",
    );
}

#[test]
fn stall_threshold_is_ignored_for_sensor_homing() {
    let cfg = load_toml(
        r#"
[safety]
overcurrent_amps = 4.0
sustained_amps = 2.0

[homing]
method = "sensor"
stall_current_amps = 9.0
"#,
    )
    .expect("parse");
    assert_eq!(cfg.homing.method, HomingMethod::Sensor);
    cfg.validate().expect("sensor homing does not use the stall threshold");
}

#[test]
fn rejects_sustained_above_overcurrent() {
    rejects_with(
        "[safety]\novercurrent_amps = 2.0\nsustained_amps = 3.0\n",
        "sustained_amps must be <= safety.overcurrent_amps",
    );
}

#[test]
fn rejects_inverted_supply_window() {
    rejects_with(
        "[safety]\nmin_supply_volts = 30.0\nmax_supply_volts = 20.0\n",
        "min_supply_volts must be < safety.max_supply_volts",
    );
}

#[test]
fn lower_supply_bound_alone_is_allowed() {
    let cfg = load_toml("[safety]\nmin_supply_volts = 18.0\n").expect("parse");
    cfg.validate().expect("max_supply_volts = 0 disables the upper bound");
}

#[test]
fn rejects_inverted_force_range() {
    rejects_with(
        "[safety]\nforce_min = 12.0\nforce_max = 2.0\n",
        "force_max must be > safety.force_min",
    );
}

#[test]
fn rejects_inverted_analog_range() {
    rejects_with(
        "[input]\nanalog_raw_min = 4000\nanalog_raw_max = 100\n",
        "analog_raw_max must be > input.analog_raw_min",
    );
}

#[test]
fn rejects_long_press_shorter_than_debounce() {
    rejects_with(
        "[input]\nbutton_debounce_ms = 50\nlong_press_ms = 40\n",
        "long_press_ms must be > input.button_debounce_ms",
    );
}

#[test]
fn rejects_homing_faster_than_machine() {
    rejects_with(
        "[calibration]\nmax_speed_mm_per_second = 100.0\n\n[homing]\nspeed_mm_s = 150.0\n",
        "homing.speed_mm_s must not exceed",
    );
}

#[test]
fn rejects_homing_distance_inside_zero_offset() {
    rejects_with(
        "[calibration]\nstroke_zero_offset_mm = 10.0\n\n[homing]\nmax_distance_mm = 5.0\n",
        "max_distance_mm must exceed",
    );
}

#[rstest]
#[case(0)]
#[case(20_000)]
fn rejects_tick_rate_out_of_range(#[case] hz: u32) {
    let toml = format!("[control]\ntick_hz = {hz}\n");
    rejects_with(&toml, "tick_hz must be in [1, 10000]");
}

#[test]
fn rejects_unknown_rotation() {
    rejects_with(
        "[logging]\nrotation = \"weekly\"\n",
        "rotation must be one of never|daily|hourly",
    );
}

#[test]
fn rejects_start_position_off_rail() {
    rejects_with(
        "[sim]\nrail_length_mm = 100.0\nstart_position_mm = 150.0\n",
        "start_position_mm must lie on the rail",
    );
}

#[test]
fn unknown_enum_value_fails_to_parse() {
    assert!(load_toml("[homing]\nmethod = \"magnetic\"\n").is_err());
}

#[test]
fn full_file_round_trips_through_loader() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stroker.toml");
    let mut f = std::fs::File::create(&path).expect("create");
    writeln!(
        f,
        r#"
[calibration]
steps_per_revolution = 200.0
pulley_tooth_count = 20.0
belt_pitch_mm = 2.0
max_stroke_length_mm = 150.0

[homing]
method = "sensorless"
direction = "reverse"
measure_travel = true

[control]
tick_hz = 500

[logging]
level = "debug"
rotation = "daily"
"#
    )
    .expect("write");
    drop(f);

    let cfg = load_file(&path).expect("load");
    assert!((cfg.calibration.max_stroke_length_mm - 150.0).abs() < f32::EPSILON);
    assert!(cfg.homing.measure_travel);
    assert_eq!(cfg.control.tick_hz, 500);
    assert_eq!(cfg.logging.level.as_deref(), Some("debug"));
}

#[test]
fn load_file_reports_missing_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_file(&dir.path().join("nope.toml")).expect_err("missing file");
    assert!(format!("{err}").contains("read config"));
}

#[test]
fn rejects_shared_input_pin() {
    rejects_with("[pins]\nbutton = 17\nhome_switch = 17\n", "must differ");
}

#[test]
fn pins_default_to_active_low_and_unset() {
    let cfg = load_toml("").expect("parse");
    assert!(cfg.pins.active_low);
    assert!(cfg.pins.button.is_none() && cfg.pins.home_switch.is_none());
}
