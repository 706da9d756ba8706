#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the stroker controller.
//!
//! - `Config` and its sections are deserialized from TOML. Every section has
//!   defaults so an empty file is a valid (simulated) machine.
//! - `Config::validate()` rejects values the control core cannot run with.
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CalibrationCfg {
    pub steps_per_revolution: f32,
    /// Motor-to-pulley gearing; 1.0 for direct drive.
    pub gearing_ratio: f32,
    pub pulley_tooth_count: f32,
    pub belt_pitch_mm: f32,
    pub max_speed_mm_per_second: f32,
    pub max_stroke_length_mm: f32,
    /// Distance kept between the homing end-stop and the zero position.
    pub stroke_zero_offset_mm: f32,
    pub acceleration_scaling: f32,
    /// Knob changes smaller than this (in percent) are ignored.
    pub command_deadzone_percentage: f32,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            steps_per_revolution: 800.0,
            gearing_ratio: 1.0,
            pulley_tooth_count: 20.0,
            belt_pitch_mm: 2.0,
            max_speed_mm_per_second: 900.0,
            max_stroke_length_mm: 75.0,
            stroke_zero_offset_mm: 6.0,
            acceleration_scaling: 100.0,
            command_deadzone_percentage: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncoderMode {
    /// Stop at 0 % / 100 %.
    #[default]
    Clamp,
    /// Roll over from 100 % back to 0 % and vice versa.
    Wrap,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InputCfg {
    pub analog_raw_min: u16,
    pub analog_raw_max: u16,
    /// Samples averaged per analog percentage reading.
    pub analog_samples: u8,
    pub encoder_pulses_per_full_scale: u32,
    pub encoder_mode: EncoderMode,
    /// Encoder pulses per pattern step while the knob is in pattern mode.
    pub pulses_per_pattern_step: u32,
    pub button_debounce_ms: u64,
    /// Holding the button at least this long cycles the run mode.
    pub long_press_ms: u64,
}

impl Default for InputCfg {
    fn default() -> Self {
        Self {
            analog_raw_min: 0,
            analog_raw_max: 4095,
            analog_samples: 50,
            encoder_pulses_per_full_scale: 400,
            encoder_mode: EncoderMode::Clamp,
            pulses_per_pattern_step: 8,
            button_debounce_ms: 20,
            long_press_ms: 1500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SafetyCfg {
    /// Samples averaged per current reading.
    pub current_samples: u8,
    /// EMA weight of the newest current sample, (0.0, 1.0].
    pub ema_alpha: f32,
    pub amps_per_count: f32,
    /// Zero-current ADC offset; replaced by the idle calibration at startup when
    /// `calibrate_offset_on_start` is set.
    pub current_offset_counts: f32,
    pub calibrate_offset_on_start: bool,
    pub volts_per_count: f32,
    /// Instantaneous current that trips the interlock immediately.
    pub overcurrent_amps: f32,
    /// Averaged current that trips the interlock after `sustained_ms`.
    pub sustained_amps: f32,
    pub sustained_ms: u64,
    /// Supply window; 0.0 disables the respective bound.
    pub min_supply_volts: f32,
    pub max_supply_volts: f32,
    /// Force range that the 0-100 % force knob maps onto.
    pub force_min: f32,
    pub force_max: f32,
    /// Consecutive failed current reads before the interlock trips.
    pub max_sensor_failures: u8,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            current_samples: 20,
            ema_alpha: 0.02,
            amps_per_count: 0.005,
            current_offset_counts: 0.0,
            calibrate_offset_on_start: true,
            volts_per_count: 0.0125,
            overcurrent_amps: 6.0,
            sustained_amps: 3.0,
            sustained_ms: 2000,
            min_supply_volts: 0.0,
            max_supply_volts: 0.0,
            force_min: 2.0,
            force_max: 12.0,
            max_sensor_failures: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HomingMethod {
    /// Detect the mechanical end-stop through the current spike.
    #[default]
    Sensorless,
    /// Dedicated home switch.
    Sensor,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HomeDirection {
    /// Towards decreasing register positions.
    #[default]
    Reverse,
    Forward,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HomingCfg {
    pub method: HomingMethod,
    pub direction: HomeDirection,
    pub speed_mm_s: f32,
    pub acceleration_mm_s2: f32,
    /// Travel after which homing gives up.
    pub max_distance_mm: f32,
    pub stall_current_amps: f32,
    /// Stall current must persist this long to count as the end-stop.
    pub stall_dwell_ms: u64,
    /// Also find the far end-stop and shrink the usable travel to fit.
    pub measure_travel: bool,
}

impl Default for HomingCfg {
    fn default() -> Self {
        Self {
            method: HomingMethod::Sensorless,
            direction: HomeDirection::Reverse,
            speed_mm_s: 25.0,
            acceleration_mm_s2: 1000.0,
            max_distance_mm: 400.0,
            stall_current_amps: 1.5,
            stall_dwell_ms: 40,
            measure_travel: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunModeCfg {
    #[default]
    Simple,
    Pattern,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControlCfg {
    pub tick_hz: u32,
    pub initial_run_mode: RunModeCfg,
    /// How often life statistics are written back to storage.
    pub life_stats_save_ms: u64,
    /// Capacity of the staged remote-command queue.
    pub remote_queue: usize,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            tick_hz: 200,
            initial_run_mode: RunModeCfg::Simple,
            life_stats_save_ms: 60_000,
            remote_queue: 32,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimCfg {
    pub rail_length_mm: f32,
    pub start_position_mm: f32,
    /// Physical position at which the simulated home switch closes.
    pub home_switch_mm: f32,
    pub idle_current_amps: f32,
    pub moving_current_amps: f32,
    pub stall_current_amps: f32,
    pub supply_volts: f32,
    /// Directory for the file-backed settings store; none keeps stats in memory.
    pub store_dir: Option<String>,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            rail_length_mm: 200.0,
            start_position_mm: 20.0,
            home_switch_mm: 2.0,
            idle_current_amps: 0.2,
            moving_current_amps: 0.6,
            stall_current_amps: 2.5,
            supply_volts: 24.0,
            store_dir: None,
        }
    }
}

/// GPIO inputs for the `hardware` build. Unset pins use the simulated input.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PinsCfg {
    pub button: Option<u8>,
    pub home_switch: Option<u8>,
    pub active_low: bool,
}

impl Default for PinsCfg {
    fn default() -> Self {
        Self {
            button: None,
            home_switch: None,
            active_low: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub calibration: CalibrationCfg,
    pub input: InputCfg,
    pub safety: SafetyCfg,
    pub homing: HomingCfg,
    pub control: ControlCfg,
    pub logging: Logging,
    pub pins: PinsCfg,
    pub sim: SimCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))?;
    cfg.validate()?;
    Ok(cfg)
}

#[inline]
fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

impl CalibrationCfg {
    pub fn validate(&self) -> eyre::Result<()> {
        let fields = [
            ("steps_per_revolution", self.steps_per_revolution),
            ("gearing_ratio", self.gearing_ratio),
            ("pulley_tooth_count", self.pulley_tooth_count),
            ("belt_pitch_mm", self.belt_pitch_mm),
            ("max_speed_mm_per_second", self.max_speed_mm_per_second),
            ("max_stroke_length_mm", self.max_stroke_length_mm),
            ("stroke_zero_offset_mm", self.stroke_zero_offset_mm),
            ("acceleration_scaling", self.acceleration_scaling),
            ("command_deadzone_percentage", self.command_deadzone_percentage),
        ];
        for (name, value) in fields {
            if !positive(value) {
                eyre::bail!("calibration.{name} must be > 0");
            }
        }
        if self.command_deadzone_percentage >= 100.0 {
            eyre::bail!("calibration.command_deadzone_percentage must be < 100");
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Calibration
        self.calibration.validate()?;

        // Input
        if self.input.analog_raw_max <= self.input.analog_raw_min {
            eyre::bail!("input.analog_raw_max must be > input.analog_raw_min");
        }
        if self.input.analog_samples == 0 {
            eyre::bail!("input.analog_samples must be >= 1");
        }
        if self.input.encoder_pulses_per_full_scale == 0 {
            eyre::bail!("input.encoder_pulses_per_full_scale must be >= 1");
        }
        if self.input.pulses_per_pattern_step == 0 {
            eyre::bail!("input.pulses_per_pattern_step must be >= 1");
        }
        if self.input.long_press_ms <= self.input.button_debounce_ms {
            eyre::bail!("input.long_press_ms must be > input.button_debounce_ms");
        }

        // Safety
        if self.safety.current_samples == 0 {
            eyre::bail!("safety.current_samples must be >= 1");
        }
        if !(self.safety.ema_alpha > 0.0 && self.safety.ema_alpha <= 1.0) {
            eyre::bail!("safety.ema_alpha must be in (0.0, 1.0]");
        }
        if !positive(self.safety.amps_per_count) {
            eyre::bail!("safety.amps_per_count must be > 0");
        }
        if !positive(self.safety.volts_per_count) {
            eyre::bail!("safety.volts_per_count must be > 0");
        }
        if !positive(self.safety.overcurrent_amps) {
            eyre::bail!("safety.overcurrent_amps must be > 0");
        }
        if !positive(self.safety.sustained_amps) {
            eyre::bail!("safety.sustained_amps must be > 0");
        }
        if self.safety.sustained_amps > self.safety.overcurrent_amps {
            eyre::bail!("safety.sustained_amps must be <= safety.overcurrent_amps");
        }
        if self.safety.min_supply_volts < 0.0 || self.safety.max_supply_volts < 0.0 {
            eyre::bail!("safety supply voltage bounds must be >= 0");
        }
        if self.safety.max_supply_volts > 0.0
            && self.safety.min_supply_volts >= self.safety.max_supply_volts
        {
            eyre::bail!("safety.min_supply_volts must be < safety.max_supply_volts");
        }
        if self.safety.force_max <= self.safety.force_min {
            eyre::bail!("safety.force_max must be > safety.force_min");
        }
        if self.safety.max_sensor_failures == 0 {
            eyre::bail!("safety.max_sensor_failures must be >= 1");
        }

        // Homing
        if !positive(self.homing.speed_mm_s) {
            eyre::bail!("homing.speed_mm_s must be > 0");
        }
        if self.homing.speed_mm_s > self.calibration.max_speed_mm_per_second {
            eyre::bail!("homing.speed_mm_s must not exceed calibration.max_speed_mm_per_second");
        }
        if !positive(self.homing.acceleration_mm_s2) {
            eyre::bail!("homing.acceleration_mm_s2 must be > 0");
        }
        if self.homing.max_distance_mm <= self.calibration.stroke_zero_offset_mm {
            eyre::bail!("homing.max_distance_mm must exceed calibration.stroke_zero_offset_mm");
        }
        if self.homing.method == HomingMethod::Sensorless {
            if !positive(self.homing.stall_current_amps) {
                eyre::bail!("homing.stall_current_amps must be > 0");
            }
            if self.homing.stall_current_amps >= self.safety.overcurrent_amps {
                eyre::bail!("homing.stall_current_amps must be < safety.overcurrent_amps");
            }
        }

        // Control
        if self.control.tick_hz == 0 || self.control.tick_hz > 10_000 {
            eyre::bail!("control.tick_hz must be in [1, 10000]");
        }
        if self.control.remote_queue == 0 {
            eyre::bail!("control.remote_queue must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        // Pins
        if let (Some(a), Some(b)) = (self.pins.button, self.pins.home_switch)
            && a == b
        {
            eyre::bail!("pins.button and pins.home_switch must differ");
        }

        // Sim
        if !positive(self.sim.rail_length_mm) {
            eyre::bail!("sim.rail_length_mm must be > 0");
        }
        if !(0.0..=self.sim.rail_length_mm).contains(&self.sim.start_position_mm) {
            eyre::bail!("sim.start_position_mm must lie on the rail");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_a_valid_machine() {
        let cfg = load_toml("").expect("parse");
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.homing.method, HomingMethod::Sensorless);
        assert_eq!(cfg.control.initial_run_mode, RunModeCfg::Simple);
    }

    #[test]
    fn enums_parse_lowercase() {
        let cfg = load_toml(
            r#"
[homing]
method = "sensor"
direction = "forward"

[input]
encoder_mode = "wrap"

[control]
initial_run_mode = "pattern"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.homing.method, HomingMethod::Sensor);
        assert_eq!(cfg.homing.direction, HomeDirection::Forward);
        assert_eq!(cfg.input.encoder_mode, EncoderMode::Wrap);
        assert_eq!(cfg.control.initial_run_mode, RunModeCfg::Pattern);
    }
}
