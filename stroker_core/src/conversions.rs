//! `From` implementations bridging `stroker_config` types to `stroker_core` types.

use stroker_traits::CalibrationRecord;

use crate::calibration::DeviceCalibration;
use crate::config::{
    ControlCfg, EncoderMode, HomeDirection, HomingCfg, HomingMethod, InputCfg, SafetyCfg,
};
use crate::error::ControlError;
use crate::modes::RunMode;

// ── InputCfg ─────────────────────────────────────────────────────────────────

impl From<stroker_config::EncoderMode> for EncoderMode {
    fn from(m: stroker_config::EncoderMode) -> Self {
        match m {
            stroker_config::EncoderMode::Clamp => Self::Clamp,
            stroker_config::EncoderMode::Wrap => Self::Wrap,
        }
    }
}

impl From<&stroker_config::InputCfg> for InputCfg {
    fn from(c: &stroker_config::InputCfg) -> Self {
        Self {
            analog_raw_min: c.analog_raw_min,
            analog_raw_max: c.analog_raw_max,
            analog_samples: c.analog_samples,
            encoder_pulses_per_full_scale: c.encoder_pulses_per_full_scale,
            encoder_mode: c.encoder_mode.into(),
            pulses_per_pattern_step: c.pulses_per_pattern_step,
            button_debounce_ms: c.button_debounce_ms,
            long_press_ms: c.long_press_ms,
        }
    }
}

// ── SafetyCfg ────────────────────────────────────────────────────────────────

impl From<&stroker_config::SafetyCfg> for SafetyCfg {
    fn from(c: &stroker_config::SafetyCfg) -> Self {
        Self {
            current_samples: c.current_samples,
            ema_alpha: c.ema_alpha,
            amps_per_count: c.amps_per_count,
            current_offset_counts: c.current_offset_counts,
            calibrate_offset_on_start: c.calibrate_offset_on_start,
            volts_per_count: c.volts_per_count,
            overcurrent_amps: c.overcurrent_amps,
            sustained_amps: c.sustained_amps,
            sustained_ms: c.sustained_ms,
            min_supply_volts: c.min_supply_volts,
            max_supply_volts: c.max_supply_volts,
            force_min: c.force_min,
            force_max: c.force_max,
            max_sensor_failures: c.max_sensor_failures,
        }
    }
}

// ── HomingCfg ────────────────────────────────────────────────────────────────

impl From<&stroker_config::HomingCfg> for HomingCfg {
    fn from(c: &stroker_config::HomingCfg) -> Self {
        Self {
            method: match c.method {
                stroker_config::HomingMethod::Sensorless => HomingMethod::Sensorless,
                stroker_config::HomingMethod::Sensor => HomingMethod::Sensor,
            },
            direction: match c.direction {
                stroker_config::HomeDirection::Reverse => HomeDirection::Reverse,
                stroker_config::HomeDirection::Forward => HomeDirection::Forward,
            },
            speed_mm_s: c.speed_mm_s,
            acceleration_mm_s2: c.acceleration_mm_s2,
            max_distance_mm: c.max_distance_mm,
            stall_current_amps: c.stall_current_amps,
            stall_dwell_ms: c.stall_dwell_ms,
            measure_travel: c.measure_travel,
        }
    }
}

// ── ControlCfg ───────────────────────────────────────────────────────────────

impl From<&stroker_config::ControlCfg> for ControlCfg {
    fn from(c: &stroker_config::ControlCfg) -> Self {
        Self {
            tick_hz: c.tick_hz,
            initial_run_mode: match c.initial_run_mode {
                stroker_config::RunModeCfg::Simple => RunMode::SimplePenetration,
                stroker_config::RunModeCfg::Pattern => RunMode::StrokeEnginePattern,
            },
            life_stats_save_ms: c.life_stats_save_ms,
            remote_queue: c.remote_queue,
        }
    }
}

// ── Calibration ──────────────────────────────────────────────────────────────

/// Storage record for a `[calibration]` section.
pub fn calibration_record(c: &stroker_config::CalibrationCfg) -> CalibrationRecord {
    CalibrationRecord {
        steps_per_revolution: c.steps_per_revolution,
        gearing_ratio: c.gearing_ratio,
        pulley_tooth_count: c.pulley_tooth_count,
        belt_pitch_mm: c.belt_pitch_mm,
        max_speed_mm_per_second: c.max_speed_mm_per_second,
        max_stroke_length_mm: c.max_stroke_length_mm,
        stroke_zero_offset_mm: c.stroke_zero_offset_mm,
        acceleration_scaling: c.acceleration_scaling,
        command_deadzone_percentage: c.command_deadzone_percentage,
    }
}

impl TryFrom<&stroker_config::CalibrationCfg> for DeviceCalibration {
    type Error = ControlError;

    fn try_from(c: &stroker_config::CalibrationCfg) -> Result<Self, Self::Error> {
        Self::new(calibration_record(c))
    }
}
