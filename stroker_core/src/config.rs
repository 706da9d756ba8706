//! Configuration types for the control core.
//!
//! These are the runtime configuration structs used by `Controller`.
//! They are separate from the TOML-deserialized config in `stroker_config`.

use std::time::Duration;

use crate::modes::RunMode;

/// How the encoder count behaves at the ends of its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderMode {
    #[default]
    Clamp,
    Wrap,
}

/// Operator input scaling and button timing.
#[derive(Debug, Clone)]
pub struct InputCfg {
    pub analog_raw_min: u16,
    pub analog_raw_max: u16,
    /// Raw samples averaged per analog reading.
    pub analog_samples: u8,
    pub encoder_pulses_per_full_scale: u32,
    pub encoder_mode: EncoderMode,
    pub pulses_per_pattern_step: u32,
    pub button_debounce_ms: u64,
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

/// Current/voltage supervision thresholds and the force range.
#[derive(Debug, Clone)]
pub struct SafetyCfg {
    pub current_samples: u8,
    /// EMA weight of the newest sample. Range: (0.0, 1.0].
    pub ema_alpha: f32,
    pub amps_per_count: f32,
    pub current_offset_counts: f32,
    /// Re-measure the zero-current offset while idle at build time.
    pub calibrate_offset_on_start: bool,
    pub volts_per_count: f32,
    pub overcurrent_amps: f32,
    pub sustained_amps: f32,
    pub sustained_ms: u64,
    /// 0.0 disables the bound.
    pub min_supply_volts: f32,
    /// 0.0 disables the bound.
    pub max_supply_volts: f32,
    pub force_min: f32,
    pub force_max: f32,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HomingMethod {
    #[default]
    Sensorless,
    Sensor,
}

/// Direction of the homing approach in motion-primitive coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HomeDirection {
    #[default]
    Reverse,
    Forward,
}

impl HomeDirection {
    /// +1.0 for forward, -1.0 for reverse.
    #[inline]
    pub fn sign(self) -> f32 {
        match self {
            Self::Reverse => -1.0,
            Self::Forward => 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HomingCfg {
    pub method: HomingMethod,
    pub direction: HomeDirection,
    pub speed_mm_s: f32,
    pub acceleration_mm_s2: f32,
    pub max_distance_mm: f32,
    pub stall_current_amps: f32,
    pub stall_dwell_ms: u64,
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

impl HomingCfg {
    pub fn stall_dwell(&self) -> Duration {
        Duration::from_millis(self.stall_dwell_ms)
    }
}

/// Tick loop and session settings.
#[derive(Debug, Clone)]
pub struct ControlCfg {
    pub tick_hz: u32,
    pub initial_run_mode: RunMode,
    pub life_stats_save_ms: u64,
    pub remote_queue: usize,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            tick_hz: 200,
            initial_run_mode: RunMode::SimplePenetration,
            life_stats_save_ms: 60_000,
            remote_queue: 32,
        }
    }
}
