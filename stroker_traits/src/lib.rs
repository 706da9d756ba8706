//! Collaborator interfaces for the stroker control core.
//!
//! Everything the core does not own lives behind these traits: the motion
//! primitive that generates step pulses, the pattern waveform library, the
//! settings store and the raw input primitives. Errors cross the boundary as
//! `Box<dyn Error + Send + Sync>`; the core maps them to its own typed errors.

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Error type used at every trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Step-pulse / acceleration-profile service driving the actuator.
///
/// Positions are millimetres in the register's coordinate frame; after homing
/// that frame has its origin at the homed zero.
pub trait MotionPrimitive {
    /// Start a move towards `position_mm`, replacing any move in flight.
    fn move_to(
        &mut self,
        position_mm: f32,
        speed_mm_per_s: f32,
        accel_mm_per_s2: f32,
    ) -> Result<(), BoxError>;
    fn current_position_mm(&self) -> f32;
    fn is_moving(&self) -> bool;
    /// Stop the current move. `decelerate == false` halts on the spot.
    fn stop(&mut self, decelerate: bool) -> Result<(), BoxError>;
    /// Rewrite the position register so the current physical point reads `position_mm`.
    fn set_current_position_mm(&mut self, position_mm: f32) -> Result<(), BoxError>;
}

/// Pattern waveform generator used by the stroke-engine run mode.
pub trait PatternSource {
    fn pattern_count(&self) -> usize;
    fn pattern_name(&self, index: usize) -> Option<&str>;
    fn select_pattern(&mut self, index: usize) -> Result<(), BoxError>;
    /// Next target as `(position_mm, speed_mm_per_s)`.
    ///
    /// `depth_mm` is the far end of the stroke window and `stroke_mm` its length,
    /// both already resolved against the homed travel. `sensation_pct` is 0-100
    /// with 50 as neutral. The returned speed is the full-speed value; the caller
    /// scales it by the operator speed.
    fn next_target(
        &mut self,
        stroke_mm: f32,
        depth_mm: f32,
        sensation_pct: f32,
    ) -> Result<(f32, f32), BoxError>;
}

/// Analog inputs sampled by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalogChannel {
    /// Speed potentiometer on the remote.
    Speed,
    /// Motor current sense amplifier.
    Current,
    /// Supply voltage divider.
    Voltage,
}

impl AnalogChannel {
    pub const ALL: [AnalogChannel; 3] = [Self::Speed, Self::Current, Self::Voltage];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Speed => 0,
            Self::Current => 1,
            Self::Voltage => 2,
        }
    }
}

pub trait AnalogInput {
    /// One raw ADC sample.
    fn read_raw(&mut self, channel: AnalogChannel) -> Result<u16, BoxError>;
}

pub trait EncoderInput {
    /// Pulses accumulated since the previous call (signed).
    fn take_delta(&mut self) -> Result<i32, BoxError>;
}

pub trait ButtonInput {
    /// Raw (undebounced) level of the button.
    fn is_pressed(&mut self) -> Result<bool, BoxError>;
}

pub trait HomeSensor {
    fn is_triggered(&mut self) -> Result<bool, BoxError>;
}

/// Torque-limiting hardware (e.g. a servo drive reached over a field bus).
pub trait ForceLimiter {
    fn set_force(&mut self, force: i32) -> Result<(), BoxError>;
}

/// Calibration constants as stored by a persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationRecord {
    pub steps_per_revolution: f32,
    pub gearing_ratio: f32,
    pub pulley_tooth_count: f32,
    pub belt_pitch_mm: f32,
    pub max_speed_mm_per_second: f32,
    pub max_stroke_length_mm: f32,
    pub stroke_zero_offset_mm: f32,
    pub acceleration_scaling: f32,
    pub command_deadzone_percentage: f32,
}

/// Lifetime counters as stored by a persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LifeStatsRecord {
    pub travelled_distance_meters: f64,
    pub life_seconds_powered: f64,
    pub number_strokes: u64,
}

pub trait Persistence {
    /// `Ok(None)` when nothing has been stored yet.
    fn load_calibration(&mut self) -> Result<Option<CalibrationRecord>, BoxError>;
    fn save_calibration(&mut self, record: &CalibrationRecord) -> Result<(), BoxError>;
    fn load_life_stats(&mut self) -> Result<Option<LifeStatsRecord>, BoxError>;
    fn save_life_stats(&mut self, record: &LifeStatsRecord) -> Result<(), BoxError>;
}

impl<T: MotionPrimitive + ?Sized> MotionPrimitive for Box<T> {
    fn move_to(
        &mut self,
        position_mm: f32,
        speed_mm_per_s: f32,
        accel_mm_per_s2: f32,
    ) -> Result<(), BoxError> {
        (**self).move_to(position_mm, speed_mm_per_s, accel_mm_per_s2)
    }
    fn current_position_mm(&self) -> f32 {
        (**self).current_position_mm()
    }
    fn is_moving(&self) -> bool {
        (**self).is_moving()
    }
    fn stop(&mut self, decelerate: bool) -> Result<(), BoxError> {
        (**self).stop(decelerate)
    }
    fn set_current_position_mm(&mut self, position_mm: f32) -> Result<(), BoxError> {
        (**self).set_current_position_mm(position_mm)
    }
}

impl<T: PatternSource + ?Sized> PatternSource for Box<T> {
    fn pattern_count(&self) -> usize {
        (**self).pattern_count()
    }
    fn pattern_name(&self, index: usize) -> Option<&str> {
        (**self).pattern_name(index)
    }
    fn select_pattern(&mut self, index: usize) -> Result<(), BoxError> {
        (**self).select_pattern(index)
    }
    fn next_target(
        &mut self,
        stroke_mm: f32,
        depth_mm: f32,
        sensation_pct: f32,
    ) -> Result<(f32, f32), BoxError> {
        (**self).next_target(stroke_mm, depth_mm, sensation_pct)
    }
}
