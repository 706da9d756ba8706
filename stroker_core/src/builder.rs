//! Type-state builder for `Controller` and generic `build_controller` constructor.
//!
//! The builder enforces at compile time that a motion primitive and a pattern
//! source are provided before `build()` is available. `try_build()` is always
//! available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use stroker_traits::clock::{Clock, MonotonicClock};
use stroker_traits::{
    AnalogInput, ButtonInput, EncoderInput, ForceLimiter, HomeSensor, MotionPrimitive,
    PatternSource, Persistence,
};
use tracing::{debug, info, warn};

use crate::calibration::DeviceCalibration;
use crate::config::*;
use crate::controller::{Controller, Inputs, MotionState};
use crate::error::{BuildError, Result};
use crate::executor::Executor;
use crate::homing::Homing;
use crate::input::{ButtonTracker, InputMapper};
use crate::modes::ModeState;
use crate::safety::SafetySupervisor;
use crate::stats::LifeStats;

/// Controller over boxed collaborators, as produced by `ControllerBuilder`.
pub type DynController = Controller<Box<dyn MotionPrimitive>, Box<dyn PatternSource>>;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Everything besides the two mandatory collaborators. Unset fields take defaults.
#[derive(Default)]
pub struct ControllerParts {
    pub analog: Option<Box<dyn AnalogInput>>,
    pub encoder: Option<Box<dyn EncoderInput>>,
    pub button: Option<Box<dyn ButtonInput>>,
    pub home_sensor: Option<Box<dyn HomeSensor>>,
    pub force_limiter: Option<Box<dyn ForceLimiter>>,
    pub persistence: Option<Box<dyn Persistence>>,
    pub clock: Option<Box<dyn Clock + Send + Sync>>,
    pub calibration: Option<DeviceCalibration>,
    pub input: Option<InputCfg>,
    pub safety: Option<SafetyCfg>,
    pub homing: Option<HomingCfg>,
    pub control: Option<ControlCfg>,
}

/// Builder for `Controller`. All fields are validated on `build()`.
pub struct ControllerBuilder<MS, PS> {
    motion: Option<Box<dyn MotionPrimitive>>,
    patterns: Option<Box<dyn PatternSource>>,
    parts: ControllerParts,
    _m: PhantomData<MS>,
    _p: PhantomData<PS>,
}

impl Default for ControllerBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            motion: None,
            patterns: None,
            parts: ControllerParts::default(),
            _m: PhantomData,
            _p: PhantomData,
        }
    }
}

impl DynController {
    /// Start building a controller over boxed collaborators.
    pub fn builder() -> ControllerBuilder<Missing, Missing> {
        ControllerBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Validate configuration and construct a `Controller`.
///
/// Shared by `ControllerBuilder::try_build()` and `build_controller()`.
fn validate_and_build<M, P>(motion: M, patterns: P, parts: ControllerParts) -> Result<Controller<M, P>>
where
    M: MotionPrimitive,
    P: PatternSource,
{
    let input = parts.input.unwrap_or_default();
    let safety = parts.safety.unwrap_or_default();
    let homing = parts.homing.unwrap_or_default();
    let control = parts.control.unwrap_or_default();

    // ── Validation ───────────────────────────────────────────────────────────
    if input.analog_raw_max <= input.analog_raw_min {
        return Err(invalid("analog_raw_max must be > analog_raw_min"));
    }
    if input.encoder_pulses_per_full_scale == 0 || input.pulses_per_pattern_step == 0 {
        return Err(invalid("encoder pulse counts must be > 0"));
    }
    if !(safety.ema_alpha > 0.0 && safety.ema_alpha <= 1.0) {
        return Err(invalid("ema_alpha must be in (0, 1]"));
    }
    if !(safety.overcurrent_amps > 0.0) || safety.sustained_amps > safety.overcurrent_amps {
        return Err(invalid("current limits must satisfy 0 < sustained <= overcurrent"));
    }
    if safety.force_max <= safety.force_min {
        return Err(invalid("force_max must be > force_min"));
    }
    if safety.max_sensor_failures == 0 {
        return Err(invalid("max_sensor_failures must be >= 1"));
    }
    if !(homing.speed_mm_s > 0.0 && homing.acceleration_mm_s2 > 0.0) {
        return Err(invalid("homing speed and acceleration must be > 0"));
    }
    if !(homing.max_distance_mm > 0.0) {
        return Err(invalid("homing max_distance_mm must be > 0"));
    }
    match homing.method {
        HomingMethod::Sensor if parts.home_sensor.is_none() => {
            return Err(invalid("sensor homing requires a home sensor"));
        }
        HomingMethod::Sensorless if parts.analog.is_none() => {
            return Err(invalid("sensorless homing requires current sensing"));
        }
        HomingMethod::Sensorless if homing.stall_current_amps >= safety.overcurrent_amps => {
            return Err(invalid("stall current must be below the overcurrent limit"));
        }
        _ => {}
    }
    if control.tick_hz == 0 {
        return Err(invalid("tick_hz must be > 0"));
    }
    if control.remote_queue == 0 {
        return Err(invalid("remote_queue must be > 0"));
    }

    // ── Persisted state ──────────────────────────────────────────────────────
    let mut persistence = parts.persistence;
    let mut calibration = parts.calibration.unwrap_or_default();
    let mut stats = LifeStats::default();
    if let Some(store) = persistence.as_deref_mut() {
        match store.load_calibration() {
            Ok(Some(record)) => match DeviceCalibration::new(record) {
                Ok(c) => {
                    info!(steps_per_mm = c.steps_per_mm(), "using persisted calibration");
                    calibration = c;
                }
                Err(e) => warn!(error = %e, "persisted calibration rejected; keeping configured values"),
            },
            Ok(None) => debug!("no persisted calibration"),
            Err(e) => warn!(error = %e, "calibration store unavailable"),
        }
        match store.load_life_stats() {
            Ok(Some(record)) => stats = LifeStats::from_record(record),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "life stats store unavailable; starting from zero"),
        }
    }

    // ── Runtime state ────────────────────────────────────────────────────────
    let clock: Arc<dyn Clock + Send + Sync> = match parts.clock {
        Some(b) => Arc::from(b),
        None => Arc::new(MonotonicClock::new()),
    };

    let mut analog = parts.analog;
    let mut supervisor = SafetySupervisor::new(safety.clone(), parts.force_limiter);
    if safety.calibrate_offset_on_start
        && let Some(adc) = analog.as_deref_mut()
        && supervisor
            .calibrate_offset(adc, safety.current_samples.max(8))
            .is_none()
    {
        warn!("current offset calibration failed; using configured offset");
    }

    let modes = ModeState::new(
        control.initial_run_mode,
        patterns.pattern_count(),
        calibration.command_deadzone_percentage(),
    );
    let mut mapper = InputMapper::new(input.clone());
    if let Some(p) = modes.knob_mode().parameter() {
        mapper.set_encoder_percentage(modes.params().get(p));
    }
    let button = ButtonTracker::new(input.button_debounce_ms, input.long_press_ms);
    let (remote_tx, remote_rx) = crossbeam_channel::bounded(control.remote_queue);
    let executor = Executor::for_mode(control.initial_run_mode);
    let now: Instant = clock.now();

    Ok(Controller {
        motion,
        patterns,
        inputs: Inputs {
            analog,
            encoder: parts.encoder,
            button: parts.button,
            home_sensor: parts.home_sensor,
        },
        persistence,
        clock,
        calibration,
        control,
        input: mapper,
        button,
        safety: supervisor,
        homing: Homing::new(homing),
        modes,
        executor,
        motion_state: MotionState {
            position_mm: 0.0,
            target_mm: None,
            moving: false,
            homed: false,
            travel_mm: 0.0,
        },
        stats,
        remote_tx,
        remote_rx,
        remote_active: false,
        motion_enabled: true,
        quiescing: false,
        last_tick: now,
        last_stats_save: now,
        ticks: 0,
    })
}

impl<MS, PS> ControllerBuilder<MS, PS> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<DynController> {
        let motion = self
            .motion
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMotion))?;
        let patterns = self
            .patterns
            .ok_or_else(|| eyre::Report::new(BuildError::MissingPatterns))?;
        validate_and_build(motion, patterns, self.parts)
    }
}

/// Chainable setters that do not affect type-state.
impl<MS, PS> ControllerBuilder<MS, PS> {
    pub fn with_analog(mut self, adc: impl AnalogInput + 'static) -> Self {
        self.parts.analog = Some(Box::new(adc));
        self
    }
    pub fn with_encoder(mut self, enc: impl EncoderInput + 'static) -> Self {
        self.parts.encoder = Some(Box::new(enc));
        self
    }
    pub fn with_button(mut self, button: impl ButtonInput + 'static) -> Self {
        self.parts.button = Some(Box::new(button));
        self
    }
    pub fn with_home_sensor(mut self, sensor: impl HomeSensor + 'static) -> Self {
        self.parts.home_sensor = Some(Box::new(sensor));
        self
    }
    pub fn with_force_limiter(mut self, limiter: impl ForceLimiter + 'static) -> Self {
        self.parts.force_limiter = Some(Box::new(limiter));
        self
    }
    pub fn with_persistence(mut self, store: impl Persistence + 'static) -> Self {
        self.parts.persistence = Some(Box::new(store));
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.parts.clock = Some(clock);
        self
    }
    pub fn with_calibration(mut self, calibration: DeviceCalibration) -> Self {
        self.parts.calibration = Some(calibration);
        self
    }
    pub fn with_input(mut self, input: InputCfg) -> Self {
        self.parts.input = Some(input);
        self
    }
    pub fn with_safety(mut self, safety: SafetyCfg) -> Self {
        self.parts.safety = Some(safety);
        self
    }
    pub fn with_homing(mut self, homing: HomingCfg) -> Self {
        self.parts.homing = Some(homing);
        self
    }
    pub fn with_control(mut self, control: ControlCfg) -> Self {
        self.parts.control = Some(control);
        self
    }

    /// Apply every section of a loaded config file.
    pub fn with_config(mut self, cfg: &stroker_config::Config) -> Result<Self> {
        let calibration =
            DeviceCalibration::try_from(&cfg.calibration).map_err(eyre::Report::new)?;
        self.parts.calibration = Some(calibration);
        self.parts.input = Some((&cfg.input).into());
        self.parts.safety = Some((&cfg.safety).into());
        self.parts.homing = Some((&cfg.homing).into());
        self.parts.control = Some((&cfg.control).into());
        Ok(self)
    }
}

// Setters that advance type-state
impl<PS> ControllerBuilder<Missing, PS> {
    pub fn with_motion(
        self,
        motion: impl MotionPrimitive + 'static,
    ) -> ControllerBuilder<Set, PS> {
        ControllerBuilder {
            motion: Some(Box::new(motion)),
            patterns: self.patterns,
            parts: self.parts,
            _m: PhantomData,
            _p: PhantomData,
        }
    }
}

impl<MS> ControllerBuilder<MS, Missing> {
    pub fn with_patterns(
        self,
        patterns: impl PatternSource + 'static,
    ) -> ControllerBuilder<MS, Set> {
        ControllerBuilder {
            motion: self.motion,
            patterns: Some(Box::new(patterns)),
            parts: self.parts,
            _m: PhantomData,
            _p: PhantomData,
        }
    }
}

impl ControllerBuilder<Set, Set> {
    /// Validate and build. Only available once motion and patterns are set.
    pub fn build(self) -> Result<DynController> {
        self.try_build()
    }
}

/// Build a statically-dispatched controller from concrete collaborators.
pub fn build_controller<M, P>(motion: M, patterns: P, parts: ControllerParts) -> Result<Controller<M, P>>
where
    M: MotionPrimitive,
    P: PatternSource,
{
    validate_and_build(motion, patterns, parts)
}
