//! The controller context: owns all control state and runs the cooperative tick.
//!
//! Tick order: staged remote writes, safety supervisor, homing (while active)
//! or local operator input, run-mode switch, active executor. The safety
//! supervisor overrides executors regardless of mode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use eyre::WrapErr;
use stroker_traits::{
    AnalogChannel, AnalogInput, ButtonInput, CalibrationRecord, Clock, EncoderInput, HomeSensor,
    LifeStatsRecord, MotionPrimitive, PatternSource, Persistence,
};
use tracing::{debug, info, trace, warn};

use crate::calibration::DeviceCalibration;
use crate::config::ControlCfg;
use crate::error::{ControlError, InterlockReason, Result};
use crate::executor::{ExecContext, Executor};
use crate::frame::{Oriented, travel_sign};
use crate::homing::{Homing, HomingOutcome, HomingSense, HomingState};
use crate::hw_error::map_hw_error;
use crate::input::{ButtonEvent, ButtonTracker, InputMapper, wait_for_button_press};
use crate::modes::{KnobMode, ModeState, Parameter, ParameterSet, RunMode};
use crate::safety::{SafetyState, SafetySupervisor};
use crate::stats::LifeStats;
use crate::util::{clamp_pct, period_us};

/// Writes staged by remote collaborators; applied at the start of a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalCommand {
    SetParameter(Parameter, f32),
    SelectPattern(usize),
    SetRunMode(RunMode),
    /// Step the knob selection forward or back; parameters are untouched.
    NextKnobMode,
    PrevKnobMode,
    ReplaceCalibration(CalibrationRecord),
    /// While remote control is held, local knob/button/potentiometer input is ignored.
    TakeRemoteControl,
    ReleaseRemoteControl,
    StopMotion,
    StartMotion,
    ClearInterlock,
    Rehome,
    AbortHoming,
}

/// Cloneable, thread-safe sender of `ExternalCommand`s.
#[derive(Debug, Clone)]
pub struct RemoteHandle {
    tx: Sender<ExternalCommand>,
}

impl RemoteHandle {
    /// Stage a command. Never blocks; a full queue is reported, not waited on.
    pub fn send(&self, cmd: ExternalCommand) -> std::result::Result<(), ControlError> {
        self.tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => {
                ControlError::CollaboratorUnavailable("remote command queue full".into())
            }
            TrySendError::Disconnected(_) => {
                ControlError::CollaboratorUnavailable("controller is gone".into())
            }
        })
    }

    pub fn set_parameter(&self, p: Parameter, value: f32) -> std::result::Result<(), ControlError> {
        self.send(ExternalCommand::SetParameter(p, value))
    }

    pub fn select_pattern(&self, index: usize) -> std::result::Result<(), ControlError> {
        self.send(ExternalCommand::SelectPattern(index))
    }

    pub fn set_run_mode(&self, mode: RunMode) -> std::result::Result<(), ControlError> {
        self.send(ExternalCommand::SetRunMode(mode))
    }
}

/// Motion-related part of the snapshot, in the homed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionState {
    pub position_mm: f32,
    /// Last target commanded by an executor or jog.
    pub target_mm: Option<f32>,
    pub moving: bool,
    pub homed: bool,
    pub travel_mm: f32,
}

/// Coarse outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    NotHomed,
    Homing,
    HomingFailed,
    Interlocked,
    /// Homed, but motion is stopped, the speed is below the deadzone, or an
    /// executor switch is still quiescing.
    Holding,
    Running,
}

/// Everything reported upwards once per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSnapshot {
    pub motion: MotionState,
    pub params: ParameterSet,
    pub pattern_name: Option<String>,
    pub run_mode: RunMode,
    pub knob_mode: KnobMode,
    pub homing: HomingState,
    pub homing_failure: Option<String>,
    pub safety: SafetyState,
    pub stats: LifeStatsRecord,
    pub remote_control: bool,
    pub motion_enabled: bool,
    pub ticks: u64,
}

/// Optional raw input primitives.
#[derive(Default)]
pub struct Inputs {
    pub analog: Option<Box<dyn AnalogInput>>,
    pub encoder: Option<Box<dyn EncoderInput>>,
    pub button: Option<Box<dyn ButtonInput>>,
    pub home_sensor: Option<Box<dyn HomeSensor>>,
}

pub struct Controller<M, P> {
    pub(crate) motion: M,
    pub(crate) patterns: P,
    pub(crate) inputs: Inputs,
    pub(crate) persistence: Option<Box<dyn Persistence>>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) calibration: DeviceCalibration,
    pub(crate) control: ControlCfg,
    pub(crate) input: InputMapper,
    pub(crate) button: ButtonTracker,
    pub(crate) safety: SafetySupervisor,
    pub(crate) homing: Homing,
    pub(crate) modes: ModeState,
    pub(crate) executor: Executor,
    pub(crate) motion_state: MotionState,
    pub(crate) stats: LifeStats,
    pub(crate) remote_tx: Sender<ExternalCommand>,
    pub(crate) remote_rx: Receiver<ExternalCommand>,
    pub(crate) remote_active: bool,
    pub(crate) motion_enabled: bool,
    pub(crate) quiescing: bool,
    pub(crate) last_tick: Instant,
    pub(crate) last_stats_save: Instant,
    pub(crate) ticks: u64,
}

impl<M, P> core::fmt::Debug for Controller<M, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("run_mode", &self.modes.run_mode())
            .field("homing", &self.homing.state())
            .field("motion", &self.motion_state)
            .field("interlock", &self.safety.interlock())
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

impl<M: MotionPrimitive, P: PatternSource> Controller<M, P> {
    /// Handle for staging external writes from any thread.
    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            tx: self.remote_tx.clone(),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock + Send + Sync> {
        Arc::clone(&self.clock)
    }

    pub fn control_cfg(&self) -> &ControlCfg {
        &self.control
    }

    /// Tick period derived from `tick_hz`.
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(period_us(self.control.tick_hz))
    }

    pub fn calibration(&self) -> &DeviceCalibration {
        &self.calibration
    }

    pub fn params(&self) -> &ParameterSet {
        self.modes.params()
    }

    pub fn run_mode(&self) -> RunMode {
        self.modes.run_mode()
    }

    pub fn knob_mode(&self) -> KnobMode {
        self.modes.knob_mode()
    }

    pub fn homing_state(&self) -> HomingState {
        self.homing.state()
    }

    pub fn homing_outcome(&self) -> Option<HomingOutcome> {
        self.homing.outcome()
    }

    pub fn homing_failure(&self) -> Option<&str> {
        self.homing.failure_reason()
    }

    pub fn is_homed(&self) -> bool {
        self.motion_state.homed
    }

    pub fn is_moving(&self) -> bool {
        self.motion.is_moving()
    }

    pub fn interlock(&self) -> Option<&InterlockReason> {
        self.safety.interlock()
    }

    pub fn safety(&self) -> &SafetyState {
        self.safety.state()
    }

    pub fn stats(&self) -> &LifeStats {
        &self.stats
    }

    pub fn motion_state(&self) -> &MotionState {
        &self.motion_state
    }

    pub fn patterns(&self) -> &P {
        &self.patterns
    }

    /// Names of all patterns offered by the pattern source.
    pub fn pattern_names(&self) -> Vec<String> {
        (0..self.patterns.pattern_count())
            .map(|i| {
                self.patterns
                    .pattern_name(i)
                    .map_or_else(|| format!("pattern {i}"), str::to_owned)
            })
            .collect()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let params = *self.modes.params();
        ControllerSnapshot {
            motion: self.motion_state,
            pattern_name: self.patterns.pattern_name(params.pattern).map(str::to_owned),
            params,
            run_mode: self.modes.run_mode(),
            knob_mode: self.modes.knob_mode(),
            homing: self.homing.state(),
            homing_failure: self.homing.failure_reason().map(str::to_owned),
            safety: self.safety.state().clone(),
            stats: self.stats.record(),
            remote_control: self.remote_active,
            motion_enabled: self.motion_enabled,
            ticks: self.ticks,
        }
    }

    /// One cooperative control cycle. Never fails; faults latch the interlock.
    pub fn tick(&mut self) -> TickStatus {
        let now = self.clock.now();
        let dt = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.ticks += 1;

        self.drain_remote();
        self.supervise(now);
        if self.homing.is_active() {
            self.poll_homing(now);
        } else {
            self.read_local_inputs(now);
        }
        self.handle_mode_change();
        self.run_executor();
        self.refresh_motion_state();

        self.stats.add_powered(dt);
        self.maybe_save_stats(now);
        self.status()
    }

    fn status(&self) -> TickStatus {
        if self.safety.is_interlocked() {
            return TickStatus::Interlocked;
        }
        match self.homing.state() {
            HomingState::Seeking => TickStatus::Homing,
            HomingState::Failed => TickStatus::HomingFailed,
            HomingState::Idle => TickStatus::NotHomed,
            HomingState::Found => {
                let holding = !self.motion_enabled
                    || self.quiescing
                    || self.modes.params().speed < self.modes.deadzone();
                if holding {
                    TickStatus::Holding
                } else {
                    TickStatus::Running
                }
            }
        }
    }

    fn drain_remote(&mut self) {
        let pending: Vec<ExternalCommand> = self.remote_rx.try_iter().collect();
        for cmd in pending {
            debug!(?cmd, "remote command");
            self.apply_command(cmd);
        }
    }

    fn apply_command(&mut self, cmd: ExternalCommand) {
        match cmd {
            ExternalCommand::SetParameter(p, value) => {
                if let Err(e) = ModeState::validate_parameter(p, value) {
                    debug!(error = %e, "clamping remote parameter");
                }
                self.modes.set_parameter(p, value);
                if self.modes.knob_mode().parameter() == Some(p) {
                    self.sync_encoder_to_knob();
                }
            }
            ExternalCommand::SelectPattern(index) => {
                if let Err(e) = self.modes.validate_pattern(index) {
                    debug!(error = %e, "clamping remote pattern index");
                }
                self.modes.select_pattern(index);
            }
            ExternalCommand::SetRunMode(mode) => self.modes.set_run_mode(mode),
            ExternalCommand::NextKnobMode => {
                self.modes.next_knob_mode();
                self.sync_encoder_to_knob();
            }
            ExternalCommand::PrevKnobMode => {
                self.modes.prev_knob_mode();
                self.sync_encoder_to_knob();
            }
            ExternalCommand::ReplaceCalibration(record) => {
                if let Err(e) = self.replace_calibration(record) {
                    warn!(error = %e, "calibration replacement rejected");
                }
            }
            ExternalCommand::TakeRemoteControl => {
                if !self.remote_active {
                    info!("remote control taken; local inputs ignored");
                }
                self.remote_active = true;
            }
            ExternalCommand::ReleaseRemoteControl => {
                if self.remote_active {
                    info!("remote control released");
                }
                self.remote_active = false;
                self.sync_encoder_to_knob();
            }
            ExternalCommand::StopMotion => self.stop_motion(),
            ExternalCommand::StartMotion => self.start_motion(),
            ExternalCommand::ClearInterlock => {
                self.clear_interlock();
            }
            ExternalCommand::Rehome => {
                if let Err(e) = self.start_homing() {
                    warn!(error = %e, "re-home request refused");
                }
            }
            ExternalCommand::AbortHoming => self.abort_homing(),
        }
    }

    fn supervise(&mut self, now: Instant) {
        let force_pct = self.modes.params().force;
        let adc = self.inputs.analog.as_deref_mut();
        if let Some(reason) = self.safety.tick(adc, force_pct, now) {
            self.enforce_interlock(&reason);
        }
    }

    /// Halt everything for a freshly latched interlock.
    fn enforce_interlock(&mut self, reason: &InterlockReason) {
        let decelerate = !reason.is_hard();
        if self.homing.is_active() {
            if !decelerate && let Err(e) = self.motion.stop(false) {
                warn!(error = %e, "abrupt stop failed");
            }
            self.homing.abort(&mut self.motion, "safety interlock");
            self.motion_state.homed = false;
        } else {
            self.credit_partial_leg();
            if let Err(e) = self.executor.halt(&mut self.motion, decelerate) {
                warn!(error = %e, "stop after interlock failed");
            }
        }
        self.motion_state.target_mm = None;
        self.quiescing = true;
    }

    fn latch_motion_fault(&mut self, err: &ControlError) {
        let reason = InterlockReason::MotionFault(err.to_string());
        if self.safety.trip(reason.clone()) {
            self.enforce_interlock(&reason);
        }
    }

    fn poll_homing(&mut self, now: Instant) {
        let sensor_triggered = self.inputs.home_sensor.as_deref_mut().and_then(|s| {
            s.is_triggered()
                .map_err(|e| debug!(error = %e, "home sensor read failed"))
                .ok()
        });
        let sense = HomingSense {
            immediate_amps: self.safety.state().immediate_amps,
            sensor_triggered,
        };
        match self
            .homing
            .poll(&mut self.motion, &self.calibration, sense, now)
        {
            HomingState::Found => self.on_homed(),
            HomingState::Failed => self.motion_state.homed = false,
            HomingState::Idle | HomingState::Seeking => {}
        }
    }

    fn on_homed(&mut self) {
        let travel = self
            .homing
            .outcome()
            .map_or(self.calibration.max_stroke_length_mm(), |o| o.usable_travel_mm);
        self.motion_state.homed = true;
        self.motion_state.travel_mm = travel;
        self.motion_state.target_mm = None;
        self.executor = Executor::for_mode(self.modes.run_mode());
        self.quiescing = false;
        info!(travel_mm = travel, "axis homed; motion permitted");
    }

    fn read_local_inputs(&mut self, now: Instant) {
        let remote = self.remote_active;

        if let Some(adc) = self.inputs.analog.as_deref_mut() {
            let samples = self.input.cfg().analog_samples;
            let pct = self
                .input
                .read_analog_percentage(adc, AnalogChannel::Speed, samples);
            if !remote && self.modes.apply_speed_input(pct) {
                trace!(speed = pct, "speed input");
            }
        }

        if let Some(enc) = self.inputs.encoder.as_deref_mut() {
            let delta = self.input.poll_encoder(enc);
            if !remote && delta != 0 {
                if self.modes.knob_mode() == KnobMode::Pattern {
                    let step = self.input.pattern_step(delta);
                    if step != 0 {
                        self.modes.change_pattern(step);
                    }
                } else {
                    self.input.apply_encoder_delta(delta);
                    self.modes.apply_knob_input(self.input.encoder_percentage());
                }
            }
        }

        if let Some(btn) = self.inputs.button.as_deref_mut() {
            let raw = btn.is_pressed().unwrap_or_else(|e| {
                debug!(error = %e, "button read failed");
                false
            });
            let event = self.button.update(raw, now);
            if remote {
                return;
            }
            match event {
                Some(ButtonEvent::ShortPress) => {
                    self.modes.next_knob_mode();
                    self.sync_encoder_to_knob();
                }
                Some(ButtonEvent::LongPress) => {
                    self.modes.cycle_run_mode();
                }
                None => {}
            }
        }
    }

    /// Reposition the knob so the newly selected field starts from its current value.
    fn sync_encoder_to_knob(&mut self) {
        let pct = self
            .modes
            .knob_mode()
            .parameter()
            .map_or(0.0, |p| self.modes.params().get(p));
        self.input.set_encoder_percentage(pct);
    }

    fn handle_mode_change(&mut self) {
        if !self.modes.take_mode_changed() {
            return;
        }
        let mode = self.modes.run_mode();
        if !self.homing.is_active() {
            self.credit_partial_leg();
            if self.motion.is_moving()
                && let Err(e) = self.motion.stop(true)
            {
                warn!(error = %e, "stop on run-mode switch failed");
            }
        }
        self.executor = Executor::for_mode(mode);
        self.motion_state.target_mm = None;
        self.quiescing = true;
        info!(mode = mode.name(), "executor switched");
    }

    /// Count the distance covered by a leg that is about to be dropped.
    fn credit_partial_leg(&mut self) {
        let pos = self.motion.current_position_mm() * travel_sign(self.homing.cfg().direction);
        if let Some(leg_mm) = self.executor.abandon_leg(pos)
            && leg_mm > 0.0
        {
            self.stats.add_distance(leg_mm);
            debug!(leg_mm, "partial leg credited");
        }
    }

    fn motion_permitted(&self) -> bool {
        self.motion_state.homed
            && self.motion_enabled
            && !self.safety.is_interlocked()
            && !self.homing.is_active()
    }

    fn run_executor(&mut self) {
        if !self.motion_permitted() {
            return;
        }
        if self.quiescing {
            if self.motion.is_moving() {
                return;
            }
            self.quiescing = false;
        }
        let direction = self.homing.cfg().direction;
        let ctx = ExecContext {
            params: self.modes.params(),
            calibration: &self.calibration,
            travel_mm: self.motion_state.travel_mm,
            deadzone: self.modes.deadzone(),
        };
        let mut view = Oriented::new(&mut self.motion, direction);
        let result = self.executor.step(&mut view, &mut self.patterns, &ctx);
        let issued = view.last_target();
        if issued.is_some() {
            self.motion_state.target_mm = issued;
        }
        match result {
            Ok(Some(leg_mm)) => {
                self.stats.add_leg(leg_mm);
                trace!(leg_mm, strokes = self.stats.number_strokes(), "leg completed");
            }
            Ok(None) => {}
            Err(e) => {
                let err = map_hw_error(&*e);
                self.latch_motion_fault(&err);
            }
        }
    }

    fn refresh_motion_state(&mut self) {
        let sign = travel_sign(self.homing.cfg().direction);
        self.motion_state.position_mm = self.motion.current_position_mm() * sign + 0.0;
        self.motion_state.moving = self.motion.is_moving();
    }

    fn maybe_save_stats(&mut self, now: Instant) {
        if self.persistence.is_none() {
            return;
        }
        let every = Duration::from_millis(self.control.life_stats_save_ms);
        if now.saturating_duration_since(self.last_stats_save) < every {
            return;
        }
        self.last_stats_save = now;
        if let Err(e) = self.save_life_stats() {
            warn!(error = %e, "periodic life stats save failed");
        }
    }

    /// Start (or restart) homing. Motion stays refused until it is `Found`.
    pub fn start_homing(&mut self) -> Result<()> {
        if let Some(reason) = self.safety.interlock() {
            return Err(eyre::Report::new(ControlError::Interlock(reason.clone())))
                .wrap_err("cannot home while interlocked");
        }
        self.motion_state.homed = false;
        self.motion_state.target_mm = None;
        self.executor = Executor::for_mode(self.modes.run_mode());
        self.quiescing = false;
        self.homing
            .start(&mut self.motion)
            .map_err(eyre::Report::new)
            .wrap_err("start homing")
    }

    pub fn abort_homing(&mut self) {
        self.homing.abort(&mut self.motion, "requested");
    }

    /// Explicit interlock acknowledgment. Returns whether one was cleared.
    pub fn clear_interlock(&mut self) -> bool {
        let cleared = self.safety.clear_interlock();
        if cleared {
            self.quiescing = true;
        }
        cleared
    }

    /// Disable cycling and bring the axis to a decelerated stop.
    ///
    /// An active homing run is aborted and ends in `Failed`.
    pub fn stop_motion(&mut self) {
        self.motion_enabled = false;
        if self.homing.is_active() {
            self.homing.abort(&mut self.motion, "stop requested");
            self.motion_state.homed = false;
            self.motion_state.target_mm = None;
            return;
        }
        self.credit_partial_leg();
        if let Err(e) = self.executor.halt(&mut self.motion, true) {
            let err = map_hw_error(&*e);
            self.latch_motion_fault(&err);
        }
        self.motion_state.target_mm = None;
    }

    pub fn start_motion(&mut self) {
        if !self.motion_enabled {
            info!("motion enabled");
        }
        self.motion_enabled = true;
        self.quiescing = true;
    }

    /// Refusal reason for a new move, if any.
    pub fn check_motion_allowed(&self) -> std::result::Result<(), ControlError> {
        if let Some(reason) = self.safety.interlock() {
            return Err(ControlError::Interlock(reason.clone()));
        }
        if !self.motion_state.homed || self.homing.is_active() {
            return Err(ControlError::NotHomed);
        }
        Ok(())
    }

    /// Single checked move in the homed frame, for maintenance and tests.
    ///
    /// Only allowed while cycling is stopped.
    pub fn jog_to(&mut self, position_mm: f32, speed_pct: f32) -> Result<()> {
        self.check_motion_allowed().map_err(eyre::Report::new)?;
        if self.motion_enabled {
            return Err(eyre::Report::new(ControlError::InvalidParameter(
                "stop motion before jogging".into(),
            )));
        }
        let travel = self.motion_state.travel_mm;
        if !(position_mm.is_finite() && (0.0..=travel).contains(&position_mm)) {
            return Err(eyre::Report::new(ControlError::InvalidParameter(format!(
                "jog target {position_mm} mm outside [0, {travel}] mm"
            ))));
        }
        let speed_pct = clamp_pct(speed_pct);
        if speed_pct <= 0.0 {
            return Err(eyre::Report::new(ControlError::InvalidParameter(
                "jog speed must be > 0".into(),
            )));
        }
        let speed = self.calibration.speed_for(speed_pct);
        let accel = self.calibration.acceleration_for(speed_pct);
        let direction = self.homing.cfg().direction;
        let result = Oriented::new(&mut self.motion, direction).move_to(position_mm, speed, accel);
        if let Err(e) = result {
            let err = map_hw_error(&*e);
            self.latch_motion_fault(&err);
            return Err(eyre::Report::new(err)).wrap_err("jog move refused");
        }
        self.motion_state.target_mm = Some(position_mm);
        Ok(())
    }

    /// Swap in new calibration constants and persist them.
    pub fn replace_calibration(&mut self, record: CalibrationRecord) -> Result<()> {
        let cal = DeviceCalibration::new(record).map_err(eyre::Report::new)?;
        self.calibration = cal;
        self.modes.set_deadzone(cal.command_deadzone_percentage());
        if self.motion_state.homed {
            self.motion_state.travel_mm =
                self.motion_state.travel_mm.min(cal.max_stroke_length_mm());
        }
        info!(steps_per_mm = cal.steps_per_mm(), "calibration replaced");
        if let Some(store) = self.persistence.as_mut() {
            store
                .save_calibration(&record)
                .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
                .wrap_err("persist calibration")?;
        }
        Ok(())
    }

    pub fn save_life_stats(&mut self) -> Result<()> {
        let record = self.stats.record();
        if let Some(store) = self.persistence.as_mut() {
            store
                .save_life_stats(&record)
                .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
                .wrap_err("persist life stats")?;
            debug!(strokes = record.number_strokes, "life stats saved");
        }
        Ok(())
    }

    /// Block until the operator presses and releases the button.
    ///
    /// Meant for prompts before a session; the tick loop is not running.
    pub fn wait_for_button(&mut self, timeout: Duration) -> Result<()> {
        let poll = self.tick_period();
        let debounce_ms = self.input.cfg().button_debounce_ms;
        let Some(button) = self.inputs.button.as_deref_mut() else {
            return Err(eyre::Report::new(ControlError::CollaboratorUnavailable(
                "no button fitted".into(),
            )));
        };
        wait_for_button_press(button, &*self.clock, timeout, poll, debounce_ms)
    }
}
