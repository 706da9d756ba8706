//! Simulated rail. Actuator, sensing, home switch, knob, button and force
//! limiter all observe one physical state driven by a shared clock.
//!
//! Kinematics are deliberately coarse: moves run at constant speed, a
//! decelerated stop coasts `v²/2a`, and pushing against an end-stop draws the
//! stall current until the move is stopped.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use stroker_traits::{
    AnalogChannel, AnalogInput, BoxError, ButtonInput, CalibrationRecord, Clock, EncoderInput,
    ForceLimiter, HomeSensor, LifeStatsRecord, MotionPrimitive, Persistence,
};
use tracing::{debug, trace};

use crate::error::HwError;

#[derive(Debug, Clone)]
pub struct SimRailCfg {
    /// End-stops sit at 0 and `rail_length_mm` (physical frame).
    pub rail_length_mm: f32,
    pub start_position_mm: f32,
    /// The home switch reads triggered at or below this physical position.
    pub home_switch_mm: f32,
    pub idle_current_amps: f32,
    pub moving_current_amps: f32,
    pub stall_current_amps: f32,
    pub supply_volts: f32,
    pub amps_per_count: f32,
    pub current_offset_counts: f32,
    pub volts_per_count: f32,
    pub raw_max: u16,
}

impl Default for SimRailCfg {
    fn default() -> Self {
        Self {
            rail_length_mm: 200.0,
            start_position_mm: 20.0,
            home_switch_mm: 2.0,
            idle_current_amps: 0.2,
            moving_current_amps: 0.6,
            stall_current_amps: 2.5,
            supply_volts: 24.0,
            amps_per_count: 0.005,
            current_offset_counts: 0.0,
            volts_per_count: 0.0125,
            raw_max: 4095,
        }
    }
}

#[derive(Debug)]
struct RailState {
    cfg: SimRailCfg,
    physical_mm: f32,
    /// Physical position of register zero.
    origin_mm: f32,
    target_mm: Option<f32>,
    speed: f32,
    accel: f32,
    last: Instant,
    stalled: bool,
    extra_amps: f32,
    supply_volts: f32,
    speed_raw: u16,
    fail_current: bool,
    fail_moves: bool,
    moves: u64,
}

impl RailState {
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last).as_secs_f32();
        self.last = now;
        let len = self.cfg.rail_length_mm;
        if let Some(target) = self.target_mm {
            let remaining = target - self.physical_mm;
            let step = self.speed * dt;
            let next = if remaining.abs() <= step {
                target
            } else {
                self.physical_mm + step * remaining.signum()
            };
            self.physical_mm = next.clamp(0.0, len);
            if self.physical_mm == target {
                self.target_mm = None;
            }
        }
        self.stalled = self.target_mm.is_some_and(|t| {
            (self.physical_mm <= 0.0 && t < 0.0) || (self.physical_mm >= len && t > len)
        });
    }

    fn current_amps(&self) -> f32 {
        let base = if self.stalled {
            self.cfg.stall_current_amps
        } else if self.target_mm.is_some() {
            self.cfg.moving_current_amps
        } else {
            self.cfg.idle_current_amps
        };
        base + self.extra_amps
    }

    fn to_counts(&self, value: f32, per_count: f32, offset: f32) -> u16 {
        let counts = value / per_count + offset;
        counts.round().clamp(0.0, f32::from(self.cfg.raw_max)) as u16
    }
}

/// Shared handle on the simulated rail; cheap to clone.
#[derive(Clone)]
pub struct SimRail {
    state: Rc<RefCell<RailState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl std::fmt::Debug for SimRail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.borrow();
        f.debug_struct("SimRail")
            .field("physical_mm", &s.physical_mm)
            .field("target_mm", &s.target_mm)
            .field("stalled", &s.stalled)
            .finish_non_exhaustive()
    }
}

impl SimRail {
    pub fn new(cfg: SimRailCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let start = cfg.start_position_mm.clamp(0.0, cfg.rail_length_mm);
        let state = RailState {
            supply_volts: cfg.supply_volts,
            cfg,
            physical_mm: start,
            origin_mm: start,
            target_mm: None,
            speed: 0.0,
            accel: 0.0,
            last: clock.now(),
            stalled: false,
            extra_amps: 0.0,
            speed_raw: 0,
            fail_current: false,
            fail_moves: false,
            moves: 0,
        };
        Self {
            state: Rc::new(RefCell::new(state)),
            clock,
        }
    }

    fn sync(&self) -> std::cell::RefMut<'_, RailState> {
        let mut s = self.state.borrow_mut();
        s.advance(self.clock.now());
        s
    }

    pub fn actuator(&self) -> SimActuator {
        SimActuator(self.clone())
    }

    pub fn sensors(&self) -> SimSensors {
        SimSensors(self.clone())
    }

    pub fn home_switch(&self) -> SimHomeSwitch {
        SimHomeSwitch(self.clone())
    }

    pub fn physical_position_mm(&self) -> f32 {
        self.sync().physical_mm
    }

    pub fn is_stalled(&self) -> bool {
        self.sync().stalled
    }

    /// Number of accepted `move_to` calls.
    pub fn moves(&self) -> u64 {
        self.state.borrow().moves
    }

    /// Current drawn on top of the modelled load, e.g. to inject a spike.
    pub fn set_extra_current(&self, amps: f32) {
        self.state.borrow_mut().extra_amps = amps;
    }

    pub fn set_supply_volts(&self, volts: f32) {
        self.state.borrow_mut().supply_volts = volts;
    }

    /// Raw reading of the speed potentiometer.
    pub fn set_speed_raw(&self, raw: u16) {
        self.state.borrow_mut().speed_raw = raw;
    }

    pub fn fail_current_sense(&self, fail: bool) {
        self.state.borrow_mut().fail_current = fail;
    }

    pub fn fail_moves(&self, fail: bool) {
        self.state.borrow_mut().fail_moves = fail;
    }
}

/// Stepper and driver on the simulated rail.
#[derive(Debug, Clone)]
pub struct SimActuator(SimRail);

impl MotionPrimitive for SimActuator {
    fn move_to(
        &mut self,
        position_mm: f32,
        speed_mm_per_s: f32,
        accel_mm_per_s2: f32,
    ) -> Result<(), BoxError> {
        if !(position_mm.is_finite() && speed_mm_per_s > 0.0 && accel_mm_per_s2 > 0.0) {
            return Err(Box::new(HwError::InvalidParam(format!(
                "move to {position_mm} mm at {speed_mm_per_s} mm/s, {accel_mm_per_s2} mm/s²"
            ))));
        }
        let mut s = self.0.sync();
        if s.fail_moves {
            return Err(Box::new(HwError::Unavailable("step driver fault".into())));
        }
        let target = position_mm + s.origin_mm;
        trace!(register_mm = position_mm, physical_mm = target, speed_mm_per_s, "sim move");
        s.target_mm = Some(target);
        s.speed = speed_mm_per_s;
        s.accel = accel_mm_per_s2;
        s.moves += 1;
        Ok(())
    }

    fn current_position_mm(&self) -> f32 {
        let s = self.0.sync();
        s.physical_mm - s.origin_mm
    }

    fn is_moving(&self) -> bool {
        self.0.sync().target_mm.is_some()
    }

    fn stop(&mut self, decelerate: bool) -> Result<(), BoxError> {
        let mut s = self.0.sync();
        let Some(target) = s.target_mm else {
            return Ok(());
        };
        if decelerate && s.speed > 0.0 && s.accel > 0.0 {
            let remaining = target - s.physical_mm;
            let coast = (s.speed * s.speed / (2.0 * s.accel)).min(remaining.abs());
            let end = (s.physical_mm + coast * remaining.signum()).clamp(0.0, s.cfg.rail_length_mm);
            debug!(coast_mm = coast, "sim decelerated stop");
            s.target_mm = Some(end);
            s.advance(self.0.clock.now());
        } else {
            debug!("sim abrupt stop");
            s.target_mm = None;
            s.stalled = false;
        }
        Ok(())
    }

    fn set_current_position_mm(&mut self, position_mm: f32) -> Result<(), BoxError> {
        let mut s = self.0.sync();
        if s.target_mm.is_some() {
            return Err(Box::new(HwError::InvalidParam(
                "cannot set the position register while moving".into(),
            )));
        }
        s.origin_mm = s.physical_mm - position_mm;
        Ok(())
    }
}

/// ADC channels of the simulated board.
#[derive(Debug, Clone)]
pub struct SimSensors(SimRail);

impl AnalogInput for SimSensors {
    fn read_raw(&mut self, channel: AnalogChannel) -> Result<u16, BoxError> {
        let s = self.0.sync();
        match channel {
            AnalogChannel::Speed => Ok(s.speed_raw),
            AnalogChannel::Current => {
                if s.fail_current {
                    return Err(Box::new(HwError::Unavailable("current sense".into())));
                }
                Ok(s.to_counts(
                    s.current_amps(),
                    s.cfg.amps_per_count,
                    s.cfg.current_offset_counts,
                ))
            }
            AnalogChannel::Voltage => Ok(s.to_counts(s.supply_volts, s.cfg.volts_per_count, 0.0)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimHomeSwitch(SimRail);

impl HomeSensor for SimHomeSwitch {
    fn is_triggered(&mut self) -> Result<bool, BoxError> {
        let s = self.0.sync();
        Ok(s.physical_mm <= s.cfg.home_switch_mm)
    }
}

/// Rotary encoder; `turn` queues pulses for the next `take_delta`.
#[derive(Debug, Clone, Default)]
pub struct SimKnob(Rc<Cell<i32>>);

impl SimKnob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn(&self, pulses: i32) {
        self.0.set(self.0.get().saturating_add(pulses));
    }
}

impl EncoderInput for SimKnob {
    fn take_delta(&mut self) -> Result<i32, BoxError> {
        Ok(self.0.replace(0))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimButton(Rc<Cell<bool>>);

impl SimButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.0.set(true);
    }

    pub fn release(&self) {
        self.0.set(false);
    }
}

impl ButtonInput for SimButton {
    fn is_pressed(&mut self) -> Result<bool, BoxError> {
        Ok(self.0.get())
    }
}

/// Records every force value pushed to the driver.
#[derive(Debug, Clone, Default)]
pub struct SimForceLimiter {
    history: Rc<RefCell<Vec<i32>>>,
    fail: Rc<Cell<bool>>,
}

impl SimForceLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<i32> {
        self.history.borrow().last().copied()
    }

    pub fn history(&self) -> Vec<i32> {
        self.history.borrow().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.set(fail);
    }
}

impl ForceLimiter for SimForceLimiter {
    fn set_force(&mut self, force: i32) -> Result<(), BoxError> {
        if self.fail.get() {
            return Err(Box::new(HwError::Unavailable("force limiter".into())));
        }
        self.history.borrow_mut().push(force);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Stored {
    calibration: Option<CalibrationRecord>,
    life_stats: Option<LifeStatsRecord>,
    fail: bool,
}

/// In-memory settings store; clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Rc<RefCell<Stored>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calibration(self, record: CalibrationRecord) -> Self {
        self.0.borrow_mut().calibration = Some(record);
        self
    }

    pub fn calibration(&self) -> Option<CalibrationRecord> {
        self.0.borrow().calibration
    }

    pub fn life_stats(&self) -> Option<LifeStatsRecord> {
        self.0.borrow().life_stats
    }

    pub fn set_failing(&self, fail: bool) {
        self.0.borrow_mut().fail = fail;
    }

    fn check(&self) -> Result<(), BoxError> {
        if self.0.borrow().fail {
            return Err(Box::new(HwError::Unavailable("settings store".into())));
        }
        Ok(())
    }
}

impl Persistence for MemoryStore {
    fn load_calibration(&mut self) -> Result<Option<CalibrationRecord>, BoxError> {
        self.check()?;
        Ok(self.0.borrow().calibration)
    }

    fn save_calibration(&mut self, record: &CalibrationRecord) -> Result<(), BoxError> {
        self.check()?;
        self.0.borrow_mut().calibration = Some(*record);
        Ok(())
    }

    fn load_life_stats(&mut self) -> Result<Option<LifeStatsRecord>, BoxError> {
        self.check()?;
        Ok(self.0.borrow().life_stats)
    }

    fn save_life_stats(&mut self, record: &LifeStatsRecord) -> Result<(), BoxError> {
        self.check()?;
        self.0.borrow_mut().life_stats = Some(*record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stroker_traits::ManualClock;

    fn rail(start: f32) -> (SimRail, ManualClock) {
        let clock = ManualClock::new();
        let cfg = SimRailCfg {
            start_position_mm: start,
            ..SimRailCfg::default()
        };
        (SimRail::new(cfg, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn moves_at_constant_speed_and_lands() {
        let (rail, clock) = rail(20.0);
        let mut act = rail.actuator();
        act.move_to(30.0, 100.0, 1000.0).unwrap();
        clock.advance(Duration::from_millis(100));
        assert!((act.current_position_mm() - 10.0).abs() < 1e-3);
        assert!(act.is_moving());
        clock.advance(Duration::from_millis(250));
        assert_eq!(act.current_position_mm(), 30.0);
        assert!(!act.is_moving());
    }

    #[test]
    fn end_stop_stalls_and_draws_stall_current() {
        let (rail, clock) = rail(5.0);
        let mut act = rail.actuator();
        let mut adc = rail.sensors();
        act.move_to(-50.0, 50.0, 1000.0).unwrap();
        clock.advance(Duration::from_millis(500));
        assert_eq!(rail.physical_position_mm(), 0.0);
        assert!(rail.is_stalled());
        // 2.5 A at 5 mA per count
        assert_eq!(adc.read_raw(AnalogChannel::Current).unwrap(), 500);
        act.stop(false).unwrap();
        assert_eq!(adc.read_raw(AnalogChannel::Current).unwrap(), 40);
    }

    #[test]
    fn decelerated_stop_coasts() {
        let (rail, _clock) = rail(0.0);
        let mut act = rail.actuator();
        act.move_to(100.0, 100.0, 1000.0).unwrap();
        act.stop(true).unwrap();
        // v²/2a = 5 mm
        assert!(act.is_moving());
        assert_eq!(rail.state.borrow().target_mm, Some(5.0));
    }

    #[test]
    fn register_zero_is_relative_to_the_rail() {
        let (rail, _clock) = rail(40.0);
        let mut act = rail.actuator();
        act.set_current_position_mm(0.0).unwrap();
        assert_eq!(act.current_position_mm(), 0.0);
        act.move_to(-100.0, 1.0, 1.0).unwrap();
        assert!(act.set_current_position_mm(0.0).is_err());
    }

    #[test]
    fn home_switch_closes_near_the_stop() {
        let (rail, clock) = rail(10.0);
        let mut sw = rail.home_switch();
        assert!(!sw.is_triggered().unwrap());
        rail.actuator().move_to(-9.0, 100.0, 1000.0).unwrap();
        clock.advance(Duration::from_secs(1));
        assert!(sw.is_triggered().unwrap());
    }

    #[test]
    fn rejects_invalid_moves_and_injected_faults() {
        let (rail, _clock) = rail(10.0);
        let mut act = rail.actuator();
        let err = act.move_to(f32::NAN, 10.0, 10.0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HwError>(),
            Some(HwError::InvalidParam(_))
        ));
        rail.fail_moves(true);
        let err = act.move_to(1.0, 10.0, 10.0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HwError>(),
            Some(HwError::Unavailable(_))
        ));
    }

    #[test]
    fn knob_button_and_store_handles_share_state() {
        let knob = SimKnob::new();
        let mut enc = knob.clone();
        knob.turn(3);
        knob.turn(-1);
        assert_eq!(enc.take_delta().unwrap(), 2);
        assert_eq!(enc.take_delta().unwrap(), 0);

        let button = SimButton::new();
        let mut input = button.clone();
        button.press();
        assert!(input.is_pressed().unwrap());

        let store = MemoryStore::new();
        let mut writer = store.clone();
        writer
            .save_life_stats(&LifeStatsRecord {
                number_strokes: 4,
                ..LifeStatsRecord::default()
            })
            .unwrap();
        assert_eq!(store.life_stats().map(|r| r.number_strokes), Some(4));
        store.set_failing(true);
        assert!(writer.load_calibration().is_err());
    }
}
