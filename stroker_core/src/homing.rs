//! One-shot homing procedure, polled once per tick.
//!
//! `Idle -> Seeking -> Found | Failed`. While seeking the procedure runs
//! through internal phases: approach the end-stop, back off (sensorless), and
//! optionally measure the rail and return to zero. Every phase is bounded by
//! `max_distance_mm`.

use std::time::Instant;

use stroker_traits::{BoxError, MotionPrimitive};
use tracing::{debug, error, info, warn};

use crate::calibration::DeviceCalibration;
use crate::config::{HomingCfg, HomingMethod};
use crate::error::ControlError;
use crate::frame::travel_sign;
use crate::hw_error::map_hw_error;

/// Distance tolerance when checking the travel bound.
const TRAVEL_EPS_MM: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingState {
    Idle,
    Seeking,
    Found,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomingOutcome {
    /// Usable travel from the homed zero, never above the calibrated max stroke.
    pub usable_travel_mm: f32,
    /// End-stop to end-stop length, when the rail was measured.
    pub measured_travel_mm: Option<f32>,
}

/// Per-tick sensing inputs for homing.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomingSense {
    pub immediate_amps: f32,
    /// `None` when no home sensor is fitted or the read failed.
    pub sensor_triggered: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Approach { origin_mm: f32 },
    BackingOff,
    Measuring,
    Returning { measured_mm: f32 },
}

#[derive(Debug)]
pub struct Homing {
    cfg: HomingCfg,
    state: HomingState,
    phase: Option<Phase>,
    stall_since: Option<Instant>,
    outcome: Option<HomingOutcome>,
    failure: Option<String>,
}

impl Homing {
    pub fn new(cfg: HomingCfg) -> Self {
        Self {
            cfg,
            state: HomingState::Idle,
            phase: None,
            stall_since: None,
            outcome: None,
            failure: None,
        }
    }

    pub fn cfg(&self) -> &HomingCfg {
        &self.cfg
    }

    pub fn state(&self) -> HomingState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == HomingState::Seeking
    }

    pub fn outcome(&self) -> Option<HomingOutcome> {
        self.outcome
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Back to `Idle`; required before re-homing from `Found` or `Failed`.
    pub fn reset(&mut self) {
        self.state = HomingState::Idle;
        self.phase = None;
        self.stall_since = None;
        self.outcome = None;
        self.failure = None;
    }

    /// Enter `Seeking` and command the slow approach towards the end-stop.
    pub fn start<M: MotionPrimitive + ?Sized>(&mut self, motion: &mut M) -> Result<(), ControlError> {
        self.reset();
        let origin_mm = motion.current_position_mm();
        let target = origin_mm + self.cfg.direction.sign() * self.cfg.max_distance_mm;
        info!(
            method = ?self.cfg.method,
            direction = ?self.cfg.direction,
            origin_mm,
            "homing started"
        );
        self.state = HomingState::Seeking;
        if let Err(e) = self.command(motion, target) {
            let reason = format!("approach move refused: {}", map_hw_error(&*e));
            self.fail(reason.clone());
            return Err(ControlError::HomingFailed(reason));
        }
        self.phase = Some(Phase::Approach { origin_mm });
        Ok(())
    }

    /// Abort an active homing run; ends in `Failed`.
    pub fn abort<M: MotionPrimitive + ?Sized>(&mut self, motion: &mut M, why: &str) {
        if self.state != HomingState::Seeking {
            return;
        }
        if let Err(e) = motion.stop(true) {
            warn!(error = %e, "stop during homing abort failed");
        }
        self.fail(format!("aborted: {why}"));
    }

    /// Advance the procedure. Call once per tick while `Seeking`.
    pub fn poll<M: MotionPrimitive + ?Sized>(
        &mut self,
        motion: &mut M,
        cal: &DeviceCalibration,
        sense: HomingSense,
        now: Instant,
    ) -> HomingState {
        if self.state != HomingState::Seeking {
            return self.state;
        }
        let Some(phase) = self.phase else {
            self.fail("homing has no active phase".into());
            return self.state;
        };
        if let Err(e) = self.step(phase, motion, cal, sense, now) {
            self.fail(format!("motion primitive error: {}", map_hw_error(&*e)));
            if let Err(e) = motion.stop(false) {
                warn!(error = %e, "stop after homing failure failed");
            }
        }
        self.state
    }

    fn step<M: MotionPrimitive + ?Sized>(
        &mut self,
        phase: Phase,
        motion: &mut M,
        cal: &DeviceCalibration,
        sense: HomingSense,
        now: Instant,
    ) -> Result<(), BoxError> {
        let away = travel_sign(self.cfg.direction);
        let offset = cal.stroke_zero_offset_mm();
        match phase {
            Phase::Approach { origin_mm } => {
                let pos = motion.current_position_mm();
                if self.detect(sense, now) {
                    motion.stop(false)?;
                    debug!(position_mm = pos, "home end-stop detected");
                    match self.cfg.method {
                        HomingMethod::Sensor => {
                            motion.set_current_position_mm(0.0)?;
                            self.finish(cal, None);
                        }
                        HomingMethod::Sensorless => {
                            self.command(motion, pos + away * offset)?;
                            self.phase = Some(Phase::BackingOff);
                        }
                    }
                    return Ok(());
                }
                let travelled = (pos - origin_mm).abs();
                if travelled + TRAVEL_EPS_MM >= self.cfg.max_distance_mm {
                    motion.stop(false)?;
                    self.fail(format!(
                        "no end-stop within {:.1} mm",
                        self.cfg.max_distance_mm
                    ));
                } else if !motion.is_moving() {
                    self.fail(format!(
                        "approach ended after {travelled:.1} mm without detection"
                    ));
                }
            }
            Phase::BackingOff => {
                if motion.is_moving() {
                    return Ok(());
                }
                motion.set_current_position_mm(0.0)?;
                if self.cfg.measure_travel && self.cfg.method == HomingMethod::Sensorless {
                    self.stall_since = None;
                    self.command(motion, away * self.cfg.max_distance_mm)?;
                    self.phase = Some(Phase::Measuring);
                    debug!("zero set; measuring travel");
                } else {
                    self.finish(cal, None);
                }
            }
            Phase::Measuring => {
                let from_zero = motion.current_position_mm().abs();
                if self.detect(sense, now) {
                    motion.stop(false)?;
                    let measured_mm = from_zero + offset;
                    if measured_mm - 2.0 * offset <= 0.0 {
                        self.fail(format!(
                            "measured travel {measured_mm:.1} mm leaves no usable stroke"
                        ));
                        return Ok(());
                    }
                    self.command(motion, 0.0)?;
                    self.phase = Some(Phase::Returning { measured_mm });
                    return Ok(());
                }
                if from_zero + TRAVEL_EPS_MM >= self.cfg.max_distance_mm {
                    motion.stop(false)?;
                    self.fail(format!(
                        "far end-stop not found within {:.1} mm",
                        self.cfg.max_distance_mm
                    ));
                } else if !motion.is_moving() {
                    self.fail("travel measurement ended without detection".into());
                }
            }
            Phase::Returning { measured_mm } => {
                if !motion.is_moving() {
                    self.finish(cal, Some(measured_mm));
                }
            }
        }
        Ok(())
    }

    fn command<M: MotionPrimitive + ?Sized>(
        &self,
        motion: &mut M,
        target_mm: f32,
    ) -> Result<(), BoxError> {
        motion.move_to(target_mm, self.cfg.speed_mm_s, self.cfg.acceleration_mm_s2)
    }

    fn detect(&mut self, sense: HomingSense, now: Instant) -> bool {
        match self.cfg.method {
            HomingMethod::Sensor => sense.sensor_triggered.unwrap_or(false),
            HomingMethod::Sensorless => {
                if sense.immediate_amps > self.cfg.stall_current_amps {
                    let since = *self.stall_since.get_or_insert(now);
                    now.saturating_duration_since(since) >= self.cfg.stall_dwell()
                } else {
                    self.stall_since = None;
                    false
                }
            }
        }
    }

    fn finish(&mut self, cal: &DeviceCalibration, measured_travel_mm: Option<f32>) {
        let max = cal.max_stroke_length_mm();
        let usable_travel_mm = measured_travel_mm
            .map_or(max, |m| (m - 2.0 * cal.stroke_zero_offset_mm()).min(max));
        let outcome = HomingOutcome {
            usable_travel_mm,
            measured_travel_mm,
        };
        info!(usable_travel_mm, ?measured_travel_mm, "homing found zero");
        self.outcome = Some(outcome);
        self.phase = None;
        self.state = HomingState::Found;
    }

    fn fail(&mut self, reason: String) {
        error!(%reason, "homing failed");
        self.failure = Some(reason);
        self.phase = None;
        self.outcome = None;
        self.state = HomingState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HomeDirection;
    use crate::mocks::MockMotion;
    use std::time::Duration;

    fn cfg(method: HomingMethod) -> HomingCfg {
        HomingCfg {
            method,
            direction: HomeDirection::Reverse,
            speed_mm_s: 20.0,
            acceleration_mm_s2: 500.0,
            max_distance_mm: 100.0,
            stall_current_amps: 1.0,
            stall_dwell_ms: 30,
            measure_travel: false,
        }
    }

    fn amps(a: f32) -> HomingSense {
        HomingSense {
            immediate_amps: a,
            sensor_triggered: None,
        }
    }

    #[test]
    fn sensor_homing_zeroes_at_the_switch() {
        let cal = DeviceCalibration::default();
        let mut m = MockMotion::manual();
        m.position_mm = 50.0;
        let mut h = Homing::new(cfg(HomingMethod::Sensor));
        h.start(&mut m).unwrap();
        assert_eq!(m.last_move().unwrap().position_mm, -50.0);

        let now = Instant::now();
        m.jump_to(42.0);
        let open = HomingSense {
            immediate_amps: 0.0,
            sensor_triggered: Some(false),
        };
        assert_eq!(h.poll(&mut m, &cal, open, now), HomingState::Seeking);
        m.jump_to(30.0);
        let closed = HomingSense {
            sensor_triggered: Some(true),
            ..open
        };
        assert_eq!(h.poll(&mut m, &cal, closed, now), HomingState::Found);
        assert_eq!(m.current_position_mm(), 0.0);
        assert_eq!(m.stops, vec![false]);
        assert_eq!(
            h.outcome().unwrap().usable_travel_mm,
            cal.max_stroke_length_mm()
        );
    }

    #[test]
    fn stall_must_persist_for_the_dwell() {
        let cal = DeviceCalibration::default();
        let mut m = MockMotion::manual();
        let mut h = Homing::new(cfg(HomingMethod::Sensorless));
        h.start(&mut m).unwrap();
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);

        m.jump_to(-10.0);
        assert_eq!(h.poll(&mut m, &cal, amps(2.0), ms(0)), HomingState::Seeking);
        assert_eq!(h.poll(&mut m, &cal, amps(0.2), ms(20)), HomingState::Seeking);
        assert_eq!(h.poll(&mut m, &cal, amps(2.0), ms(25)), HomingState::Seeking);
        assert_eq!(h.poll(&mut m, &cal, amps(2.0), ms(50)), HomingState::Seeking);
        assert!(m.stops.is_empty());
        h.poll(&mut m, &cal, amps(2.0), ms(55));
        assert_eq!(m.stops, vec![false]);
        // Backing off away from the stop by the zero offset.
        assert_eq!(m.last_move().unwrap().position_mm, -10.0 + 6.0);
        m.complete();
        assert_eq!(h.poll(&mut m, &cal, amps(0.1), ms(60)), HomingState::Found);
        assert_eq!(m.current_position_mm(), 0.0);
    }

    #[test]
    fn gives_up_at_the_distance_bound() {
        let cal = DeviceCalibration::default();
        let mut m = MockMotion::manual();
        let mut h = Homing::new(cfg(HomingMethod::Sensorless));
        h.start(&mut m).unwrap();
        m.jump_to(-100.0);
        let state = h.poll(&mut m, &cal, amps(0.1), Instant::now());
        assert_eq!(state, HomingState::Failed);
        assert!(h.failure_reason().unwrap().contains("no end-stop"));
    }

    #[test]
    fn motion_ending_without_detection_fails() {
        let cal = DeviceCalibration::default();
        let mut m = MockMotion::manual();
        let mut h = Homing::new(cfg(HomingMethod::Sensorless));
        h.start(&mut m).unwrap();
        m.jump_to(-20.0);
        m.target_mm = None;
        assert_eq!(
            h.poll(&mut m, &cal, amps(0.1), Instant::now()),
            HomingState::Failed
        );
    }

    #[test]
    fn abort_fails_and_reset_reenters_idle() {
        let mut m = MockMotion::manual();
        let mut h = Homing::new(cfg(HomingMethod::Sensorless));
        h.start(&mut m).unwrap();
        h.abort(&mut m, "operator");
        assert_eq!(h.state(), HomingState::Failed);
        assert_eq!(m.stops, vec![true]);
        h.reset();
        assert_eq!(h.state(), HomingState::Idle);
        assert!(h.failure_reason().is_none());
    }

    #[test]
    fn refused_approach_is_reported() {
        let mut m = MockMotion::manual();
        m.fail_moves = true;
        let mut h = Homing::new(cfg(HomingMethod::Sensorless));
        let err = h.start(&mut m).unwrap_err();
        assert!(matches!(err, ControlError::HomingFailed(_)));
        assert_eq!(h.state(), HomingState::Failed);
    }

    #[test]
    fn measured_travel_shrinks_usable_stroke() {
        let cal = DeviceCalibration::default(); // max stroke 75, offset 6
        let mut m = MockMotion::manual();
        let mut h = Homing::new(HomingCfg {
            measure_travel: true,
            ..cfg(HomingMethod::Sensorless)
        });
        h.start(&mut m).unwrap();
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);

        m.jump_to(-5.0);
        h.poll(&mut m, &cal, amps(2.0), ms(0));
        h.poll(&mut m, &cal, amps(2.0), ms(40));
        m.complete();
        h.poll(&mut m, &cal, amps(0.1), ms(50));
        assert_eq!(m.current_position_mm(), 0.0);
        assert_eq!(m.last_move().unwrap().position_mm, 100.0);

        // Far stop 60 mm from zero: rail = 66, usable = 66 - 12 = 54.
        m.jump_to(60.0);
        h.poll(&mut m, &cal, amps(2.0), ms(60));
        assert_eq!(h.poll(&mut m, &cal, amps(2.0), ms(100)), HomingState::Seeking);
        assert_eq!(m.last_move().unwrap().position_mm, 0.0);
        m.complete();
        assert_eq!(h.poll(&mut m, &cal, amps(0.1), ms(110)), HomingState::Found);
        let outcome = h.outcome().unwrap();
        assert_eq!(outcome.measured_travel_mm, Some(66.0));
        assert!((outcome.usable_travel_mm - 54.0).abs() < 1e-4);
    }
}
