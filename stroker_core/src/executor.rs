//! Motion cycle executors. Exactly one is active, chosen by the run mode.
//!
//! Executors only issue a new move once the primitive reports idle, so a
//! parameter change always takes effect at the next leg. They report each
//! completed leg's length so the controller can keep the life statistics.

use stroker_traits::{BoxError, MotionPrimitive, PatternSource};
use tracing::{debug, trace};

use crate::calibration::DeviceCalibration;
use crate::modes::{ParameterSet, RunMode};

/// Legs shorter than this are not commanded.
const MIN_LEG_MM: f32 = 0.01;

/// Inputs an executor reads each step.
#[derive(Debug, Clone, Copy)]
pub struct ExecContext<'a> {
    pub params: &'a ParameterSet,
    pub calibration: &'a DeviceCalibration,
    /// Usable travel from the homed zero.
    pub travel_mm: f32,
    pub deadzone: f32,
}

impl ExecContext<'_> {
    /// `(far, near)` ends of the stroke window, both within `[0, travel]`.
    pub fn stroke_window(&self) -> (f32, f32) {
        stroke_window(self.params, self.travel_mm)
    }

    fn holding(&self) -> bool {
        self.params.speed < self.deadzone
    }
}

/// `(far, near)` ends of the stroke window for the given travel.
pub fn stroke_window(params: &ParameterSet, travel_mm: f32) -> (f32, f32) {
    let travel = travel_mm.max(0.0);
    let far = (params.depth / 100.0 * travel).clamp(0.0, travel);
    let near = (far - params.stroke / 100.0 * travel).max(0.0);
    (far, near)
}

/// Shared leg bookkeeping: start position of the move in flight and hold latch.
#[derive(Debug, Default)]
struct LegTracker {
    from_mm: Option<f32>,
    holding: bool,
}

impl LegTracker {
    /// Length of the leg that just finished, if one was in flight.
    fn finish(&mut self, pos: f32) -> Option<f32> {
        self.from_mm.take().map(|from| (pos - from).abs())
    }

    fn hold<M: MotionPrimitive + ?Sized>(&mut self, motion: &mut M) -> Result<(), BoxError> {
        if !self.holding {
            self.holding = true;
            debug!("speed below deadzone; holding position");
            motion.stop(true)?;
        }
        Ok(())
    }
}

/// Alternates between the far and near end of the stroke window.
#[derive(Debug)]
pub struct SimplePenetration {
    next_far: bool,
    leg: LegTracker,
}

impl Default for SimplePenetration {
    fn default() -> Self {
        Self {
            next_far: true,
            leg: LegTracker::default(),
        }
    }
}

impl SimplePenetration {
    pub fn step<M: MotionPrimitive + ?Sized>(
        &mut self,
        motion: &mut M,
        ctx: &ExecContext<'_>,
    ) -> Result<Option<f32>, BoxError> {
        if motion.is_moving() {
            return Ok(None);
        }
        let pos = motion.current_position_mm();
        let completed = self.leg.finish(pos);
        if ctx.holding() {
            self.leg.hold(motion)?;
            return Ok(completed);
        }
        self.leg.holding = false;

        let (far, near) = ctx.stroke_window();
        let target = if self.next_far { far } else { near };
        self.next_far = !self.next_far;
        if (target - pos).abs() < MIN_LEG_MM {
            return Ok(completed);
        }
        let speed_pct = ctx.params.speed;
        let speed = ctx.calibration.speed_for(speed_pct);
        let accel = ctx.calibration.acceleration_for(speed_pct);
        trace!(target_mm = target, speed, accel, "simple leg");
        motion.move_to(target, speed, accel)?;
        self.leg.from_mm = Some(pos);
        Ok(completed)
    }
}

/// Forwards targets from the pattern generator.
#[derive(Debug, Default)]
pub struct PatternExecutor {
    selected: Option<usize>,
    leg: LegTracker,
}

impl PatternExecutor {
    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn step<M, P>(
        &mut self,
        motion: &mut M,
        patterns: &mut P,
        ctx: &ExecContext<'_>,
    ) -> Result<Option<f32>, BoxError>
    where
        M: MotionPrimitive + ?Sized,
        P: PatternSource + ?Sized,
    {
        let wanted = ctx.params.pattern;
        if self.selected != Some(wanted) {
            patterns.select_pattern(wanted)?;
            self.selected = Some(wanted);
            debug!(
                pattern = wanted,
                name = patterns.pattern_name(wanted).unwrap_or("?"),
                "pattern selected"
            );
        }
        if motion.is_moving() {
            return Ok(None);
        }
        let pos = motion.current_position_mm();
        let completed = self.leg.finish(pos);
        if ctx.holding() {
            self.leg.hold(motion)?;
            return Ok(completed);
        }
        self.leg.holding = false;

        let (far, _) = ctx.stroke_window();
        let stroke_mm = ctx.params.stroke / 100.0 * ctx.travel_mm.max(0.0);
        let (target, full_speed) =
            patterns.next_target(stroke_mm, far, ctx.params.sensation)?;
        if !target.is_finite() || !full_speed.is_finite() {
            return Err(format!("pattern produced a non-finite target ({target}, {full_speed})").into());
        }
        let target = target.clamp(0.0, ctx.travel_mm.max(0.0));
        let speed = (full_speed * ctx.params.speed / 100.0)
            .min(ctx.calibration.max_speed_mm_per_second());
        if speed <= 0.0 || (target - pos).abs() < MIN_LEG_MM {
            return Ok(completed);
        }
        let accel = ctx.calibration.acceleration_for(ctx.params.speed);
        trace!(target_mm = target, speed, accel, "pattern leg");
        motion.move_to(target, speed, accel)?;
        self.leg.from_mm = Some(pos);
        Ok(completed)
    }
}

/// Closed set of executors.
#[derive(Debug)]
pub enum Executor {
    Simple(SimplePenetration),
    Pattern(PatternExecutor),
}

impl Executor {
    pub fn for_mode(mode: RunMode) -> Self {
        match mode {
            RunMode::SimplePenetration => Self::Simple(SimplePenetration::default()),
            RunMode::StrokeEnginePattern => Self::Pattern(PatternExecutor::default()),
        }
    }

    pub fn run_mode(&self) -> RunMode {
        match self {
            Self::Simple(_) => RunMode::SimplePenetration,
            Self::Pattern(_) => RunMode::StrokeEnginePattern,
        }
    }

    /// Issue at most one move. Returns the length of a leg completed this step.
    pub fn step<M, P>(
        &mut self,
        motion: &mut M,
        patterns: &mut P,
        ctx: &ExecContext<'_>,
    ) -> Result<Option<f32>, BoxError>
    where
        M: MotionPrimitive + ?Sized,
        P: PatternSource + ?Sized,
    {
        match self {
            Self::Simple(e) => e.step(motion, ctx),
            Self::Pattern(e) => e.step(motion, patterns, ctx),
        }
    }

    /// Forget the leg in flight and return the distance it covered up to `pos_mm`.
    pub fn abandon_leg(&mut self, pos_mm: f32) -> Option<f32> {
        match self {
            Self::Simple(e) => e.leg.finish(pos_mm),
            Self::Pattern(e) => e.leg.finish(pos_mm),
        }
    }

    /// Stop the axis and forget the leg in flight; the phase restarts on the
    /// next step.
    pub fn halt<M: MotionPrimitive + ?Sized>(
        &mut self,
        motion: &mut M,
        decelerate: bool,
    ) -> Result<(), BoxError> {
        *self = Self::for_mode(self.run_mode());
        motion.stop(decelerate)
    }
}
