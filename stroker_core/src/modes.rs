//! Run mode, knob mode and the operator parameter set.
//!
//! `ModeState` is the single writer of `ParameterSet`: local knob input, the
//! speed potentiometer and staged remote writes all land here.

use tracing::{debug, info};

use crate::error::ControlError;
use crate::util::clamp_pct;

pub const RUN_MODE_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    SimplePenetration,
    StrokeEnginePattern,
}

impl RunMode {
    pub fn index(self) -> usize {
        match self {
            Self::SimplePenetration => 0,
            Self::StrokeEnginePattern => 1,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index % RUN_MODE_COUNT {
            0 => Self::SimplePenetration,
            _ => Self::StrokeEnginePattern,
        }
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SimplePenetration => "simple",
            Self::StrokeEnginePattern => "pattern",
        }
    }
}

/// Which parameter the encoder knob is currently editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnobMode {
    Stroke,
    Depth,
    Sensation,
    Pattern,
    Force,
}

impl KnobMode {
    pub const ALL: [KnobMode; 5] = [
        Self::Stroke,
        Self::Depth,
        Self::Sensation,
        Self::Pattern,
        Self::Force,
    ];

    fn position(self) -> usize {
        match self {
            Self::Stroke => 0,
            Self::Depth => 1,
            Self::Sensation => 2,
            Self::Pattern => 3,
            Self::Force => 4,
        }
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self::ALL[(self.position() + 1) % Self::ALL.len()]
    }

    #[must_use]
    pub fn prev(self) -> Self {
        Self::ALL[(self.position() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    /// Parameter edited in this mode; `None` for pattern selection.
    pub fn parameter(self) -> Option<Parameter> {
        match self {
            Self::Stroke => Some(Parameter::Stroke),
            Self::Depth => Some(Parameter::Depth),
            Self::Sensation => Some(Parameter::Sensation),
            Self::Pattern => None,
            Self::Force => Some(Parameter::Force),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Speed,
    Depth,
    Stroke,
    Sensation,
    Force,
}

impl Parameter {
    pub fn name(self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Depth => "depth",
            Self::Stroke => "stroke",
            Self::Sensation => "sensation",
            Self::Force => "force",
        }
    }
}

impl std::str::FromStr for Parameter {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "speed" => Ok(Self::Speed),
            "depth" => Ok(Self::Depth),
            "stroke" => Ok(Self::Stroke),
            "sensation" => Ok(Self::Sensation),
            "force" => Ok(Self::Force),
            other => Err(ControlError::InvalidParameter(format!(
                "unknown parameter {other:?}"
            ))),
        }
    }
}

/// Operator percentages (0-100) plus the selected pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSet {
    pub speed: f32,
    pub depth: f32,
    pub stroke: f32,
    pub sensation: f32,
    pub force: f32,
    pub pattern: usize,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            speed: 0.0,
            depth: 100.0,
            stroke: 10.0,
            sensation: 86.0,
            force: 40.0,
            pattern: 0,
        }
    }
}

impl ParameterSet {
    pub fn get(&self, p: Parameter) -> f32 {
        match p {
            Parameter::Speed => self.speed,
            Parameter::Depth => self.depth,
            Parameter::Stroke => self.stroke,
            Parameter::Sensation => self.sensation,
            Parameter::Force => self.force,
        }
    }

    fn slot(&mut self, p: Parameter) -> &mut f32 {
        match p {
            Parameter::Speed => &mut self.speed,
            Parameter::Depth => &mut self.depth,
            Parameter::Stroke => &mut self.stroke,
            Parameter::Sensation => &mut self.sensation,
            Parameter::Force => &mut self.force,
        }
    }
}

/// Mode & parameter state machine.
#[derive(Debug, Clone)]
pub struct ModeState {
    run_mode: RunMode,
    knob_mode: KnobMode,
    params: ParameterSet,
    mode_changed: bool,
    pattern_count: usize,
    deadzone: f32,
}

impl ModeState {
    pub fn new(run_mode: RunMode, pattern_count: usize, deadzone: f32) -> Self {
        Self {
            run_mode,
            knob_mode: KnobMode::Stroke,
            params: ParameterSet::default(),
            mode_changed: false,
            pattern_count,
            deadzone,
        }
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn knob_mode(&self) -> KnobMode {
        self.knob_mode
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    pub fn deadzone(&self) -> f32 {
        self.deadzone
    }

    pub fn set_deadzone(&mut self, deadzone: f32) {
        self.deadzone = deadzone.max(0.0);
    }

    /// Advance to the next run mode (wrapping) and flag the change.
    pub fn cycle_run_mode(&mut self) -> RunMode {
        self.set_run_mode(self.run_mode.next());
        self.run_mode
    }

    pub fn set_run_mode(&mut self, mode: RunMode) {
        if mode == self.run_mode {
            return;
        }
        info!(from = self.run_mode.name(), to = mode.name(), "run mode changed");
        self.run_mode = mode;
        self.mode_changed = true;
    }

    /// Returns and clears the pending run-mode change flag.
    pub fn take_mode_changed(&mut self) -> bool {
        std::mem::take(&mut self.mode_changed)
    }

    pub fn next_knob_mode(&mut self) -> KnobMode {
        self.knob_mode = self.knob_mode.next();
        debug!(knob = ?self.knob_mode, "knob mode");
        self.knob_mode
    }

    pub fn prev_knob_mode(&mut self) -> KnobMode {
        self.knob_mode = self.knob_mode.prev();
        debug!(knob = ?self.knob_mode, "knob mode");
        self.knob_mode
    }

    pub fn set_knob_mode(&mut self, mode: KnobMode) {
        self.knob_mode = mode;
    }

    fn write_with_deadzone(&mut self, p: Parameter, pct: f32) -> bool {
        let pct = clamp_pct(pct);
        let slot = self.params.slot(p);
        if (pct - *slot).abs() < self.deadzone {
            return false;
        }
        *slot = pct;
        true
    }

    /// Knob input for the selected field. Returns whether a value changed.
    ///
    /// No-op in pattern knob mode and for changes smaller than the deadzone.
    pub fn apply_knob_input(&mut self, pct: f32) -> bool {
        match self.knob_mode.parameter() {
            Some(p) => self.write_with_deadzone(p, pct),
            None => false,
        }
    }

    /// Speed potentiometer input, subject to the same deadzone.
    pub fn apply_speed_input(&mut self, pct: f32) -> bool {
        self.write_with_deadzone(Parameter::Speed, pct)
    }

    /// Move the pattern index by `step` (sign only), wrapping over the pattern count.
    pub fn change_pattern(&mut self, step: i32) -> usize {
        let count = self.pattern_count;
        if count == 0 {
            self.params.pattern = 0;
            return 0;
        }
        let current = self.params.pattern.min(count - 1);
        self.params.pattern = match step.signum() {
            1 => (current + 1) % count,
            -1 => (current + count - 1) % count,
            _ => current,
        };
        if step != 0 {
            debug!(pattern = self.params.pattern, "pattern changed");
        }
        self.params.pattern
    }

    /// Direct write (remote control): clamped, no deadzone.
    pub fn set_parameter(&mut self, p: Parameter, value: f32) {
        *self.params.slot(p) = clamp_pct(value);
    }

    /// Select a pattern by index; out-of-range indices clamp to the last pattern.
    pub fn select_pattern(&mut self, index: usize) -> usize {
        self.params.pattern = index.min(self.pattern_count.saturating_sub(1));
        self.params.pattern
    }

    pub fn set_pattern_count(&mut self, count: usize) {
        self.pattern_count = count;
        self.params.pattern = self.params.pattern.min(count.saturating_sub(1));
    }

    /// Explicit validation: reports values the setters would have clamped.
    pub fn validate_parameter(p: Parameter, value: f32) -> Result<(), ControlError> {
        if value.is_finite() && (0.0..=100.0).contains(&value) {
            Ok(())
        } else {
            Err(ControlError::InvalidParameter(format!(
                "{} must be within 0..=100 (got {value})",
                p.name()
            )))
        }
    }

    pub fn validate_pattern(&self, index: usize) -> Result<(), ControlError> {
        if index < self.pattern_count {
            Ok(())
        } else {
            Err(ControlError::InvalidParameter(format!(
                "pattern {index} out of range (have {})",
                self.pattern_count
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn state() -> ModeState {
        ModeState::new(RunMode::SimplePenetration, 4, 1.0)
    }

    #[test]
    fn defaults_match_device_power_on() {
        let p = ParameterSet::default();
        assert_eq!(
            (p.speed, p.depth, p.stroke, p.sensation, p.force, p.pattern),
            (0.0, 100.0, 10.0, 86.0, 40.0, 0)
        );
    }

    #[test]
    fn run_mode_cycles_and_flags_change() {
        let mut m = state();
        assert!(!m.take_mode_changed());
        assert_eq!(m.cycle_run_mode(), RunMode::StrokeEnginePattern);
        assert!(m.take_mode_changed());
        assert!(!m.take_mode_changed());
        assert_eq!(m.cycle_run_mode(), RunMode::SimplePenetration);
        m.set_run_mode(RunMode::SimplePenetration);
        assert!(m.take_mode_changed());
        assert!(!m.take_mode_changed());
    }

    #[test]
    fn knob_mode_wraps_both_ways() {
        assert_eq!(KnobMode::Force.next(), KnobMode::Stroke);
        assert_eq!(KnobMode::Stroke.prev(), KnobMode::Force);
        let mut m = state();
        for _ in 0..KnobMode::ALL.len() {
            m.next_knob_mode();
        }
        assert_eq!(m.knob_mode(), KnobMode::Stroke);
    }

    #[test]
    fn knob_mode_change_leaves_parameters_alone() {
        let mut m = state();
        let before = *m.params();
        m.next_knob_mode();
        m.prev_knob_mode();
        m.next_knob_mode();
        assert_eq!(*m.params(), before);
        assert!(m.apply_knob_input(55.0));
        assert_eq!(m.params().depth, 55.0);
        assert_eq!(m.params().stroke, before.stroke);
    }

    #[rstest]
    #[case(10.5, false)]
    #[case(9.2, false)]
    #[case(11.0, true)]
    #[case(8.9, true)]
    fn deadzone_gates_knob_writes(#[case] input: f32, #[case] changed: bool) {
        let mut m = state();
        assert_eq!(m.apply_knob_input(input), changed);
        let expect = if changed { input } else { 10.0 };
        assert_eq!(m.params().stroke, expect);
    }

    #[test]
    fn speed_uses_the_same_deadzone_and_clamps() {
        let mut m = state();
        assert!(!m.apply_speed_input(0.5));
        assert!(m.apply_speed_input(250.0));
        assert_eq!(m.params().speed, 100.0);
    }

    #[test]
    fn pattern_knob_writes_nothing() {
        let mut m = state();
        m.set_knob_mode(KnobMode::Pattern);
        let before = *m.params();
        assert!(!m.apply_knob_input(70.0));
        assert_eq!(*m.params(), before);
    }

    #[test]
    fn pattern_change_wraps_circularly() {
        let mut m = state();
        assert_eq!(m.change_pattern(-1), 3);
        assert_eq!(m.change_pattern(1), 0);
        m.select_pattern(3);
        assert_eq!(m.change_pattern(1), 0);
        assert_eq!(m.change_pattern(0), 0);
        assert_eq!(m.change_pattern(5), 1);
    }

    #[test]
    fn pattern_selection_clamps_and_validates() {
        let mut m = state();
        assert_eq!(m.select_pattern(17), 3);
        assert!(m.validate_pattern(3).is_ok());
        assert!(matches!(
            m.validate_pattern(4),
            Err(ControlError::InvalidParameter(_))
        ));
        m.set_pattern_count(2);
        assert_eq!(m.params().pattern, 1);
    }

    #[test]
    fn no_patterns_keeps_index_at_zero() {
        let mut m = ModeState::new(RunMode::SimplePenetration, 0, 1.0);
        assert_eq!(m.change_pattern(1), 0);
        assert_eq!(m.change_pattern(-1), 0);
    }

    #[test]
    fn explicit_validation_surfaces_invalid_parameter() {
        assert!(ModeState::validate_parameter(Parameter::Depth, 100.0).is_ok());
        assert!(ModeState::validate_parameter(Parameter::Depth, 100.5).is_err());
        assert!(ModeState::validate_parameter(Parameter::Speed, f32::NAN).is_err());
        let mut m = state();
        m.set_parameter(Parameter::Force, -3.0);
        assert_eq!(m.params().force, 0.0);
    }

    #[test]
    fn parameter_names_parse() {
        assert_eq!("Depth".parse::<Parameter>().unwrap(), Parameter::Depth);
        assert!("pattern".parse::<Parameter>().is_err());
    }
}
