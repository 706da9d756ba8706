//! In-memory collaborators for tests and benches.

use std::cell::Cell;

use stroker_traits::{BoxError, MotionPrimitive, PatternSource};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveCmd {
    pub position_mm: f32,
    pub speed_mm_per_s: f32,
    pub accel_mm_per_s2: f32,
}

/// Recording motion primitive.
///
/// With `auto_complete` every move lands instantly. Otherwise a move stays in
/// flight until `complete()` or `jump_to()` is called.
#[derive(Debug, Default)]
pub struct MockMotion {
    pub position_mm: f32,
    pub target_mm: Option<f32>,
    pub auto_complete: bool,
    pub moves: Vec<MoveCmd>,
    /// `decelerate` flag of every stop call.
    pub stops: Vec<bool>,
    pub fail_moves: bool,
    polls: Cell<u64>,
}

impl MockMotion {
    pub fn instant() -> Self {
        Self {
            auto_complete: true,
            ..Self::default()
        }
    }

    pub fn manual() -> Self {
        Self::default()
    }

    /// Land the move in flight.
    pub fn complete(&mut self) {
        if let Some(t) = self.target_mm.take() {
            self.position_mm = t;
        }
    }

    /// Move the axis without finishing the commanded move.
    pub fn jump_to(&mut self, position_mm: f32) {
        self.position_mm = position_mm;
    }

    pub fn last_move(&self) -> Option<MoveCmd> {
        self.moves.last().copied()
    }

    /// Number of `is_moving` queries so far.
    pub fn polls(&self) -> u64 {
        self.polls.get()
    }
}

impl MotionPrimitive for MockMotion {
    fn move_to(
        &mut self,
        position_mm: f32,
        speed_mm_per_s: f32,
        accel_mm_per_s2: f32,
    ) -> Result<(), BoxError> {
        if self.fail_moves {
            return Err("step generator fault".into());
        }
        self.moves.push(MoveCmd {
            position_mm,
            speed_mm_per_s,
            accel_mm_per_s2,
        });
        if self.auto_complete {
            self.position_mm = position_mm;
            self.target_mm = None;
        } else {
            self.target_mm = Some(position_mm);
        }
        Ok(())
    }

    fn current_position_mm(&self) -> f32 {
        self.position_mm
    }

    fn is_moving(&self) -> bool {
        self.polls.set(self.polls.get() + 1);
        self.target_mm.is_some()
    }

    fn stop(&mut self, decelerate: bool) -> Result<(), BoxError> {
        self.stops.push(decelerate);
        self.target_mm = None;
        Ok(())
    }

    fn set_current_position_mm(&mut self, position_mm: f32) -> Result<(), BoxError> {
        self.position_mm = position_mm;
        Ok(())
    }
}

/// Pattern source alternating between the far and near end of the window.
#[derive(Debug)]
pub struct MockPatterns {
    names: Vec<String>,
    pub selected: Option<usize>,
    pub selections: Vec<usize>,
    pub full_speed_mm_s: f32,
    pub fail: bool,
    out: bool,
}

impl MockPatterns {
    pub fn new(count: usize) -> Self {
        Self {
            names: (0..count).map(|i| format!("pattern-{i}")).collect(),
            selected: None,
            selections: Vec::new(),
            full_speed_mm_s: 100.0,
            fail: false,
            out: false,
        }
    }
}

impl PatternSource for MockPatterns {
    fn pattern_count(&self) -> usize {
        self.names.len()
    }

    fn pattern_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    fn select_pattern(&mut self, index: usize) -> Result<(), BoxError> {
        if index >= self.names.len() {
            return Err(format!("no pattern {index}").into());
        }
        self.selected = Some(index);
        self.selections.push(index);
        self.out = false;
        Ok(())
    }

    fn next_target(
        &mut self,
        stroke_mm: f32,
        depth_mm: f32,
        _sensation_pct: f32,
    ) -> Result<(f32, f32), BoxError> {
        if self.fail {
            return Err("pattern generator fault".into());
        }
        self.out = !self.out;
        let position = if self.out {
            depth_mm
        } else {
            depth_mm - stroke_mm
        };
        Ok((position, self.full_speed_mm_s))
    }
}
