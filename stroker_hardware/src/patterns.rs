//! Reference pattern library.
//!
//! Targets are in millimetres from the homed zero. `depth_mm` is the far end,
//! `stroke_mm` the window length below it. Speeds are full speed; the caller
//! scales them by the speed setting.

use stroker_traits::{BoxError, PatternSource};
use tracing::debug;

use crate::error::HwError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Plain in and out at full speed.
    SimpleStroke,
    /// Sensation above neutral slows the way out, below neutral the way in.
    TeasingPounding,
    /// Alternates full and half strokes.
    HalfNHalf,
    /// Each stroke reaches a little deeper until the full window, then restarts.
    Deeper,
}

impl PatternKind {
    pub const ALL: [Self; 4] = [
        Self::SimpleStroke,
        Self::TeasingPounding,
        Self::HalfNHalf,
        Self::Deeper,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::SimpleStroke => "Simple Stroke",
            Self::TeasingPounding => "Teasing or Pounding",
            Self::HalfNHalf => "Half'n'Half",
            Self::Deeper => "Deeper",
        }
    }
}

/// `(inward, outward)` speed factors for a sensation value. 50 is neutral.
fn speed_factors(sensation_pct: f32) -> (f32, f32) {
    let ratio = 2f32.powf((sensation_pct.clamp(0.0, 100.0) - 50.0) / 25.0);
    if ratio >= 1.0 {
        (1.0, 1.0 / ratio)
    } else {
        (ratio, 1.0)
    }
}

#[derive(Debug)]
pub struct PatternLibrary {
    full_speed_mm_s: f32,
    selected: PatternKind,
    /// Next leg goes deep.
    inward: bool,
    half: bool,
    deeper_step: u32,
}

impl PatternLibrary {
    pub fn new(full_speed_mm_s: f32) -> Self {
        Self {
            full_speed_mm_s,
            selected: PatternKind::SimpleStroke,
            inward: true,
            half: false,
            deeper_step: 0,
        }
    }

    pub fn selected(&self) -> PatternKind {
        self.selected
    }

    fn reset(&mut self) {
        self.inward = true;
        self.half = false;
        self.deeper_step = 0;
    }
}

impl PatternSource for PatternLibrary {
    fn pattern_count(&self) -> usize {
        PatternKind::ALL.len()
    }

    fn pattern_name(&self, index: usize) -> Option<&str> {
        PatternKind::ALL.get(index).map(|k| k.name())
    }

    fn select_pattern(&mut self, index: usize) -> Result<(), BoxError> {
        let kind = PatternKind::ALL.get(index).copied().ok_or_else(|| {
            HwError::InvalidParam(format!(
                "pattern {index} out of range (count {})",
                PatternKind::ALL.len()
            ))
        })?;
        debug!(pattern = kind.name(), "pattern library switched");
        self.selected = kind;
        self.reset();
        Ok(())
    }

    fn next_target(
        &mut self,
        stroke_mm: f32,
        depth_mm: f32,
        sensation_pct: f32,
    ) -> Result<(f32, f32), BoxError> {
        let far = depth_mm.max(0.0);
        let near = (far - stroke_mm.max(0.0)).max(0.0);
        let inward = self.inward;
        self.inward = !inward;
        let full = self.full_speed_mm_s;

        let target = match self.selected {
            PatternKind::SimpleStroke => {
                let pos = if inward { far } else { near };
                (pos, full)
            }
            PatternKind::TeasingPounding => {
                let (fin, fout) = speed_factors(sensation_pct);
                if inward {
                    (far, full * fin)
                } else {
                    (near, full * fout)
                }
            }
            PatternKind::HalfNHalf => {
                let (fin, fout) = speed_factors(sensation_pct);
                if inward {
                    (far, full * fin)
                } else {
                    let back = if self.half {
                        far - (far - near) / 2.0
                    } else {
                        near
                    };
                    self.half = !self.half;
                    (back, full * fout)
                }
            }
            PatternKind::Deeper => {
                // 2..=22 increments, more with higher sensation
                let steps = 2 + (sensation_pct.clamp(0.0, 100.0) / 5.0).round() as u32;
                if inward {
                    self.deeper_step = self.deeper_step % steps + 1;
                    let reach = (far - near) * self.deeper_step as f32 / steps as f32;
                    (near + reach, full)
                } else {
                    (near, full)
                }
            }
        };
        Ok(target)
    }
}
