//! Logical axis frame: 0 at the homed zero, positive away from the home end-stop.

use stroker_traits::{BoxError, MotionPrimitive};

use crate::config::HomeDirection;

/// Register sign of the logical "deeper" direction for a homing direction.
#[inline]
pub fn travel_sign(direction: HomeDirection) -> f32 {
    -direction.sign()
}

/// View of a motion primitive in the logical frame.
///
/// Executors only ever see this view, so they never need to know which way
/// the machine homed.
pub struct Oriented<'a, M: ?Sized> {
    inner: &'a mut M,
    sign: f32,
    last_target: Option<f32>,
}

impl<'a, M: MotionPrimitive + ?Sized> Oriented<'a, M> {
    pub fn new(inner: &'a mut M, direction: HomeDirection) -> Self {
        Self {
            inner,
            sign: travel_sign(direction),
            last_target: None,
        }
    }

    /// Logical target of the last move accepted through this view.
    pub fn last_target(&self) -> Option<f32> {
        self.last_target
    }
}

impl<M: MotionPrimitive + ?Sized> MotionPrimitive for Oriented<'_, M> {
    fn move_to(
        &mut self,
        position_mm: f32,
        speed_mm_per_s: f32,
        accel_mm_per_s2: f32,
    ) -> Result<(), BoxError> {
        self.inner
            .move_to(position_mm * self.sign, speed_mm_per_s, accel_mm_per_s2)?;
        self.last_target = Some(position_mm);
        Ok(())
    }

    fn current_position_mm(&self) -> f32 {
        // +0.0 keeps a zeroed register from reading as -0.0
        self.inner.current_position_mm() * self.sign + 0.0
    }

    fn is_moving(&self) -> bool {
        self.inner.is_moving()
    }

    fn stop(&mut self, decelerate: bool) -> Result<(), BoxError> {
        self.inner.stop(decelerate)
    }

    fn set_current_position_mm(&mut self, position_mm: f32) -> Result<(), BoxError> {
        self.inner.set_current_position_mm(position_mm * self.sign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockMotion;

    #[test]
    fn forward_homing_flips_the_register() {
        let mut m = MockMotion::instant();
        {
            let mut view = Oriented::new(&mut m, HomeDirection::Forward);
            view.move_to(30.0, 10.0, 100.0).unwrap();
            assert_eq!(view.current_position_mm(), 30.0);
            assert_eq!(view.last_target(), Some(30.0));
        }
        assert_eq!(m.current_position_mm(), -30.0);
    }

    #[test]
    fn reverse_homing_is_identity() {
        let mut m = MockMotion::instant();
        let mut view = Oriented::new(&mut m, HomeDirection::Reverse);
        view.move_to(12.5, 10.0, 100.0).unwrap();
        assert_eq!(view.current_position_mm(), 12.5);
        view.set_current_position_mm(0.0).unwrap();
        assert_eq!(view.current_position_mm(), 0.0);
        assert!(view.current_position_mm().is_sign_positive());
    }
}
