//! Device calibration with the cached steps-per-millimetre factor.

use stroker_traits::CalibrationRecord;

use crate::error::ControlError;

/// Calibration constants of the actuator.
///
/// Immutable once built; replacing calibration means building a new value, so
/// `steps_per_mm` can never go stale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceCalibration {
    record: CalibrationRecord,
    steps_per_mm: f32,
}

impl Default for DeviceCalibration {
    fn default() -> Self {
        let record = CalibrationRecord {
            steps_per_revolution: 800.0,
            gearing_ratio: 1.0,
            pulley_tooth_count: 20.0,
            belt_pitch_mm: 2.0,
            max_speed_mm_per_second: 900.0,
            max_stroke_length_mm: 75.0,
            stroke_zero_offset_mm: 6.0,
            acceleration_scaling: 100.0,
            command_deadzone_percentage: 1.0,
        };
        Self {
            steps_per_mm: steps_per_mm(&record),
            record,
        }
    }
}

#[inline]
fn steps_per_mm(r: &CalibrationRecord) -> f32 {
    r.steps_per_revolution * r.gearing_ratio / (r.pulley_tooth_count * r.belt_pitch_mm)
}

impl DeviceCalibration {
    pub fn new(record: CalibrationRecord) -> Result<Self, ControlError> {
        let fields = [
            ("steps_per_revolution", record.steps_per_revolution),
            ("gearing_ratio", record.gearing_ratio),
            ("pulley_tooth_count", record.pulley_tooth_count),
            ("belt_pitch_mm", record.belt_pitch_mm),
            ("max_speed_mm_per_second", record.max_speed_mm_per_second),
            ("max_stroke_length_mm", record.max_stroke_length_mm),
            ("stroke_zero_offset_mm", record.stroke_zero_offset_mm),
            ("acceleration_scaling", record.acceleration_scaling),
            (
                "command_deadzone_percentage",
                record.command_deadzone_percentage,
            ),
        ];
        for (name, value) in fields {
            if !(value.is_finite() && value > 0.0) {
                return Err(ControlError::InvalidParameter(format!(
                    "calibration {name} must be > 0 (got {value})"
                )));
            }
        }
        Ok(Self {
            steps_per_mm: steps_per_mm(&record),
            record,
        })
    }

    pub fn record(&self) -> &CalibrationRecord {
        &self.record
    }

    pub fn steps_per_mm(&self) -> f32 {
        self.steps_per_mm
    }

    pub fn max_speed_mm_per_second(&self) -> f32 {
        self.record.max_speed_mm_per_second
    }

    pub fn max_stroke_length_mm(&self) -> f32 {
        self.record.max_stroke_length_mm
    }

    pub fn stroke_zero_offset_mm(&self) -> f32 {
        self.record.stroke_zero_offset_mm
    }

    pub fn command_deadzone_percentage(&self) -> f32 {
        self.record.command_deadzone_percentage
    }

    /// Linear speed for a 0-100 % speed setting.
    #[inline]
    pub fn speed_for(&self, speed_pct: f32) -> f32 {
        self.record.max_speed_mm_per_second * speed_pct / 100.0
    }

    /// Acceleration for a 0-100 % speed setting: quadratic in the setting so
    /// slow strokes ramp gently.
    #[inline]
    pub fn acceleration_for(&self, speed_pct: f32) -> f32 {
        self.record.max_speed_mm_per_second * speed_pct * speed_pct
            / self.record.acceleration_scaling
    }

    /// Convert millimetres to motor steps.
    #[inline]
    pub fn mm_to_steps(&self, mm: f32) -> f32 {
        mm * self.steps_per_mm
    }
}

impl TryFrom<CalibrationRecord> for DeviceCalibration {
    type Error = ControlError;

    fn try_from(record: CalibrationRecord) -> Result<Self, Self::Error> {
        Self::new(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CalibrationRecord {
        *DeviceCalibration::default().record()
    }

    #[test]
    fn steps_per_mm_includes_gearing() {
        let mut r = record();
        r.steps_per_revolution = 200.0;
        r.pulley_tooth_count = 20.0;
        r.belt_pitch_mm = 2.0;
        let cal = DeviceCalibration::new(r).unwrap();
        assert!((cal.steps_per_mm() - 5.0).abs() < 1e-6);

        r.gearing_ratio = 3.0;
        let geared = DeviceCalibration::new(r).unwrap();
        assert!((geared.steps_per_mm() - 15.0).abs() < 1e-6);
        assert!((geared.mm_to_steps(2.0) - 30.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_non_positive_and_non_finite() {
        let mut r = record();
        r.belt_pitch_mm = 0.0;
        let err = DeviceCalibration::new(r).unwrap_err();
        assert!(matches!(err, ControlError::InvalidParameter(ref m) if m.contains("belt_pitch_mm")));

        let mut r = record();
        r.max_speed_mm_per_second = f32::INFINITY;
        assert!(DeviceCalibration::try_from(r).is_err());
    }

    #[test]
    fn speed_and_acceleration_scale_with_setting() {
        let cal = DeviceCalibration::default();
        assert!((cal.speed_for(50.0) - 450.0).abs() < 1e-3);
        assert!((cal.acceleration_for(100.0) - 90_000.0).abs() < 1e-1);
        assert!((cal.acceleration_for(10.0) - 900.0).abs() < 1e-3);
        assert_eq!(cal.acceleration_for(0.0), 0.0);
    }
}
