//! Lifetime usage counters.

use std::time::Duration;

use stroker_traits::LifeStatsRecord;

/// Accumulated over every session and persisted periodically.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LifeStats {
    record: LifeStatsRecord,
}

impl LifeStats {
    pub fn from_record(record: LifeStatsRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> LifeStatsRecord {
        self.record
    }

    /// Count one completed leg of `length_mm`.
    pub fn add_leg(&mut self, length_mm: f32) {
        self.record.number_strokes += 1;
        self.record.travelled_distance_meters += f64::from(length_mm.abs()) / 1000.0;
    }

    /// Distance of a leg cut short; not counted as a stroke.
    pub fn add_distance(&mut self, length_mm: f32) {
        self.record.travelled_distance_meters += f64::from(length_mm.abs()) / 1000.0;
    }

    pub fn add_powered(&mut self, dt: Duration) {
        self.record.life_seconds_powered += dt.as_secs_f64();
    }

    pub fn number_strokes(&self) -> u64 {
        self.record.number_strokes
    }

    pub fn travelled_distance_meters(&self) -> f64 {
        self.record.travelled_distance_meters
    }

    pub fn life_seconds_powered(&self) -> f64 {
        self.record.life_seconds_powered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legs_and_time_accumulate() {
        let mut s = LifeStats::from_record(LifeStatsRecord {
            travelled_distance_meters: 1.0,
            life_seconds_powered: 10.0,
            number_strokes: 7,
        });
        s.add_leg(75.0);
        s.add_leg(-25.0);
        s.add_distance(50.0);
        s.add_powered(Duration::from_millis(1500));
        assert_eq!(s.number_strokes(), 9);
        assert!((s.travelled_distance_meters() - 1.15).abs() < 1e-9);
        assert!((s.life_seconds_powered() - 11.5).abs() < 1e-9);
    }
}
