//! File-backed settings store: `calibration.toml` and `life_stats.toml` in one
//! directory, each replaced atomically.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stroker_traits::{BoxError, CalibrationRecord, LifeStatsRecord, Persistence};
use tracing::debug;

use crate::error::{HwError, Result};

const CALIBRATION_FILE: &str = "calibration.toml";
const LIFE_STATS_FILE: &str = "life_stats.toml";

#[derive(Debug, Serialize, Deserialize)]
struct StoredCalibration {
    steps_per_revolution: f32,
    gearing_ratio: f32,
    pulley_tooth_count: f32,
    belt_pitch_mm: f32,
    max_speed_mm_per_second: f32,
    max_stroke_length_mm: f32,
    stroke_zero_offset_mm: f32,
    acceleration_scaling: f32,
    command_deadzone_percentage: f32,
}

impl From<&CalibrationRecord> for StoredCalibration {
    fn from(r: &CalibrationRecord) -> Self {
        Self {
            steps_per_revolution: r.steps_per_revolution,
            gearing_ratio: r.gearing_ratio,
            pulley_tooth_count: r.pulley_tooth_count,
            belt_pitch_mm: r.belt_pitch_mm,
            max_speed_mm_per_second: r.max_speed_mm_per_second,
            max_stroke_length_mm: r.max_stroke_length_mm,
            stroke_zero_offset_mm: r.stroke_zero_offset_mm,
            acceleration_scaling: r.acceleration_scaling,
            command_deadzone_percentage: r.command_deadzone_percentage,
        }
    }
}

impl From<StoredCalibration> for CalibrationRecord {
    fn from(s: StoredCalibration) -> Self {
        Self {
            steps_per_revolution: s.steps_per_revolution,
            gearing_ratio: s.gearing_ratio,
            pulley_tooth_count: s.pulley_tooth_count,
            belt_pitch_mm: s.belt_pitch_mm,
            max_speed_mm_per_second: s.max_speed_mm_per_second,
            max_stroke_length_mm: s.max_stroke_length_mm,
            stroke_zero_offset_mm: s.stroke_zero_offset_mm,
            acceleration_scaling: s.acceleration_scaling,
            command_deadzone_percentage: s.command_deadzone_percentage,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredLifeStats {
    travelled_distance_meters: f64,
    life_seconds_powered: f64,
    number_strokes: u64,
}

/// Write `contents` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("toml.tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&text)
            .map(Some)
            .map_err(|e| HwError::Format(format!("{}: {e}", path.display())))
    }

    fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let text = toml::to_string(value).map_err(|e| HwError::Format(e.to_string()))?;
        let path = self.dir.join(name);
        write_atomic(&path, &text)?;
        debug!(path = %path.display(), "settings written");
        Ok(())
    }
}

impl Persistence for FileStore {
    fn load_calibration(&mut self) -> std::result::Result<Option<CalibrationRecord>, BoxError> {
        Ok(self
            .load::<StoredCalibration>(CALIBRATION_FILE)?
            .map(CalibrationRecord::from))
    }

    fn save_calibration(&mut self, record: &CalibrationRecord) -> std::result::Result<(), BoxError> {
        Ok(self.save(CALIBRATION_FILE, &StoredCalibration::from(record))?)
    }

    fn load_life_stats(&mut self) -> std::result::Result<Option<LifeStatsRecord>, BoxError> {
        Ok(self
            .load::<StoredLifeStats>(LIFE_STATS_FILE)?
            .map(|s| LifeStatsRecord {
                travelled_distance_meters: s.travelled_distance_meters,
                life_seconds_powered: s.life_seconds_powered,
                number_strokes: s.number_strokes,
            }))
    }

    fn save_life_stats(&mut self, record: &LifeStatsRecord) -> std::result::Result<(), BoxError> {
        let stored = StoredLifeStats {
            travelled_distance_meters: record.travelled_distance_meters,
            life_seconds_powered: record.life_seconds_powered,
            number_strokes: record.number_strokes,
        };
        Ok(self.save(LIFE_STATS_FILE, &stored)?)
    }
}
