use stroker_hardware::FileStore;
use stroker_hardware::error::HwError;
use stroker_traits::{CalibrationRecord, LifeStatsRecord, Persistence};

fn record() -> CalibrationRecord {
    CalibrationRecord {
        steps_per_revolution: 800.0,
        gearing_ratio: 1.0,
        pulley_tooth_count: 20.0,
        belt_pitch_mm: 2.0,
        max_speed_mm_per_second: 900.0,
        max_stroke_length_mm: 75.0,
        stroke_zero_offset_mm: 6.0,
        acceleration_scaling: 100.0,
        command_deadzone_percentage: 1.0,
    }
}

#[test]
fn empty_directory_loads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.load_calibration().unwrap(), None);
    assert_eq!(store.load_life_stats().unwrap(), None);
}

#[test]
fn saved_records_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = FileStore::open(dir.path().join("settings")).unwrap();
        store.save_calibration(&record()).unwrap();
        store
            .save_life_stats(&LifeStatsRecord {
                travelled_distance_meters: 12.5,
                life_seconds_powered: 3600.0,
                number_strokes: 4242,
            })
            .unwrap();
    }
    let mut store = FileStore::open(dir.path().join("settings")).unwrap();
    assert_eq!(store.load_calibration().unwrap(), Some(record()));
    let stats = store.load_life_stats().unwrap().unwrap();
    assert_eq!(stats.number_strokes, 4242);
    assert!(!dir.path().join("settings/life_stats.toml.tmp").exists());
}

#[test]
fn corrupt_file_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("calibration.toml"), "steps_per_revolution = [").unwrap();
    let mut store = FileStore::open(dir.path()).unwrap();
    let err = store.load_calibration().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HwError>(),
        Some(HwError::Format(_))
    ));
}
