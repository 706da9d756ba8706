#![no_main]
use libfuzzer_sys::fuzz_target;
use stroker_core::DeviceCalibration;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    let Ok(cfg) = stroker_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    // A config that validates must convert into runtime types without error.
    assert!(DeviceCalibration::try_from(&cfg.calibration).is_ok());
    let _: stroker_core::SafetyCfg = (&cfg.safety).into();
    let _: stroker_core::HomingCfg = (&cfg.homing).into();
    let _: stroker_core::ControlCfg = (&cfg.control).into();
});
