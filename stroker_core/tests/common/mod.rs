#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stroker_core::{ControlCfg, DeviceCalibration, DynController, HomingCfg, SafetyCfg};
use stroker_hardware::{
    MemoryStore, PatternLibrary, SimButton, SimForceLimiter, SimKnob, SimRail, SimRailCfg,
};
use stroker_traits::{CalibrationRecord, ManualClock};

pub const TICK: Duration = Duration::from_millis(5);

/// 200 steps/rev, 20 teeth, 2 mm pitch: 5 steps/mm; 150 mm stroke, 5 mm offset.
pub fn calibration_record() -> CalibrationRecord {
    CalibrationRecord {
        steps_per_revolution: 200.0,
        gearing_ratio: 1.0,
        pulley_tooth_count: 20.0,
        belt_pitch_mm: 2.0,
        max_speed_mm_per_second: 900.0,
        max_stroke_length_mm: 150.0,
        stroke_zero_offset_mm: 5.0,
        acceleration_scaling: 100.0,
        command_deadzone_percentage: 1.0,
    }
}

pub struct Rig {
    pub ctl: DynController,
    pub rail: SimRail,
    pub clock: ManualClock,
    pub knob: SimKnob,
    pub button: SimButton,
    pub store: MemoryStore,
    pub force: SimForceLimiter,
}

pub struct RigOpts {
    pub start_mm: f32,
    pub homing: HomingCfg,
    pub store: MemoryStore,
    pub home_switch: bool,
}

impl Default for RigOpts {
    fn default() -> Self {
        Self {
            start_mm: 40.0,
            homing: HomingCfg::default(),
            store: MemoryStore::new(),
            home_switch: false,
        }
    }
}

pub fn rig(opts: RigOpts) -> Rig {
    let clock = ManualClock::new();
    let rail = SimRail::new(
        SimRailCfg {
            start_position_mm: opts.start_mm,
            ..SimRailCfg::default()
        },
        Arc::new(clock.clone()),
    );
    let knob = SimKnob::new();
    let button = SimButton::new();
    let force = SimForceLimiter::new();
    let mut builder = DynController::builder()
        .with_motion(rail.actuator())
        .with_patterns(PatternLibrary::new(400.0))
        .with_analog(rail.sensors())
        .with_encoder(knob.clone())
        .with_button(button.clone())
        .with_force_limiter(force.clone())
        .with_persistence(opts.store.clone())
        .with_clock(Box::new(clock.clone()))
        .with_calibration(DeviceCalibration::new(calibration_record()).unwrap())
        .with_safety(SafetyCfg::default())
        .with_homing(opts.homing)
        .with_control(ControlCfg {
            life_stats_save_ms: 1_000,
            ..ControlCfg::default()
        });
    if opts.home_switch {
        builder = builder.with_home_sensor(rail.home_switch());
    }
    let ctl = builder.build().unwrap();
    Rig {
        ctl,
        rail,
        clock,
        knob,
        button,
        store: opts.store,
        force,
    }
}

impl Rig {
    pub fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.ctl.tick();
            self.clock.advance(TICK);
        }
    }

    /// Tick until `done` holds, at most `max` ticks. Returns whether it held.
    pub fn ticks_until(&mut self, max: usize, done: impl Fn(&DynController) -> bool) -> bool {
        for _ in 0..max {
            self.ctl.tick();
            self.clock.advance(TICK);
            if done(&self.ctl) {
                return true;
            }
        }
        false
    }

    /// Run ticks for `d` of simulated time, collecting every commanded target.
    pub fn collect_targets(&mut self, d: Duration) -> Vec<f32> {
        let n = (d.as_millis() / TICK.as_millis()) as usize;
        let mut out = Vec::new();
        let mut last = None;
        for _ in 0..n {
            self.ctl.tick();
            let t = self.ctl.motion_state().target_mm;
            if t.is_some() && t != last {
                out.extend(t);
            }
            last = t;
            self.clock.advance(TICK);
        }
        out
    }

    pub fn home(&mut self) {
        stroker_core::runner::home(&mut self.ctl, &stroker_core::HomeOptions::default()).unwrap();
    }

    /// Hold the button for `ms`, then release and let the debouncer settle.
    pub fn press(&mut self, ms: u64) {
        self.button.press();
        self.ticks((ms / 5) as usize);
        self.button.release();
        self.ticks(10);
    }
}
