//! Controller assembly from the config, and the session commands.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use eyre::{Result, WrapErr};
use stroker_config::{Config, HomingMethod};
use stroker_core::runner::{self, HomeOptions, RunOptions};
use stroker_core::{
    ControlError, ControllerBuilder, DynController, ExternalCommand, HomingOutcome, Parameter,
    RunMode, SessionSummary,
};
use stroker_hardware::{
    FileStore, MemoryStore, PatternLibrary, SimButton, SimForceLimiter, SimKnob, SimRail,
    SimRailCfg,
};
use stroker_traits::{Clock, ManualClock, MonotonicClock};

use crate::cli::{CliSafety, LAST_SAFETY, RtLock};
use crate::rt::setup_rt_once;

type Builder = ControllerBuilder<stroker_core::builder::Set, stroker_core::builder::Set>;

/// Operator settings for `run`, staged through the remote queue.
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub duration: Option<Duration>,
    pub mode: RunMode,
    pub speed: f32,
    pub depth: Option<f32>,
    pub stroke: Option<f32>,
    pub sensation: Option<f32>,
    pub force: Option<f32>,
    pub pattern: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct RtSettings {
    pub enabled: bool,
    pub prio: Option<i32>,
    pub lock: Option<RtLock>,
    pub cpu: Option<usize>,
}

/// What `self-check` observed after one tick.
#[derive(Debug, Clone)]
pub struct SelfCheckReport {
    pub supply_volts: Option<f32>,
    pub current_amps: f32,
    pub patterns: usize,
    pub persistent_store: bool,
    pub problems: Vec<String>,
}

fn sim_cfg(cfg: &Config) -> SimRailCfg {
    SimRailCfg {
        rail_length_mm: cfg.sim.rail_length_mm,
        start_position_mm: cfg.sim.start_position_mm,
        home_switch_mm: cfg.sim.home_switch_mm,
        idle_current_amps: cfg.sim.idle_current_amps,
        moving_current_amps: cfg.sim.moving_current_amps,
        stall_current_amps: cfg.sim.stall_current_amps,
        supply_volts: cfg.sim.supply_volts,
        amps_per_count: cfg.safety.amps_per_count,
        current_offset_counts: cfg.safety.current_offset_counts,
        volts_per_count: cfg.safety.volts_per_count,
        raw_max: cfg.input.analog_raw_max,
    }
}

#[cfg(feature = "hardware")]
fn with_inputs(b: Builder, cfg: &Config, rail: &SimRail) -> Result<Builder> {
    use stroker_hardware::gpio::{GpioButton, GpioHomeSwitch};
    let active_low = cfg.pins.active_low;
    let b = match cfg.pins.button {
        Some(pin) => b.with_button(GpioButton::new(pin, active_low).wrap_err("open button pin")?),
        None => b.with_button(SimButton::new()),
    };
    if cfg.homing.method != HomingMethod::Sensor {
        return Ok(b);
    }
    Ok(match cfg.pins.home_switch {
        Some(pin) => b.with_home_sensor(
            GpioHomeSwitch::new(pin, active_low).wrap_err("open home switch pin")?,
        ),
        None => b.with_home_sensor(rail.home_switch()),
    })
}

#[cfg(not(feature = "hardware"))]
fn with_inputs(b: Builder, cfg: &Config, rail: &SimRail) -> Result<Builder> {
    if cfg.pins.button.is_some() || cfg.pins.home_switch.is_some() {
        tracing::warn!("[pins] ignored: built without the `hardware` feature");
    }
    let b = b.with_button(SimButton::new());
    Ok(if cfg.homing.method == HomingMethod::Sensor {
        b.with_home_sensor(rail.home_switch())
    } else {
        b
    })
}

/// Assemble a controller over the simulated rail described by `[sim]`.
///
/// `fast` puts the rail and the controller on one virtual clock, so sessions
/// complete as quickly as the host can tick.
pub fn build(cfg: &Config, fast: bool) -> Result<DynController> {
    let clock: Arc<dyn Clock + Send + Sync> = if fast {
        Arc::new(ManualClock::new())
    } else {
        Arc::new(MonotonicClock::new())
    };
    let rail = SimRail::new(sim_cfg(cfg), clock.clone());
    let b = DynController::builder()
        .with_config(cfg)?
        .with_motion(rail.actuator())
        .with_patterns(PatternLibrary::new(cfg.calibration.max_speed_mm_per_second))
        .with_analog(rail.sensors())
        .with_encoder(SimKnob::new())
        .with_force_limiter(SimForceLimiter::new())
        .with_clock(Box::new(clock));
    let b = with_inputs(b, cfg, &rail)?;
    let b = match cfg.sim.store_dir.as_deref() {
        Some(dir) => b.with_persistence(FileStore::open(dir).wrap_err("open settings store")?),
        None => b.with_persistence(MemoryStore::new()),
    };
    let ctl = b.build().wrap_err("build controller")?;
    let _ = LAST_SAFETY.set(CliSafety::from(&cfg.safety));
    Ok(ctl)
}

pub fn home(
    cfg: &Config,
    fast: bool,
    timeout: Duration,
    shutdown: Arc<AtomicBool>,
) -> Result<HomingOutcome> {
    let mut ctl = build(cfg, fast)?;
    runner::home(
        &mut ctl,
        &HomeOptions {
            timeout,
            shutdown: Some(shutdown),
        },
    )
}

/// Take remote control and stage the requested settings; they apply on the
/// first tick.
fn stage(ctl: &DynController, s: &RunSettings) -> Result<()> {
    let remote = ctl.remote();
    remote.send(ExternalCommand::TakeRemoteControl)?;
    remote.set_run_mode(s.mode)?;
    remote.set_parameter(Parameter::Speed, s.speed)?;
    let optional = [
        (Parameter::Depth, s.depth),
        (Parameter::Stroke, s.stroke),
        (Parameter::Sensation, s.sensation),
        (Parameter::Force, s.force),
    ];
    for (p, v) in optional {
        if let Some(v) = v {
            remote.set_parameter(p, v)?;
        }
    }
    if let Some(index) = s.pattern {
        let count = ctl.pattern_names().len();
        if index >= count {
            return Err(ControlError::InvalidParameter(format!(
                "pattern {index} out of range (count {count})"
            ))
            .into());
        }
        remote.select_pattern(index)?;
    }
    Ok(())
}

pub fn run(
    cfg: &Config,
    fast: bool,
    settings: &RunSettings,
    rt: &RtSettings,
    shutdown: Arc<AtomicBool>,
) -> Result<SessionSummary> {
    setup_rt_once(rt.enabled, rt.prio, rt.lock.unwrap_or(RtLock::os_default()), rt.cpu);
    let mut ctl = build(cfg, fast)?;
    stage(&ctl, settings)?;
    tracing::info!(
        mode = settings.mode.name(),
        speed = settings.speed,
        "session start"
    );
    let opts = RunOptions {
        duration: settings.duration,
        shutdown: Some(shutdown.clone()),
        homing: HomeOptions {
            shutdown: Some(shutdown),
            ..HomeOptions::default()
        },
        ..RunOptions::default()
    };
    runner::run(&mut ctl, &opts)
}

pub fn pattern_names(cfg: &Config) -> Result<Vec<String>> {
    let ctl = build(cfg, true)?;
    Ok(ctl.pattern_names())
}

pub fn self_check(cfg: &Config, fast: bool) -> Result<SelfCheckReport> {
    let mut ctl = build(cfg, fast)?;
    for _ in 0..cfg.safety.current_samples.max(1) {
        ctl.tick();
    }
    let snap = ctl.snapshot();
    let mut problems = Vec::new();
    if let Some(reason) = &snap.safety.interlock {
        problems.push(format!("interlock latched: {reason}"));
    }
    if snap.safety.supply_volts.is_none() {
        problems.push("no supply voltage reading".into());
    }
    if snap.pattern_name.is_none() {
        problems.push("pattern source reports no patterns".into());
    }
    Ok(SelfCheckReport {
        supply_volts: snap.safety.supply_volts,
        current_amps: snap.safety.average_amps,
        patterns: ctl.pattern_names().len(),
        persistent_store: cfg.sim.store_dir.is_some(),
        problems,
    })
}
