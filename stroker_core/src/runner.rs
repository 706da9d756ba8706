//! Blocking drivers around `Controller::tick`: homing to completion and a
//! bounded motion session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use stroker_traits::{MotionPrimitive, PatternSource};
use tracing::{info, warn};

use crate::controller::{Controller, ControllerSnapshot, TickStatus};
use crate::error::{ControlError, Result};
use crate::homing::{HomingOutcome, HomingState};

/// Options for `home`.
#[derive(Debug, Clone)]
pub struct HomeOptions {
    /// Wall-clock bound on the whole procedure, on the controller's clock.
    pub timeout: Duration,
    pub shutdown: Option<Arc<AtomicBool>>,
}

impl Default for HomeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            shutdown: None,
        }
    }
}

/// Options for `run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop after this long; `None` runs until shutdown or `max_ticks`.
    pub duration: Option<Duration>,
    pub max_ticks: Option<u64>,
    pub shutdown: Option<Arc<AtomicBool>>,
    pub homing: HomeOptions,
    /// Upper bound on waiting for the final decelerated stop.
    pub settle_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            duration: None,
            max_ticks: None,
            shutdown: None,
            homing: HomeOptions::default(),
            settle_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    Duration,
    TickLimit,
    Shutdown,
}

/// What a finished session reports.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub cause: StopCause,
    pub ticks: u64,
    pub elapsed: Duration,
    /// Legs completed during this session.
    pub strokes: u64,
    pub distance_m: f64,
    pub last: ControllerSnapshot,
}

fn requested(flag: Option<&Arc<AtomicBool>>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::Relaxed))
}

/// Home the axis, ticking at the configured rate until `Found` or failure.
pub fn home<M, P>(ctl: &mut Controller<M, P>, opts: &HomeOptions) -> Result<HomingOutcome>
where
    M: MotionPrimitive,
    P: PatternSource,
{
    ctl.start_homing()?;
    let clock = ctl.clock();
    let period = ctl.tick_period();
    let started = clock.now();
    loop {
        ctl.tick();
        match ctl.homing_state() {
            HomingState::Found => {
                return ctl
                    .homing_outcome()
                    .ok_or_else(|| eyre::eyre!("homing reported found without an outcome"));
            }
            HomingState::Failed => {
                if let Some(reason) = ctl.interlock() {
                    return Err(eyre::Report::new(ControlError::Interlock(reason.clone())))
                        .wrap_err("homing stopped by the safety interlock");
                }
                let why = ctl.homing_failure().unwrap_or("unknown").to_owned();
                return Err(eyre::Report::new(ControlError::HomingFailed(why)));
            }
            HomingState::Idle | HomingState::Seeking => {}
        }
        if requested(opts.shutdown.as_ref()) {
            ctl.abort_homing();
            return Err(eyre::Report::new(ControlError::HomingFailed(
                "interrupted by shutdown".into(),
            )));
        }
        if clock.now().saturating_duration_since(started) >= opts.timeout {
            ctl.abort_homing();
            return Err(eyre::Report::new(ControlError::Timeout("homing")));
        }
        clock.sleep(period);
    }
}

/// Run a motion session: home if needed, cycle until a stop condition, then
/// bring the axis to rest and save the life statistics.
///
/// A latched interlock ends the session with `ControlError::Interlock`.
pub fn run<M, P>(ctl: &mut Controller<M, P>, opts: &RunOptions) -> Result<SessionSummary>
where
    M: MotionPrimitive,
    P: PatternSource,
{
    if !ctl.is_homed() {
        let outcome = home(ctl, &opts.homing)?;
        info!(travel_mm = outcome.usable_travel_mm, "homed for session");
    }

    let clock = ctl.clock();
    let period = ctl.tick_period();
    let started = clock.now();
    let strokes_before = ctl.stats().number_strokes();
    let distance_before = ctl.stats().travelled_distance_meters();
    let mut ticks: u64 = 0;

    ctl.start_motion();
    let cause = loop {
        let status = ctl.tick();
        ticks += 1;
        match status {
            TickStatus::Interlocked => {
                if let Err(e) = ctl.save_life_stats() {
                    warn!(error = %e, "saving life stats failed");
                }
                let reason = ctl.interlock().cloned();
                return match reason {
                    Some(reason) => Err(eyre::Report::new(ControlError::Interlock(reason)))
                        .wrap_err("session stopped by the safety interlock"),
                    None => Err(eyre::eyre!("session stopped by the safety interlock")),
                };
            }
            TickStatus::HomingFailed => {
                let why = ctl.homing_failure().unwrap_or("unknown").to_owned();
                return Err(eyre::Report::new(ControlError::HomingFailed(why)));
            }
            TickStatus::NotHomed
            | TickStatus::Homing
            | TickStatus::Holding
            | TickStatus::Running => {}
        }
        if requested(opts.shutdown.as_ref()) {
            break StopCause::Shutdown;
        }
        if opts
            .duration
            .is_some_and(|d| clock.now().saturating_duration_since(started) >= d)
        {
            break StopCause::Duration;
        }
        if opts.max_ticks.is_some_and(|n| ticks >= n) {
            break StopCause::TickLimit;
        }
        clock.sleep(period);
    };

    ctl.stop_motion();
    let settle_started = clock.now();
    while ctl.is_moving()
        && clock.now().saturating_duration_since(settle_started) < opts.settle_timeout
    {
        clock.sleep(period);
        ctl.tick();
    }
    if ctl.is_moving() {
        warn!("axis still moving after the settle timeout");
    }
    if let Err(e) = ctl.save_life_stats() {
        warn!(error = %e, "saving life stats failed");
    }

    let summary = SessionSummary {
        cause,
        ticks,
        elapsed: clock.now().saturating_duration_since(started),
        strokes: ctl.stats().number_strokes() - strokes_before,
        distance_m: ctl.stats().travelled_distance_meters() - distance_before,
        last: ctl.snapshot(),
    };
    info!(
        cause = ?summary.cause,
        ticks = summary.ticks,
        strokes = summary.strokes,
        "session finished"
    );
    Ok(summary)
}
