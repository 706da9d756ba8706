//! Current/voltage supervision, force limiting and the safety interlock.

use std::time::{Duration, Instant};

use stroker_traits::{AnalogChannel, AnalogInput, ForceLimiter};
use tracing::{debug, error, info, warn};

use crate::config::SafetyCfg;
use crate::error::InterlockReason;
use crate::util::clamp_pct;

/// Availability of the torque-limiting capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceCapability {
    Present,
    Absent,
    /// A limiter was configured but failed; force values are no longer pushed.
    Degraded,
}

/// Sampled electrical state plus the interlock latch.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyState {
    pub immediate_amps: f32,
    pub average_amps: f32,
    pub supply_volts: Option<f32>,
    pub force: i32,
    pub force_capability: ForceCapability,
    pub interlock: Option<InterlockReason>,
}

/// Map a 0-100 % force setting onto the `[min, max]` force range, rounded.
#[inline]
pub fn force_value(force_pct: f32, min: f32, max: f32) -> i32 {
    (min + clamp_pct(force_pct) * (max - min) / 100.0).round() as i32
}

pub struct SafetySupervisor {
    cfg: SafetyCfg,
    state: SafetyState,
    offset_counts: f32,
    sustained_since: Option<Instant>,
    consecutive_failures: u8,
    limiter: Option<Box<dyn ForceLimiter>>,
    pushed_force: Option<i32>,
    absent_logged: bool,
}

impl core::fmt::Debug for SafetySupervisor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SafetySupervisor")
            .field("state", &self.state)
            .field("offset_counts", &self.offset_counts)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

impl SafetySupervisor {
    pub fn new(cfg: SafetyCfg, limiter: Option<Box<dyn ForceLimiter>>) -> Self {
        let force_capability = if limiter.is_some() {
            ForceCapability::Present
        } else {
            ForceCapability::Absent
        };
        Self {
            offset_counts: cfg.current_offset_counts,
            state: SafetyState {
                immediate_amps: 0.0,
                average_amps: 0.0,
                supply_volts: None,
                force: force_value(0.0, cfg.force_min, cfg.force_max),
                force_capability,
                interlock: None,
            },
            cfg,
            sustained_since: None,
            consecutive_failures: 0,
            limiter,
            pushed_force: None,
            absent_logged: false,
        }
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    pub fn interlock(&self) -> Option<&InterlockReason> {
        self.state.interlock.as_ref()
    }

    pub fn is_interlocked(&self) -> bool {
        self.state.interlock.is_some()
    }

    pub fn offset_counts(&self) -> f32 {
        self.offset_counts
    }

    fn average_counts<A: AnalogInput + ?Sized>(
        adc: &mut A,
        channel: AnalogChannel,
        samples: u8,
    ) -> Option<f32> {
        let mut sum = 0u32;
        let mut good = 0u32;
        for _ in 0..samples.max(1) {
            if let Ok(raw) = adc.read_raw(channel) {
                sum += u32::from(raw);
                good += 1;
            }
        }
        (good > 0).then(|| sum as f32 / good as f32)
    }

    /// Measure the zero-current offset. Call while the motor is idle.
    ///
    /// Returns the new offset, or `None` (offset unchanged) when no sample could
    /// be read.
    pub fn calibrate_offset<A: AnalogInput + ?Sized>(
        &mut self,
        adc: &mut A,
        samples: u8,
    ) -> Option<f32> {
        let counts = Self::average_counts(adc, AnalogChannel::Current, samples)?;
        info!(offset_counts = counts, "current sense zero offset calibrated");
        self.offset_counts = counts;
        Some(counts)
    }

    /// One averaged current reading in amps, or `None` if every sample failed.
    pub fn current_amps<A: AnalogInput + ?Sized>(&self, adc: &mut A, samples: u8) -> Option<f32> {
        let counts = Self::average_counts(adc, AnalogChannel::Current, samples)?;
        Some((counts - self.offset_counts) * self.cfg.amps_per_count)
    }

    /// Sample current and voltage, update the force value and evaluate limits.
    ///
    /// Returns the reason when this call latched the interlock.
    pub fn tick<A: AnalogInput + ?Sized>(
        &mut self,
        adc: Option<&mut A>,
        force_pct: f32,
        now: Instant,
    ) -> Option<InterlockReason> {
        self.update_force(force_pct);
        let adc = adc?;

        match self.current_amps(adc, self.cfg.current_samples) {
            Some(amps) => {
                self.consecutive_failures = 0;
                self.state.immediate_amps = amps;
                let alpha = self.cfg.ema_alpha;
                self.state.average_amps = self.state.average_amps * (1.0 - alpha) + amps * alpha;
            }
            None => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                debug!(
                    failures = self.consecutive_failures,
                    "current sense read failed"
                );
            }
        }

        let volts = Self::average_counts(adc, AnalogChannel::Voltage, 1)
            .map(|counts| counts * self.cfg.volts_per_count);
        self.state.supply_volts = volts;

        let reason = self.evaluate(now)?;
        self.trip(reason.clone()).then_some(reason)
    }

    fn evaluate(&mut self, now: Instant) -> Option<InterlockReason> {
        let cfg = &self.cfg;
        if self.consecutive_failures >= cfg.max_sensor_failures {
            return Some(InterlockReason::SensorFailure {
                count: self.consecutive_failures,
            });
        }
        if self.state.immediate_amps > cfg.overcurrent_amps {
            return Some(InterlockReason::Overcurrent {
                amps: self.state.immediate_amps,
                limit: cfg.overcurrent_amps,
            });
        }
        if self.state.average_amps > cfg.sustained_amps {
            let since = *self.sustained_since.get_or_insert(now);
            if now.saturating_duration_since(since) > Duration::from_millis(cfg.sustained_ms) {
                return Some(InterlockReason::SustainedCurrent {
                    amps: self.state.average_amps,
                    limit: cfg.sustained_amps,
                    ms: cfg.sustained_ms,
                });
            }
        } else {
            self.sustained_since = None;
        }
        if let Some(volts) = self.state.supply_volts {
            let low = cfg.min_supply_volts > 0.0 && volts < cfg.min_supply_volts;
            let high = cfg.max_supply_volts > 0.0 && volts > cfg.max_supply_volts;
            if low || high {
                return Some(InterlockReason::SupplyVoltage {
                    volts,
                    min: cfg.min_supply_volts,
                    max: cfg.max_supply_volts,
                });
            }
        }
        None
    }

    /// Latch the interlock. The first reason wins; returns false if already latched.
    pub fn trip(&mut self, reason: InterlockReason) -> bool {
        if self.state.interlock.is_some() {
            return false;
        }
        error!(%reason, "safety interlock latched");
        self.state.interlock = Some(reason);
        true
    }

    /// Explicit acknowledgment. Returns whether an interlock was cleared.
    pub fn clear_interlock(&mut self) -> bool {
        let cleared = self.state.interlock.take();
        if let Some(reason) = &cleared {
            info!(%reason, "safety interlock cleared");
            self.sustained_since = None;
            self.consecutive_failures = 0;
            self.state.average_amps = self.state.immediate_amps.min(self.cfg.sustained_amps);
        }
        cleared.is_some()
    }

    fn update_force(&mut self, force_pct: f32) {
        let force = force_value(force_pct, self.cfg.force_min, self.cfg.force_max);
        self.state.force = force;
        if self.pushed_force == Some(force) {
            return;
        }
        let Some(limiter) = self.limiter.as_mut() else {
            if !self.absent_logged {
                self.absent_logged = true;
                debug!(force, "no force limiter; force value is informational");
            }
            self.pushed_force = Some(force);
            return;
        };
        match limiter.set_force(force) {
            Ok(()) => {
                debug!(force, "force limit updated");
                self.pushed_force = Some(force);
            }
            Err(e) => {
                warn!(error = %e, "force limiter unavailable; continuing without torque limiting");
                self.limiter = None;
                self.state.force_capability = ForceCapability::Degraded;
                self.pushed_force = Some(force);
            }
        }
    }
}
