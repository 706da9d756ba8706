//! Operator input mapping: analog and encoder percentages, button events.
//!
//! Everything here is pure sensing. Failed reads are corrected locally (skipped
//! samples, last good value) and never surface as errors to the tick loop.

use std::time::{Duration, Instant};

use stroker_traits::{AnalogChannel, AnalogInput, ButtonInput, Clock, EncoderInput};
use tracing::{debug, trace};

use crate::config::{EncoderMode, InputCfg};
use crate::error::{ControlError, Result};
use crate::hw_error::map_hw_error;
use crate::util::clamp_pct;

/// Bound on the pattern-step accumulator so a fast spin cannot queue up many steps.
const MAX_QUEUED_PATTERN_STEPS: i64 = 4;

#[derive(Debug)]
pub struct InputMapper {
    cfg: InputCfg,
    last_analog: [f32; AnalogChannel::ALL.len()],
    encoder_count: i64,
    pattern_pulses: i64,
}

impl InputMapper {
    pub fn new(cfg: InputCfg) -> Self {
        Self {
            cfg,
            last_analog: [0.0; AnalogChannel::ALL.len()],
            encoder_count: 0,
            pattern_pulses: 0,
        }
    }

    pub fn cfg(&self) -> &InputCfg {
        &self.cfg
    }

    /// Linear rescale of a raw reading from the configured raw range to [0, 100].
    pub fn raw_to_percentage(&self, raw: f32) -> f32 {
        let min = f32::from(self.cfg.analog_raw_min);
        let span = f32::from(self.cfg.analog_raw_max) - min;
        if span <= 0.0 {
            return 0.0;
        }
        clamp_pct((raw - min) * 100.0 / span)
    }

    /// Average `samples` raw reads of `channel` and map them to a percentage.
    ///
    /// Failed samples are skipped; when every sample fails the last good value
    /// for the channel is returned.
    pub fn read_analog_percentage<A: AnalogInput + ?Sized>(
        &mut self,
        adc: &mut A,
        channel: AnalogChannel,
        samples: u8,
    ) -> f32 {
        let mut sum = 0u32;
        let mut good = 0u32;
        for _ in 0..samples.max(1) {
            match adc.read_raw(channel) {
                Ok(raw) => {
                    sum += u32::from(raw);
                    good += 1;
                }
                Err(e) => trace!(?channel, error = %e, "analog sample failed"),
            }
        }
        let slot = channel.index();
        if good == 0 {
            debug!(?channel, "all analog samples failed; holding last value");
            return self.last_analog[slot];
        }
        let pct = self.raw_to_percentage(sum as f32 / good as f32);
        self.last_analog[slot] = pct;
        pct
    }

    /// Last good percentage observed on `channel`.
    pub fn last_analog_percentage(&self, channel: AnalogChannel) -> f32 {
        self.last_analog[channel.index()]
    }

    #[inline]
    fn full_scale(&self) -> i64 {
        i64::from(self.cfg.encoder_pulses_per_full_scale.max(1))
    }

    /// Pulses since the previous poll; a failed read counts as no movement.
    pub fn poll_encoder<E: EncoderInput + ?Sized>(&mut self, enc: &mut E) -> i32 {
        match enc.take_delta() {
            Ok(delta) => delta,
            Err(e) => {
                debug!(error = %e, "encoder read failed");
                0
            }
        }
    }

    /// Fold a pulse delta into the knob count.
    ///
    /// In clamp mode the count itself is clamped, so turning back from a stop
    /// responds on the first pulse.
    pub fn apply_encoder_delta(&mut self, delta: i32) {
        let full = self.full_scale();
        let next = self.encoder_count + i64::from(delta);
        self.encoder_count = match self.cfg.encoder_mode {
            EncoderMode::Clamp => next.clamp(0, full),
            EncoderMode::Wrap => next.rem_euclid(full),
        };
    }

    pub fn encoder_percentage(&self) -> f32 {
        clamp_pct(self.encoder_count as f32 * 100.0 / self.full_scale() as f32)
    }

    pub fn read_encoder_percentage<E: EncoderInput + ?Sized>(&mut self, enc: &mut E) -> f32 {
        let delta = self.poll_encoder(enc);
        self.apply_encoder_delta(delta);
        self.encoder_percentage()
    }

    /// Reposition the knob so it reads `pct`; pending pattern pulses are dropped.
    pub fn set_encoder_percentage(&mut self, pct: f32) {
        let full = self.full_scale();
        let count = (clamp_pct(pct) / 100.0 * full as f32).round() as i64;
        self.encoder_count = count.clamp(0, full);
        self.pattern_pulses = 0;
    }

    /// Accumulate pulses into discrete pattern steps. Returns -1, 0 or +1.
    pub fn pattern_step(&mut self, delta: i32) -> i32 {
        let step = i64::from(self.cfg.pulses_per_pattern_step.max(1));
        let cap = step * MAX_QUEUED_PATTERN_STEPS;
        self.pattern_pulses = (self.pattern_pulses + i64::from(delta)).clamp(-cap, cap);
        if self.pattern_pulses >= step {
            self.pattern_pulses -= step;
            1
        } else if self.pattern_pulses <= -step {
            self.pattern_pulses += step;
            -1
        } else {
            0
        }
    }
}

/// Classified button gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Debounced press released before the long-press threshold.
    ShortPress,
    /// Held past the long-press threshold; fires once per hold.
    LongPress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Down,
    Up,
}

#[derive(Debug)]
struct Debouncer {
    debounce: Duration,
    raw: bool,
    raw_since: Option<Instant>,
    stable: bool,
}

impl Debouncer {
    fn new(debounce_ms: u64) -> Self {
        Self {
            debounce: Duration::from_millis(debounce_ms),
            raw: false,
            raw_since: None,
            stable: false,
        }
    }

    fn update(&mut self, raw: bool, now: Instant) -> Option<Edge> {
        if raw != self.raw || self.raw_since.is_none() {
            self.raw = raw;
            self.raw_since = Some(now);
        }
        if self.raw == self.stable {
            return None;
        }
        let since = self.raw_since?;
        if now.saturating_duration_since(since) < self.debounce {
            return None;
        }
        self.stable = self.raw;
        Some(if self.stable { Edge::Down } else { Edge::Up })
    }
}

/// Debounces the raw button level and classifies presses.
#[derive(Debug)]
pub struct ButtonTracker {
    debouncer: Debouncer,
    long_press: Duration,
    pressed_at: Option<Instant>,
    long_fired: bool,
}

impl ButtonTracker {
    pub fn new(debounce_ms: u64, long_press_ms: u64) -> Self {
        Self {
            debouncer: Debouncer::new(debounce_ms),
            long_press: Duration::from_millis(long_press_ms),
            pressed_at: None,
            long_fired: false,
        }
    }

    pub fn update(&mut self, raw: bool, now: Instant) -> Option<ButtonEvent> {
        match self.debouncer.update(raw, now) {
            Some(Edge::Down) => {
                self.pressed_at = Some(now);
                self.long_fired = false;
            }
            Some(Edge::Up) => {
                if self.pressed_at.take().is_some() && !self.long_fired {
                    return Some(ButtonEvent::ShortPress);
                }
            }
            None => {}
        }
        if let Some(at) = self.pressed_at
            && !self.long_fired
            && now.saturating_duration_since(at) >= self.long_press
        {
            self.long_fired = true;
            return Some(ButtonEvent::LongPress);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Pending,
    Pressed,
    TimedOut,
}

/// Deadline state machine for "wait for a button press", polled once per tick.
///
/// A press counts after a debounced press followed by a debounced release.
/// Once `Pressed` or `TimedOut` the state no longer changes.
#[derive(Debug)]
pub struct ButtonWait {
    deadline: Instant,
    debouncer: Debouncer,
    seen_down: bool,
    state: WaitState,
}

impl ButtonWait {
    pub fn new(now: Instant, timeout: Duration, debounce_ms: u64) -> Self {
        Self {
            deadline: now + timeout,
            debouncer: Debouncer::new(debounce_ms),
            seen_down: false,
            state: WaitState::Pending,
        }
    }

    pub fn state(&self) -> WaitState {
        self.state
    }

    pub fn poll(&mut self, raw: bool, now: Instant) -> WaitState {
        if self.state != WaitState::Pending {
            return self.state;
        }
        match self.debouncer.update(raw, now) {
            Some(Edge::Down) => self.seen_down = true,
            Some(Edge::Up) if self.seen_down => {
                self.state = WaitState::Pressed;
                return self.state;
            }
            _ => {}
        }
        if now >= self.deadline {
            self.state = WaitState::TimedOut;
        }
        self.state
    }
}

/// Block until the button is pressed and released, or `timeout` passes.
///
/// Sleeps one `poll` interval at a time on `clock`; meant for prompts before a
/// session starts, never from inside the tick loop.
pub fn wait_for_button_press<B, C>(
    button: &mut B,
    clock: &C,
    timeout: Duration,
    poll: Duration,
    debounce_ms: u64,
) -> Result<()>
where
    B: ButtonInput + ?Sized,
    C: Clock + ?Sized,
{
    let poll = poll.max(Duration::from_millis(1));
    let mut wait = ButtonWait::new(clock.now(), timeout, debounce_ms);
    loop {
        let raw = button
            .is_pressed()
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))?;
        match wait.poll(raw, clock.now()) {
            WaitState::Pressed => return Ok(()),
            WaitState::TimedOut => {
                return Err(eyre::Report::new(ControlError::Timeout("button press")));
            }
            WaitState::Pending => clock.sleep(poll),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stroker_traits::BoxError;

    struct FixedAdc {
        value: u16,
        fail_every: Option<usize>,
        calls: usize,
    }

    impl AnalogInput for FixedAdc {
        fn read_raw(&mut self, _channel: AnalogChannel) -> std::result::Result<u16, BoxError> {
            self.calls += 1;
            if let Some(n) = self.fail_every
                && self.calls % n == 0
            {
                return Err("adc glitch".into());
            }
            Ok(self.value)
        }
    }

    fn mapper() -> InputMapper {
        InputMapper::new(InputCfg::default())
    }

    #[test]
    fn analog_rescales_and_clamps() {
        let mut m = InputMapper::new(InputCfg {
            analog_raw_min: 100,
            analog_raw_max: 1100,
            ..InputCfg::default()
        });
        assert_eq!(m.raw_to_percentage(600.0), 50.0);
        assert_eq!(m.raw_to_percentage(50.0), 0.0);
        assert_eq!(m.raw_to_percentage(5000.0), 100.0);

        let mut adc = FixedAdc {
            value: 350,
            fail_every: Some(2),
            calls: 0,
        };
        let pct = m.read_analog_percentage(&mut adc, AnalogChannel::Speed, 10);
        assert!((pct - 25.0).abs() < 1e-4);
    }

    #[test]
    fn analog_holds_last_value_when_every_sample_fails() {
        let mut m = mapper();
        let mut adc = FixedAdc {
            value: 4095,
            fail_every: None,
            calls: 0,
        };
        assert_eq!(m.read_analog_percentage(&mut adc, AnalogChannel::Speed, 4), 100.0);
        adc.fail_every = Some(1);
        assert_eq!(m.read_analog_percentage(&mut adc, AnalogChannel::Speed, 4), 100.0);
        assert_eq!(m.last_analog_percentage(AnalogChannel::Voltage), 0.0);
    }

    #[test]
    fn clamped_encoder_reverses_immediately() {
        let mut m = mapper();
        m.apply_encoder_delta(1_000);
        assert_eq!(m.encoder_percentage(), 100.0);
        m.apply_encoder_delta(-4);
        assert_eq!(m.encoder_percentage(), 99.0);
        m.apply_encoder_delta(-10_000);
        assert_eq!(m.encoder_percentage(), 0.0);
    }

    #[test]
    fn wrapped_encoder_rolls_over() {
        let mut m = InputMapper::new(InputCfg {
            encoder_mode: EncoderMode::Wrap,
            ..InputCfg::default()
        });
        m.apply_encoder_delta(-4);
        assert_eq!(m.encoder_percentage(), 99.0);
        m.apply_encoder_delta(8);
        assert_eq!(m.encoder_percentage(), 1.0);
    }

    #[test]
    fn set_encoder_percentage_repositions_count() {
        let mut m = mapper();
        m.set_encoder_percentage(86.0);
        assert_eq!(m.encoder_percentage(), 86.0);
        m.apply_encoder_delta(4);
        assert_eq!(m.encoder_percentage(), 87.0);
    }

    #[test]
    fn pattern_steps_need_a_full_detent() {
        let mut m = mapper();
        assert_eq!(m.pattern_step(5), 0);
        assert_eq!(m.pattern_step(3), 1);
        assert_eq!(m.pattern_step(-7), 0);
        assert_eq!(m.pattern_step(-1), -1);
        // A fast spin yields one step per poll, bounded backlog.
        assert_eq!(m.pattern_step(1_000), 1);
        let queued: i32 = (0..10).map(|_| m.pattern_step(0)).sum();
        assert_eq!(queued, 3);
    }

    #[test]
    fn short_and_long_presses_are_classified() {
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);
        let mut b = ButtonTracker::new(20, 1500);

        assert_eq!(b.update(false, ms(0)), None);
        assert_eq!(b.update(true, ms(5)), None);
        assert_eq!(b.update(true, ms(30)), None);
        assert_eq!(b.update(false, ms(200)), None);
        assert_eq!(b.update(false, ms(225)), Some(ButtonEvent::ShortPress));

        assert_eq!(b.update(true, ms(300)), None);
        assert_eq!(b.update(true, ms(320)), None);
        assert_eq!(b.update(true, ms(1830)), Some(ButtonEvent::LongPress));
        assert_eq!(b.update(true, ms(2500)), None);
        assert_eq!(b.update(false, ms(2600)), None);
        assert_eq!(b.update(false, ms(2700)), None);
    }

    #[test]
    fn bounce_shorter_than_debounce_is_ignored() {
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);
        let mut b = ButtonTracker::new(20, 1500);
        b.update(false, ms(0));
        b.update(true, ms(1));
        b.update(false, ms(10));
        assert_eq!(b.update(false, ms(50)), None);
        assert_eq!(b.update(false, ms(100)), None);
    }

    #[test]
    fn button_wait_requires_release_and_honours_deadline() {
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);

        let mut w = ButtonWait::new(t0, Duration::from_millis(500), 10);
        assert_eq!(w.poll(true, ms(0)), WaitState::Pending);
        assert_eq!(w.poll(true, ms(20)), WaitState::Pending);
        assert_eq!(w.poll(false, ms(30)), WaitState::Pending);
        assert_eq!(w.poll(false, ms(45)), WaitState::Pressed);
        assert_eq!(w.poll(false, ms(900)), WaitState::Pressed);

        let mut held = ButtonWait::new(t0, Duration::from_millis(100), 10);
        assert_eq!(held.poll(true, ms(0)), WaitState::Pending);
        assert_eq!(held.poll(true, ms(50)), WaitState::Pending);
        assert_eq!(held.poll(true, ms(100)), WaitState::TimedOut);
        assert_eq!(held.state(), WaitState::TimedOut);
    }
}
