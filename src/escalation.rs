//! Timer-driven escalation from passive display to active deterrent.
//!
//! Evaluated once per displayed frame. A single frame with the trigger
//! condition false resets everything: the timer is cleared and the deterrent
//! stopped. There is no hysteresis, so one missed detection restarts the
//! countdown from zero.

use std::time::{Duration, Instant};

use crate::deterrent::Deterrent;

pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(10);
pub const DEFAULT_SOUND_ID: &str = "22khz";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscalationState {
    Idle,
    Accumulating,
    Active,
}

impl EscalationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationState::Idle => "idle",
            EscalationState::Accumulating => "accumulating",
            EscalationState::Active => "active",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EscalationConfig {
    pub threshold: Duration,
    pub sound_id: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            sound_id: DEFAULT_SOUND_ID.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct EscalationStateMachine {
    config: EscalationConfig,
    state: EscalationState,
    started_at: Option<Instant>,
    activations: u64,
}

impl EscalationStateMachine {
    pub fn new(config: EscalationConfig) -> Self {
        Self {
            config,
            state: EscalationState::Idle,
            started_at: None,
            activations: 0,
        }
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Number of times the deterrent has been started.
    pub fn activations(&self) -> u64 {
        self.activations
    }

    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.started_at
            .map(|started| now.saturating_duration_since(started))
    }

    /// Whole seconds left before activation, truncated, so the last second
    /// reads 0. `None` unless a timer is running.
    pub fn remaining_secs(&self, now: Instant) -> Option<u64> {
        let elapsed = self.elapsed(now)?;
        Some(self.config.threshold.saturating_sub(elapsed).as_secs())
    }

    /// Advance on one frame's trigger condition.
    ///
    /// Deterrent failures are logged and do not change the transition; the
    /// machine never leaves `Active` on a failed start, so `start` is not
    /// retried within the same span.
    pub fn evaluate<D: Deterrent + ?Sized>(
        &mut self,
        condition: bool,
        now: Instant,
        deterrent: &mut D,
    ) -> EscalationState {
        if !condition {
            if self.state == EscalationState::Active || deterrent.is_playing() {
                stop_quietly(deterrent);
            }
            if self.state != EscalationState::Idle {
                log::info!("escalation reset from {}", self.state.as_str());
            }
            self.started_at = None;
            self.state = EscalationState::Idle;
            return self.state;
        }

        let started = *self.started_at.get_or_insert(now);
        let elapsed = now.saturating_duration_since(started);

        if elapsed >= self.config.threshold {
            if self.state != EscalationState::Active {
                log::info!(
                    "trigger held for {:?}; starting deterrent '{}'",
                    elapsed,
                    self.config.sound_id
                );
                self.activations += 1;
                if let Err(err) = deterrent.start(&self.config.sound_id) {
                    log::warn!("deterrent start failed: {:#}", err);
                }
                self.state = EscalationState::Active;
            }
        } else {
            if deterrent.is_playing() {
                stop_quietly(deterrent);
            }
            if self.state == EscalationState::Idle {
                log::debug!("escalation timer started");
            }
            self.state = EscalationState::Accumulating;
        }
        self.state
    }
}

fn stop_quietly<D: Deterrent + ?Sized>(deterrent: &mut D) {
    if let Err(err) = deterrent.stop() {
        log::warn!("deterrent stop failed: {:#}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[derive(Default)]
    struct Recorder {
        starts: Vec<String>,
        stops: usize,
        playing: bool,
    }

    impl Deterrent for Recorder {
        fn start(&mut self, sound_id: &str) -> Result<()> {
            self.starts.push(sound_id.to_string());
            self.playing = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.stops += 1;
            self.playing = false;
            Ok(())
        }

        fn is_playing(&mut self) -> bool {
            self.playing
        }
    }

    fn machine() -> EscalationStateMachine {
        EscalationStateMachine::new(EscalationConfig::default())
    }

    #[test]
    fn starts_exactly_once_after_threshold() {
        let mut esc = machine();
        let mut rec = Recorder::default();
        let t0 = Instant::now();

        // 30 fps for 15 seconds of continuous trigger.
        for frame in 0..450u64 {
            let now = t0 + Duration::from_millis(frame * 1000 / 30);
            let state = esc.evaluate(true, now, &mut rec);
            if now - t0 < DEFAULT_THRESHOLD {
                assert_eq!(state, EscalationState::Accumulating);
                assert!(rec.starts.is_empty());
            } else {
                assert_eq!(state, EscalationState::Active);
            }
        }
        assert_eq!(rec.starts, vec![DEFAULT_SOUND_ID.to_string()]);
        assert_eq!(esc.activations(), 1);
    }

    #[test]
    fn single_false_frame_resets_without_carry_over() {
        let mut esc = machine();
        let mut rec = Recorder::default();
        let t0 = Instant::now();

        esc.evaluate(true, t0, &mut rec);
        esc.evaluate(true, t0 + Duration::from_secs(9), &mut rec);
        assert_eq!(
            esc.evaluate(false, t0 + Duration::from_millis(9_100), &mut rec),
            EscalationState::Idle
        );
        assert_eq!(esc.remaining_secs(t0), None);

        let t1 = t0 + Duration::from_millis(9_200);
        esc.evaluate(true, t1, &mut rec);
        let state = esc.evaluate(true, t1 + Duration::from_secs(9), &mut rec);
        assert_eq!(state, EscalationState::Accumulating);
        assert!(rec.starts.is_empty());

        esc.evaluate(true, t1 + Duration::from_secs(10), &mut rec);
        assert_eq!(rec.starts.len(), 1);
    }

    #[test]
    fn losing_trigger_while_active_stops_deterrent() {
        let mut esc = machine();
        let mut rec = Recorder::default();
        let t0 = Instant::now();

        esc.evaluate(true, t0, &mut rec);
        esc.evaluate(true, t0 + Duration::from_secs(11), &mut rec);
        assert!(rec.playing);

        esc.evaluate(false, t0 + Duration::from_secs(12), &mut rec);
        assert!(!rec.playing);
        assert_eq!(rec.stops, 1);

        // A fresh span needs a full threshold again and starts once more.
        let t1 = t0 + Duration::from_secs(13);
        esc.evaluate(true, t1, &mut rec);
        esc.evaluate(true, t1 + Duration::from_secs(10), &mut rec);
        assert_eq!(rec.starts.len(), 2);
    }

    #[test]
    fn stray_playback_is_stopped_while_accumulating() {
        let mut esc = machine();
        let mut rec = Recorder {
            playing: true,
            ..Recorder::default()
        };
        esc.evaluate(true, Instant::now(), &mut rec);
        assert!(!rec.playing);
        assert_eq!(esc.state(), EscalationState::Accumulating);
    }

    #[test]
    fn idle_with_nothing_playing_does_not_stop() {
        let mut esc = machine();
        let mut rec = Recorder::default();
        esc.evaluate(false, Instant::now(), &mut rec);
        assert_eq!(rec.stops, 0);
    }

    #[test]
    fn countdown_hidden_during_final_second() {
        use crate::detect::{ClassLabels, DetectionClass};
        use crate::render::build_overlay;
        use crate::tracker::{BoundingBox, TrackKey, TrackedBox, TrackerFrame};

        let mut esc = machine();
        let mut rec = Recorder::default();
        let t0 = Instant::now();
        esc.evaluate(true, t0, &mut rec);
        let now = t0 + Duration::from_millis(9_500);
        let state = esc.evaluate(true, now, &mut rec);

        let tracked = TrackerFrame {
            render_class: DetectionClass::Unmarked,
            boxes: vec![TrackedBox {
                key: TrackKey {
                    class: DetectionClass::Unmarked,
                    x: 20,
                    y: 20,
                },
                bbox: BoundingBox { x1: 10, y1: 10, x2: 30, y2: 30 },
                center: (20.0, 20.0),
                confidence: 0.9,
                frequency_khz: 50,
                is_new: false,
            }],
        };
        let overlay = build_overlay(&tracked, &ClassLabels::default(), state, esc.remaining_secs(now));
        assert_eq!(state, EscalationState::Accumulating);
        assert!(overlay.countdown.is_none());
    }

    #[test]
    fn remaining_seconds_count_down() {
        let mut esc = machine();
        let mut rec = Recorder::default();
        let t0 = Instant::now();
        esc.evaluate(true, t0, &mut rec);

        assert_eq!(esc.remaining_secs(t0), Some(10));
        assert_eq!(esc.remaining_secs(t0 + Duration::from_millis(2_500)), Some(7));
        assert_eq!(esc.remaining_secs(t0 + Duration::from_millis(9_500)), Some(0));
        assert_eq!(esc.remaining_secs(t0 + Duration::from_secs(12)), Some(0));
    }
}
