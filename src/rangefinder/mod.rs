//! Ultrasonic rangefinder driver.
//!
//! The measurement is a trigger pulse followed by timing the echo line's
//! high period. Both edge waits are bounded spin-waits; a missing edge
//! surfaces as [`PerceptionError::SensorTimeout`] instead of hanging the
//! caller. Measurements block for at least the settle time, so they belong
//! on their own thread ([`RangefinderPoller`]).

mod poller;
mod sysfs;

pub use poller::{PollerConfig, RangefinderPoller};
pub use sysfs::{SysfsPulsePins, DEFAULT_ECHO_LINE, DEFAULT_GPIO_ROOT, DEFAULT_TRIGGER_LINE};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::{EchoEdge, PerceptionError};

/// Half the speed of sound in air at about 20 °C (34300 cm/s ÷ 2).
pub const HALF_SPEED_OF_SOUND_CM_PER_S: f64 = 17_150.0;

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);
pub const DEFAULT_PULSE_WIDTH: Duration = Duration::from_micros(10);
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_secs(1);

/// Digital lines of an HC-SR04 style sensor.
pub trait PulsePins: Send {
    fn set_trigger(&mut self, high: bool) -> Result<()>;
    fn echo_high(&mut self) -> Result<bool>;
}

impl<P: PulsePins + ?Sized> PulsePins for Box<P> {
    fn set_trigger(&mut self, high: bool) -> Result<()> {
        (**self).set_trigger(high)
    }

    fn echo_high(&mut self) -> Result<bool> {
        (**self).echo_high()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangefinderTiming {
    /// Trigger held low before each pulse.
    pub settle: Duration,
    pub pulse_width: Duration,
    /// Deadline for each echo edge.
    pub echo_timeout: Duration,
}

impl Default for RangefinderTiming {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            pulse_width: DEFAULT_PULSE_WIDTH,
            echo_timeout: DEFAULT_ECHO_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistanceSample {
    pub centimeters: f64,
    pub meters: f64,
}

impl DistanceSample {
    /// Convert an echo pulse width to distance. Centimeters are rounded to
    /// two decimals, meters (derived from the rounded centimeters) to three.
    pub fn from_pulse(duration: Duration) -> Self {
        let centimeters = round_to(duration.as_secs_f64() * HALF_SPEED_OF_SOUND_CM_PER_S, 2);
        let meters = round_to(centimeters / 100.0, 3);
        Self {
            centimeters,
            meters,
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

pub struct Rangefinder<P> {
    pins: P,
    timing: RangefinderTiming,
}

impl<P: PulsePins> Rangefinder<P> {
    pub fn new(pins: P, timing: RangefinderTiming) -> Self {
        Self { pins, timing }
    }

    pub fn timing(&self) -> RangefinderTiming {
        self.timing
    }

    pub fn measure_distance(&mut self) -> Result<DistanceSample> {
        self.pins.set_trigger(false)?;
        std::thread::sleep(self.timing.settle);
        self.pins.set_trigger(true)?;
        std::thread::sleep(self.timing.pulse_width);
        self.pins.set_trigger(false)?;

        let pulse_start = self.wait_for_echo(true, EchoEdge::Rising)?;
        let pulse_end = self.wait_for_echo(false, EchoEdge::Falling)?;
        let sample = DistanceSample::from_pulse(pulse_end.saturating_duration_since(pulse_start));
        log::debug!(
            "echo {:?} -> {:.2} cm",
            pulse_end.saturating_duration_since(pulse_start),
            sample.centimeters
        );
        Ok(sample)
    }

    fn wait_for_echo(&mut self, level: bool, edge: EchoEdge) -> Result<Instant> {
        let started = Instant::now();
        let deadline = started + self.timing.echo_timeout;
        loop {
            if self.pins.echo_high()? == level {
                return Ok(Instant::now());
            }
            if Instant::now() >= deadline {
                return Err(anyhow::Error::new(PerceptionError::SensorTimeout {
                    edge,
                    waited: started.elapsed(),
                }));
            }
            std::hint::spin_loop();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{fast_timing, ScriptedPins};
    use super::*;
    use crate::error::classify;

    #[test]
    fn pulse_conversion_rounds() {
        let sample = DistanceSample::from_pulse(Duration::from_micros(2_000));
        assert_eq!(sample.centimeters, 34.3);
        assert_eq!(sample.meters, 0.343);

        let sample = DistanceSample::from_pulse(Duration::from_nanos(1_828_000));
        assert_eq!(sample.centimeters, 31.35);

        assert_eq!(DistanceSample::from_pulse(Duration::ZERO).centimeters, 0.0);
    }

    #[test]
    fn measures_scripted_echo() -> Result<()> {
        let pins = ScriptedPins::new(
            Some(Duration::from_micros(200)),
            Some(Duration::from_millis(2)),
        );
        let mut rangefinder = Rangefinder::new(pins, fast_timing(Duration::from_millis(200)));
        let sample = rangefinder.measure_distance()?;

        // 2 ms of echo is 34.3 cm; allow for scheduling noise.
        assert!(
            sample.centimeters > 25.0 && sample.centimeters < 80.0,
            "{:?}",
            sample
        );
        assert_eq!(rangefinder.pins.trigger_writes, vec![false, true, false]);
        Ok(())
    }

    #[test]
    fn echo_that_never_rises_times_out() {
        let timeout = Duration::from_millis(50);
        let mut rangefinder = Rangefinder::new(ScriptedPins::new(None, None), fast_timing(timeout));

        let started = Instant::now();
        let err = rangefinder.measure_distance().unwrap_err();
        let elapsed = started.elapsed();

        match classify(&err) {
            Some(PerceptionError::SensorTimeout { edge, waited }) => {
                assert_eq!(*edge, EchoEdge::Rising);
                assert!(*waited >= timeout);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(elapsed < timeout + Duration::from_millis(500));
    }

    #[test]
    fn echo_stuck_high_times_out_on_falling_edge() {
        let mut rangefinder = Rangefinder::new(
            ScriptedPins::new(Some(Duration::ZERO), None),
            fast_timing(Duration::from_millis(30)),
        );
        let err = rangefinder.measure_distance().unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(PerceptionError::SensorTimeout {
                edge: EchoEdge::Falling,
                ..
            })
        ));
    }
}
