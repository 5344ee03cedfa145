//! Trigger/echo ultrasonic ranger.
//!
//! Edges on the echo line are found by re-reading the line in a tight loop.
//! Each wait is bounded by an iteration count rather than a deadline, so the
//! worst-case latency depends on how fast the line can be sampled. An
//! edge-interrupt based reader would change that latency profile and is not
//! used here.

use std::{
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{InputLine, OutputLine, RangeSensor};

/// Outcome of one proximity poll.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DistanceSample {
    /// Valid reading inside the sensor range.
    Range { centimeters: f64 },
    /// Echo measured but outside the sensor's sane range.
    OutOfRange { centimeters: f64 },
    /// The echo line could not be sampled.
    NoEcho,
    /// An edge did not arrive within its poll budget.
    Timeout,
}

impl DistanceSample {
    /// Whether this sample reports an object closer than `threshold_cm`.
    /// Out-of-range readings, missing echoes and timeouts never do.
    pub fn is_within(&self, threshold_cm: f64) -> bool {
        match *self {
            DistanceSample::Range { centimeters } => centimeters < threshold_cm,
            _ => false,
        }
    }

    pub fn centimeters(&self) -> Option<f64> {
        match *self {
            DistanceSample::Range { centimeters } => Some(centimeters),
            _ => None,
        }
    }
}

/// Timing and range constants for the ranger.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EchoTiming {
    pub trigger_pulse: Duration,
    /// Poll budget for each of the rising and falling edge waits.
    pub max_edge_polls: u32,
    pub speed_cm_per_us: f64,
    pub min_cm: f64,
    pub max_cm: f64,
}

impl Default for EchoTiming {
    fn default() -> Self {
        Self {
            trigger_pulse: Duration::from_micros(10),
            max_edge_polls: 50_000,
            speed_cm_per_us: 0.0343,
            min_cm: 2.0,
            max_cm: 400.0,
        }
    }
}

impl EchoTiming {
    /// Convert an echo pulse length into a sample. The pulse covers the round
    /// trip, so the travelled distance is halved.
    pub fn sample_from_echo(&self, echo: Duration) -> DistanceSample {
        let micros = echo.as_secs_f64() * 1_000_000.0;
        let centimeters = micros * self.speed_cm_per_us / 2.0;
        if centimeters < self.min_cm || centimeters > self.max_cm {
            DistanceSample::OutOfRange { centimeters }
        } else {
            DistanceSample::Range { centimeters }
        }
    }
}

enum EdgeWait {
    Seen(Instant),
    Exhausted,
    Failed,
}

/// Ranger built from a trigger output and an echo input.
pub struct UltrasonicRanger<T: OutputLine, E: InputLine> {
    trigger: T,
    echo: E,
    timing: EchoTiming,
}

impl<T: OutputLine, E: InputLine> UltrasonicRanger<T, E> {
    pub fn new(trigger: T, echo: E, timing: EchoTiming) -> Self {
        Self {
            trigger,
            echo,
            timing,
        }
    }

    fn fire_trigger(&mut self) -> bool {
        let pulse = self.timing.trigger_pulse;
        let fired = self.trigger.set_level(true).and_then(|_| {
            thread::sleep(pulse);
            self.trigger.set_level(false)
        });
        match fired {
            Ok(()) => true,
            Err(err) => {
                warn!("ultrasonic trigger failed: {err}");
                false
            }
        }
    }

    fn wait_for_level(&mut self, level: bool) -> EdgeWait {
        for _ in 0..self.timing.max_edge_polls {
            match self.echo.level() {
                Ok(current) if current == level => return EdgeWait::Seen(Instant::now()),
                Ok(_) => {}
                Err(err) => {
                    warn!("ultrasonic echo read failed: {err}");
                    return EdgeWait::Failed;
                }
            }
        }
        EdgeWait::Exhausted
    }
}

impl<T: OutputLine, E: InputLine> RangeSensor for UltrasonicRanger<T, E> {
    fn measure(&mut self) -> DistanceSample {
        if !self.fire_trigger() {
            return DistanceSample::NoEcho;
        }

        let start = match self.wait_for_level(true) {
            EdgeWait::Seen(at) => at,
            EdgeWait::Exhausted => {
                debug!("ultrasonic timed out waiting for echo start");
                return DistanceSample::Timeout;
            }
            EdgeWait::Failed => return DistanceSample::NoEcho,
        };

        let end = match self.wait_for_level(false) {
            EdgeWait::Seen(at) => at,
            EdgeWait::Exhausted => {
                debug!("ultrasonic timed out waiting for echo end");
                return DistanceSample::Timeout;
            }
            EdgeWait::Failed => return DistanceSample::NoEcho,
        };

        self.timing.sample_from_echo(end.duration_since(start))
    }
}
