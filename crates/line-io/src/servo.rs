//! Software-timed pulse actuator.
//!
//! The actuator reads pulse width as a position command. Pulses are produced
//! by toggling a digital line and sleeping in microsecond steps, one pulse per
//! frame period. The calling thread is blocked for the whole hold.

use std::{thread, time::Duration};

use tracing::{debug, info};

use crate::{Actuator, LineError, OutputLine};

pub const MAX_ANGLE: u16 = 180;

/// Angle command with the time to keep driving it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub angle_degrees: u16,
    pub hold_duration_ms: u32,
}

impl ActuatorCommand {
    /// Build a command; angles above 180° are clamped.
    pub fn new(angle_degrees: u16, hold_duration_ms: u32) -> Self {
        Self {
            angle_degrees: angle_degrees.min(MAX_ANGLE),
            hold_duration_ms,
        }
    }
}

/// Frame period and calibration pulses, in microseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseTiming {
    pub frame_period_us: u32,
    pub min_pulse_us: u32,
    pub max_pulse_us: u32,
}

impl Default for PulseTiming {
    fn default() -> Self {
        Self {
            frame_period_us: 20_000,
            min_pulse_us: 450,
            max_pulse_us: 2_500,
        }
    }
}

impl PulseTiming {
    /// Linear map of `[0, 180]` onto `[min_pulse_us, max_pulse_us]`.
    pub fn pulse_width_us(&self, angle_degrees: u16) -> u32 {
        let angle = u32::from(angle_degrees.min(MAX_ANGLE));
        let span = self.max_pulse_us.saturating_sub(self.min_pulse_us);
        self.min_pulse_us + angle * span / u32::from(MAX_ANGLE)
    }

    /// Whole frames that fit in `hold_duration_ms`. The remainder is dropped.
    pub fn frames_for(&self, hold_duration_ms: u32) -> u32 {
        if self.frame_period_us == 0 {
            return 0;
        }
        let frames = u64::from(hold_duration_ms) * 1_000 / u64::from(self.frame_period_us);
        u32::try_from(frames).unwrap_or(u32::MAX)
    }
}

/// Actuator driven by software pulses on a single output line.
pub struct PulseActuator<L: OutputLine> {
    line: L,
    timing: PulseTiming,
}

impl<L: OutputLine> PulseActuator<L> {
    pub fn new(line: L, timing: PulseTiming) -> Self {
        Self { line, timing }
    }
}

impl<L: OutputLine> Actuator for PulseActuator<L> {
    fn move_to(&mut self, command: ActuatorCommand) -> Result<(), LineError> {
        let pulse = self.timing.pulse_width_us(command.angle_degrees);
        let rest = self.timing.frame_period_us.saturating_sub(pulse);
        let frames = self.timing.frames_for(command.hold_duration_ms);
        debug!(
            angle = command.angle_degrees,
            pulse_us = pulse,
            frames,
            "driving actuator"
        );

        let high = Duration::from_micros(u64::from(pulse));
        let low = Duration::from_micros(u64::from(rest));
        for _ in 0..frames {
            self.line.set_level(true)?;
            thread::sleep(high);
            self.line.set_level(false)?;
            thread::sleep(low);
        }
        Ok(())
    }

    fn rest(&mut self) -> Result<(), LineError> {
        self.line.set_level(false)
    }
}

/// Push-and-return motion used to knock a rejected item off the belt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RejectSequence {
    pub reject_angle: u16,
    /// Hold at 0° before pushing, so the start position is known.
    pub home_hold_ms: u32,
    pub push_hold_ms: u32,
    pub return_hold_ms: u32,
}

impl Default for RejectSequence {
    fn default() -> Self {
        Self {
            reject_angle: 60,
            home_hold_ms: 500,
            push_hold_ms: 3_000,
            return_hold_ms: 1_000,
        }
    }
}

impl RejectSequence {
    pub fn commands(&self) -> [ActuatorCommand; 3] {
        [
            ActuatorCommand::new(0, self.home_hold_ms),
            ActuatorCommand::new(self.reject_angle, self.push_hold_ms),
            ActuatorCommand::new(0, self.return_hold_ms),
        ]
    }

    /// Home, push, return, then release the actuator.
    pub fn run(&self, actuator: &mut dyn Actuator) -> Result<(), LineError> {
        info!(angle = self.reject_angle, "running reject sequence");
        for command in self.commands() {
            actuator.move_to(command)?;
        }
        actuator.rest()
    }
}
