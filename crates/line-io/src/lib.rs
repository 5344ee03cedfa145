//! Hardware line access for the conveyor inspection cell.
//!
//! Everything here talks to the kernel through sysfs or a tty device:
//! - `gpio`: exported digital lines with exclusive ownership.
//! - `servo`: software-timed pulse actuator driven from a digital line.
//! - `ultrasonic`: trigger/echo ranger built from two digital lines.
//! - `pwm`: hardware PWM channel used as the conveyor motor driver.
//! - `serial`: raw byte links (operator display, wireless telemetry).
//!
//! The traits at the crate root are the contracts the inspection controller
//! consumes, so tests and diagnostics can substitute their own devices.

pub use error::LineError;
pub use gpio::{DEFAULT_GPIO_ROOT, DigitalInput, DigitalOutput, Direction, GpioChip};
pub use pwm::{DEFAULT_PWM_CHIP, DutyCycle, PwmChannel, PwmConveyor};
pub use serial::{SUPPORTED_BAUD_RATES, SerialLink};
pub use servo::{ActuatorCommand, MAX_ANGLE, PulseActuator, PulseTiming, RejectSequence};
pub use ultrasonic::{DistanceSample, EchoTiming, UltrasonicRanger};

mod error;
mod gpio;
mod pwm;
mod serial;
mod servo;
mod ultrasonic;

/// Single writable binary line.
pub trait OutputLine: Send {
    fn set_level(&mut self, high: bool) -> Result<(), LineError>;
}

/// Single readable binary line.
pub trait InputLine: Send {
    fn level(&mut self) -> Result<bool, LineError>;
}

/// Continuous-motion motor driver.
pub trait Conveyor: Send {
    /// Enable motion with the given duty cycle.
    fn start(&mut self, duty: DutyCycle) -> Result<(), LineError>;
    /// Disable motion. Stopping an already stopped conveyor is not an error.
    fn stop(&mut self) -> Result<(), LineError>;
}

/// Proximity sensor polled once per call.
pub trait RangeSensor: Send {
    fn measure(&mut self) -> DistanceSample;
}

/// Position-commanded actuator.
pub trait Actuator: Send {
    /// Drive to the commanded angle and hold it. Blocks for the hold duration.
    fn move_to(&mut self, command: ActuatorCommand) -> Result<(), LineError>;
    /// Stop driving the actuator so it no longer holds position.
    fn rest(&mut self) -> Result<(), LineError>;
}

/// Raw byte-oriented link with non-blocking single byte input.
pub trait ByteLink: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LineError>;
    /// Returns `Ok(None)` when no byte is pending.
    fn try_read_byte(&mut self) -> Result<Option<u8>, LineError>;
}

impl<T: OutputLine + ?Sized> OutputLine for Box<T> {
    fn set_level(&mut self, high: bool) -> Result<(), LineError> {
        (**self).set_level(high)
    }
}

impl<T: InputLine + ?Sized> InputLine for Box<T> {
    fn level(&mut self) -> Result<bool, LineError> {
        (**self).level()
    }
}
