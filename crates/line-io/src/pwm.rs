//! Hardware PWM channel exposed under `/sys/class/pwm/pwmchipN`.

use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{Conveyor, LineError, gpio::write_attribute};

/// Default sysfs PWM chip directory.
pub const DEFAULT_PWM_CHIP: &str = "/sys/class/pwm/pwmchip0";
const EXPORT_SETTLE: Duration = Duration::from_millis(100);
const EXPORT_POLL: Duration = Duration::from_millis(10);

/// Period and high time of a PWM waveform, in nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DutyCycle {
    pub period_ns: u32,
    pub duty_ns: u32,
}

impl DutyCycle {
    pub fn new(period_ns: u32, duty_ns: u32) -> Result<Self, LineError> {
        if duty_ns > period_ns {
            return Err(LineError::InvalidDuty { period_ns, duty_ns });
        }
        Ok(Self { period_ns, duty_ns })
    }

    /// Fraction of the period spent high.
    pub fn ratio(&self) -> f64 {
        if self.period_ns == 0 {
            return 0.0;
        }
        f64::from(self.duty_ns) / f64::from(self.period_ns)
    }
}

/// One channel of a sysfs PWM chip.
#[derive(Clone, Debug)]
pub struct PwmChannel {
    chip: PathBuf,
    channel: u32,
}

impl PwmChannel {
    pub fn new(chip: impl Into<PathBuf>, channel: u32) -> Self {
        Self {
            chip: chip.into(),
            channel,
        }
    }

    fn attribute(&self, name: &str) -> PathBuf {
        self.chip.join(format!("pwm{}", self.channel)).join(name)
    }

    /// Export the channel unless it is already exported.
    pub fn export(&self) -> Result<(), LineError> {
        let period = self.attribute("period");
        if period.exists() {
            return Ok(());
        }

        let export_path = self.chip.join("export");
        write_attribute(&export_path, &self.channel.to_string()).map_err(|source| {
            LineError::Export {
                what: format!("pwm{}", self.channel),
                path: export_path.clone(),
                source,
            }
        })?;

        let deadline = Instant::now() + EXPORT_SETTLE;
        while !period.exists() {
            if Instant::now() >= deadline {
                return Err(LineError::ExportTimeout {
                    what: format!("pwm{}", self.channel),
                    path: period,
                });
            }
            thread::sleep(EXPORT_POLL);
        }
        Ok(())
    }

    /// Export, program the waveform and enable the output.
    ///
    /// The period is written before the duty cycle so a shorter new period
    /// never sits below the previous duty value.
    pub fn setup(&self, duty: DutyCycle) -> Result<(), LineError> {
        self.export()?;
        self.write("period", &duty.period_ns.to_string())?;
        self.write("duty_cycle", &duty.duty_ns.to_string())?;
        self.write("enable", "1")
    }

    pub fn disable(&self) -> Result<(), LineError> {
        self.write("enable", "0")
    }

    fn write(&self, name: &str, value: &str) -> Result<(), LineError> {
        let path = self.attribute(name);
        write_attribute(&path, value).map_err(|source| LineError::Write { path, source })
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }
}

/// Conveyor motor driven by a hardware PWM channel.
pub struct PwmConveyor {
    channel: PwmChannel,
    enabled: bool,
}

impl PwmConveyor {
    pub fn new(channel: PwmChannel) -> Self {
        Self {
            channel,
            enabled: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.enabled
    }
}

impl Conveyor for PwmConveyor {
    fn start(&mut self, duty: DutyCycle) -> Result<(), LineError> {
        self.channel.setup(duty)?;
        self.enabled = true;
        debug!(
            channel = self.channel.channel(),
            period_ns = duty.period_ns,
            duty_ns = duty.duty_ns,
            "conveyor started"
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), LineError> {
        if !self.channel.attribute("enable").exists() {
            self.enabled = false;
            return Ok(());
        }
        self.channel.disable()?;
        self.enabled = false;
        debug!(channel = self.channel.channel(), "conveyor stopped");
        Ok(())
    }
}

impl Drop for PwmConveyor {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(err) = self.channel.disable() {
                warn!("failed to disable pwm{} on release: {err}", self.channel.channel());
            }
        }
    }
}
