//! Configuration for the inspection cell.
//!
//! A JSON document (every field optional) supplies the full hardware map;
//! the `run` subcommand flags override the knobs operators actually touch.
//! Downstream code only ever sees a validated `InspectionConfig`.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

/// How the item result is written on the telemetry link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    /// `RESULT:DEFECTIVE` / `RESULT:NON DEFECTIVE`.
    #[default]
    Verdict,
    /// `RESULT:CLASS_<n>`.
    Class,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpioSettings {
    pub root: PathBuf,
    /// Global number of the chip's first line.
    pub base: u32,
    pub trigger: u32,
    pub echo: u32,
    pub servo: u32,
    pub defect: u32,
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from(line_io::DEFAULT_GPIO_ROOT),
            base: 512,
            trigger: 5,
            echo: 15,
            servo: 12,
            defect: 13,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConveyorSettings {
    pub chip: PathBuf,
    pub channel: u32,
    pub period_ns: u32,
    pub duty_ns: u32,
}

impl Default for ConveyorSettings {
    fn default() -> Self {
        Self {
            chip: PathBuf::from(line_io::DEFAULT_PWM_CHIP),
            channel: 0,
            period_ns: 20_000_000,
            duty_ns: 1_500_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSettings {
    pub display_port: String,
    pub uplink_port: String,
    pub baud: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            display_port: "/dev/ttyS0".to_string(),
            uplink_port: "/dev/ttyS3".to_string(),
            baud: 9_600,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraSettings {
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Where each cycle's frame is written.
    pub image_path: PathBuf,
    pub check_image: bool,
    pub min_image_bytes: u64,
    /// The capture process is killed once this elapses.
    pub capture_timeout_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            width: 640,
            height: 480,
            image_path: PathBuf::from("capture.jpg"),
            check_image: true,
            min_image_bytes: 100,
            capture_timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierSettings {
    pub model: PathBuf,
    /// Inference program, called as `<command> [args..] <model> <image>`.
    pub command: String,
    pub args: Vec<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            model: PathBuf::from("my_model.vnnx"),
            command: "classify-image".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionSettings {
    pub threshold_cm: f64,
    pub trigger_pulse_us: u64,
    pub max_edge_polls: u32,
    pub speed_cm_per_us: f64,
    pub min_cm: f64,
    pub max_cm: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            threshold_cm: 8.0,
            trigger_pulse_us: 10,
            max_edge_polls: 50_000,
            speed_cm_per_us: 0.0343,
            min_cm: 2.0,
            max_cm: 400.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServoSettings {
    pub frame_period_us: u32,
    pub min_pulse_us: u32,
    pub max_pulse_us: u32,
    pub reject_angle: u16,
    pub home_hold_ms: u32,
    pub push_hold_ms: u32,
    pub return_hold_ms: u32,
}

impl Default for ServoSettings {
    fn default() -> Self {
        Self {
            frame_period_us: 20_000,
            min_pulse_us: 450,
            max_pulse_us: 2_500,
            reject_angle: 60,
            home_hold_ms: 500,
            push_hold_ms: 3_000,
            return_hold_ms: 1_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingSettings {
    pub poll_ms: u64,
    pub settle_ms: u64,
    pub pre_action_ms: u64,
    pub defect_strobe_ms: u64,
    pub reset_ms: u64,
    pub start_poll_ms: u64,
    pub listener_poll_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            poll_ms: 50,
            settle_ms: 500,
            pre_action_ms: 1_000,
            defect_strobe_ms: 1_000,
            reset_ms: 1_000,
            start_poll_ms: 100,
            listener_poll_ms: 50,
        }
    }
}

impl TimingSettings {
    pub fn start_poll(&self) -> Duration {
        Duration::from_millis(self.start_poll_ms)
    }

    pub fn listener_poll(&self) -> Duration {
        Duration::from_millis(self.listener_poll_ms)
    }
}

/// Canonical configuration for one run of the cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InspectionConfig {
    pub gpio: GpioSettings,
    pub conveyor: ConveyorSettings,
    pub serial: SerialSettings,
    pub camera: CameraSettings,
    pub classifier: ClassifierSettings,
    pub detection: DetectionSettings,
    pub servo: ServoSettings,
    pub timings: TimingSettings,
    pub result_format: ResultFormat,
}

impl InspectionConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("invalid inspection config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let detection = &self.detection;
        if detection.min_cm >= detection.max_cm {
            bail!(
                "sensor range [{}, {}] cm is empty",
                detection.min_cm,
                detection.max_cm
            );
        }
        if !(detection.min_cm..=detection.max_cm).contains(&detection.threshold_cm) {
            bail!(
                "threshold {} cm lies outside the sensor range [{}, {}] cm",
                detection.threshold_cm,
                detection.min_cm,
                detection.max_cm
            );
        }
        if detection.max_edge_polls == 0 || detection.speed_cm_per_us <= 0.0 {
            bail!("echo poll budget and speed of sound must be positive");
        }

        let servo = &self.servo;
        if servo.reject_angle > line_io::MAX_ANGLE {
            bail!("reject angle {} exceeds {}", servo.reject_angle, line_io::MAX_ANGLE);
        }
        if servo.min_pulse_us >= servo.max_pulse_us || servo.max_pulse_us >= servo.frame_period_us {
            bail!(
                "servo pulses must satisfy min < max < frame period (got {} / {} / {} us)",
                servo.min_pulse_us,
                servo.max_pulse_us,
                servo.frame_period_us
            );
        }

        let conveyor = &self.conveyor;
        if conveyor.period_ns == 0 || conveyor.duty_ns > conveyor.period_ns {
            bail!(
                "conveyor duty {} ns must not exceed a non-zero period {} ns",
                conveyor.duty_ns,
                conveyor.period_ns
            );
        }

        if !line_io::SUPPORTED_BAUD_RATES.contains(&self.serial.baud) {
            bail!(
                "unsupported baud rate {} (supported: {:?})",
                self.serial.baud,
                line_io::SUPPORTED_BAUD_RATES
            );
        }

        let timings = &self.timings;
        if timings.poll_ms == 0 || timings.start_poll_ms == 0 || timings.listener_poll_ms == 0 {
            bail!("poll intervals must be at least 1 ms");
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            bail!("camera width and height must be positive");
        }
        if self.camera.capture_timeout_ms == 0 {
            bail!("camera.capture_timeout_ms must be at least 1 ms");
        }
        Ok(())
    }
}

/// Tracing options shared by every subcommand.
#[derive(Clone, Debug, Default)]
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing cycle spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Default the log filter to `debug` instead of `info`.
    pub verbose: bool,
}

/// CLI arguments accepted by the `run` subcommand.
#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// JSON configuration file.
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Operator display serial port.
    #[arg(long = "display-port", value_name = "TTY")]
    pub display_port: Option<String>,
    /// Wireless telemetry serial port.
    #[arg(long = "uplink-port", value_name = "TTY")]
    pub uplink_port: Option<String>,
    /// Baud rate for both serial links.
    #[arg(long = "baud", value_name = "RATE")]
    pub baud: Option<u32>,
    /// Classifier model path.
    #[arg(long = "model", value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// Inference program invoked per image.
    #[arg(long = "classifier-cmd", value_name = "PROGRAM")]
    pub classifier_cmd: Option<String>,
    /// Camera device node.
    #[arg(long = "camera", value_name = "DEVICE")]
    pub camera: Option<PathBuf>,
    /// Output path of each captured frame.
    #[arg(long = "image-path", value_name = "PATH")]
    pub image_path: Option<PathBuf>,
    /// Detection threshold in centimeters.
    #[arg(long = "threshold-cm", value_name = "CM")]
    pub threshold_cm: Option<f64>,
    /// Actuator angle used to push rejected items.
    #[arg(long = "reject-angle", value_name = "DEGREES")]
    pub reject_angle: Option<u16>,
    /// Telemetry result line format.
    #[arg(long = "result-format", value_enum)]
    pub result_format: Option<ResultFormat>,
    /// Skip the size/JPEG sanity check on captured frames.
    #[arg(long = "skip-image-check", action = clap::ArgAction::SetTrue)]
    pub skip_image_check: bool,
    /// Enable debug logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl RunArgs {
    pub fn telemetry(&self) -> TelemetryOptions {
        TelemetryOptions {
            chrome_trace_path: self.chrome_trace.clone(),
            verbose: self.verbose,
        }
    }
}

impl TryFrom<RunArgs> for InspectionConfig {
    type Error = anyhow::Error;

    fn try_from(args: RunArgs) -> Result<Self> {
        let mut config = match args.config.as_deref() {
            Some(path) => InspectionConfig::load(path)?,
            None => InspectionConfig::default(),
        };

        if let Some(port) = args.display_port {
            config.serial.display_port = port;
        }
        if let Some(port) = args.uplink_port {
            config.serial.uplink_port = port;
        }
        if let Some(baud) = args.baud {
            config.serial.baud = baud;
        }
        if let Some(model) = args.model {
            config.classifier.model = model;
        }
        if let Some(command) = args.classifier_cmd {
            config.classifier.command = command;
        }
        if let Some(camera) = args.camera {
            config.camera.device = camera;
        }
        if let Some(image_path) = args.image_path {
            config.camera.image_path = image_path;
        }
        if let Some(threshold) = args.threshold_cm {
            config.detection.threshold_cm = threshold;
        }
        if let Some(angle) = args.reject_angle {
            config.servo.reject_angle = angle;
        }
        if let Some(format) = args.result_format {
            config.result_format = format;
        }
        if args.skip_image_check {
            config.camera.check_image = false;
        }

        config.validate()?;
        Ok(config)
    }
}
