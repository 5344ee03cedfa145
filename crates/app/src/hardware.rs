//! Bring-up and teardown of the physical cell.
//!
//! Every device type releases itself on drop (outputs low, PWM disabled,
//! ports closed), so an early `?` during bring-up unwinds whatever was
//! already opened.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use inspection::{Devices, InspectionConfig, StatusDisplay, Uplink};
use line_io::{
    Actuator, Conveyor, EchoTiming, GpioChip, OutputLine, PulseActuator, PulseTiming, PwmChannel,
    PwmConveyor, RangeSensor, SerialLink, UltrasonicRanger,
};
use ml_core::Classifier;
use tracing::{info, warn};
use video_ingest::{DeviceReclaimer, ImageSource};

pub fn gpio_chip(config: &InspectionConfig) -> Arc<GpioChip> {
    Arc::new(GpioChip::new(&config.gpio.root, config.gpio.base))
}

pub fn open_sensor(config: &InspectionConfig, gpio: &Arc<GpioChip>) -> Result<Box<dyn RangeSensor>> {
    let trigger = gpio
        .claim_output(config.gpio.trigger)
        .context("failed to claim ultrasonic trigger line")?;
    let echo = gpio
        .claim_input(config.gpio.echo)
        .context("failed to claim ultrasonic echo line")?;
    let detection = &config.detection;
    let timing = EchoTiming {
        trigger_pulse: Duration::from_micros(detection.trigger_pulse_us),
        max_edge_polls: detection.max_edge_polls,
        speed_cm_per_us: detection.speed_cm_per_us,
        min_cm: detection.min_cm,
        max_cm: detection.max_cm,
    };
    Ok(Box::new(UltrasonicRanger::new(trigger, echo, timing)))
}

pub fn open_actuator(config: &InspectionConfig, gpio: &Arc<GpioChip>) -> Result<Box<dyn Actuator>> {
    let line = gpio
        .claim_output(config.gpio.servo)
        .context("failed to claim actuator line")?;
    let timing = PulseTiming {
        frame_period_us: config.servo.frame_period_us,
        min_pulse_us: config.servo.min_pulse_us,
        max_pulse_us: config.servo.max_pulse_us,
    };
    Ok(Box::new(PulseActuator::new(line, timing)))
}

pub fn open_defect_line(
    config: &InspectionConfig,
    gpio: &Arc<GpioChip>,
) -> Result<Box<dyn OutputLine>> {
    let line = gpio
        .claim_output(config.gpio.defect)
        .context("failed to claim defect line")?;
    Ok(Box::new(line))
}

pub fn open_conveyor(config: &InspectionConfig) -> Result<Box<dyn Conveyor>> {
    let channel = PwmChannel::new(&config.conveyor.chip, config.conveyor.channel);
    channel
        .export()
        .context("failed to export conveyor pwm channel")?;
    Ok(Box::new(PwmConveyor::new(channel)))
}

pub fn open_display(config: &InspectionConfig) -> Result<StatusDisplay> {
    let link = SerialLink::open(&config.serial.display_port, config.serial.baud)
        .context("failed to open operator display link")?;
    Ok(StatusDisplay::new(Box::new(link)))
}

pub fn open_uplink(config: &InspectionConfig) -> Result<Uplink> {
    let link = SerialLink::open(&config.serial.uplink_port, config.serial.baud)
        .context("failed to open telemetry link")?;
    Ok(Uplink::new(Box::new(link), config.result_format))
}

#[cfg(not(feature = "with-opencv"))]
pub fn open_camera(config: &InspectionConfig) -> Box<dyn ImageSource> {
    let camera = &config.camera;
    Box::new(
        video_ingest::FfmpegSnapshot::new(&camera.device, (camera.width, camera.height))
            .with_timeout(Duration::from_millis(camera.capture_timeout_ms)),
    )
}

#[cfg(feature = "with-opencv")]
pub fn open_camera(config: &InspectionConfig) -> Box<dyn ImageSource> {
    let camera = &config.camera;
    let size = (
        i32::try_from(camera.width).unwrap_or(i32::MAX),
        i32::try_from(camera.height).unwrap_or(i32::MAX),
    );
    Box::new(video_ingest::OpenCvSnapshot::new(&camera.device, size))
}

pub fn open_classifier(config: &InspectionConfig) -> Result<Box<dyn Classifier>> {
    let settings = &config.classifier;
    #[cfg(feature = "with-tch")]
    {
        if is_torchscript(&settings.model) {
            let device = tch::Device::cuda_if_available();
            let classifier = ml_core::TorchClassifier::load(&settings.model, device)
                .context("failed to load classifier model")?;
            return Ok(Box::new(classifier));
        }
    }
    let classifier = ml_core::CommandClassifier::new(
        settings.command.clone(),
        settings.args.clone(),
        &settings.model,
    )
    .context("failed to load classifier model")?;
    Ok(Box::new(classifier))
}

#[cfg(feature = "with-tch")]
fn is_torchscript(model: &std::path::Path) -> bool {
    matches!(
        model.extension().and_then(|ext| ext.to_str()),
        Some("pt" | "ts")
    )
}

/// Everything the inspection loop needs, opened and ready.
pub struct Cell {
    pub devices: Devices,
    pub display: StatusDisplay,
    pub uplink: Uplink,
    pub resources: CellResources,
}

/// Parts of the cell the controller never touches.
pub struct CellResources {
    reclaimer: DeviceReclaimer,
    camera_device: PathBuf,
    _gpio: Arc<GpioChip>,
}

impl CellResources {
    pub fn new(
        reclaimer: DeviceReclaimer,
        camera_device: impl Into<PathBuf>,
        gpio: Arc<GpioChip>,
    ) -> Self {
        Self {
            reclaimer,
            camera_device: camera_device.into(),
            _gpio: gpio,
        }
    }
}

impl Cell {
    /// Open every device. Any failure is fatal for the process.
    pub fn bring_up(config: &InspectionConfig) -> Result<Self> {
        let reclaimer = DeviceReclaimer::default();
        reclaimer.reclaim(&config.camera.device);

        let gpio = gpio_chip(config);
        let defect_line = open_defect_line(config, &gpio)?;
        let actuator = open_actuator(config, &gpio)?;
        let sensor = open_sensor(config, &gpio)?;
        let conveyor = open_conveyor(config)?;
        let display = open_display(config)?;
        let uplink = open_uplink(config)?;
        let classifier = open_classifier(config)?;
        let camera = open_camera(config);

        info!(
            gpio_base = config.gpio.base,
            display = %config.serial.display_port,
            uplink = %config.serial.uplink_port,
            camera = %config.camera.device.display(),
            model = %config.classifier.model.display(),
            "cell hardware ready"
        );

        Ok(Self {
            devices: Devices {
                conveyor,
                sensor,
                camera,
                classifier,
                actuator,
                defect_line,
            },
            display,
            uplink,
            resources: CellResources::new(reclaimer, &config.camera.device, gpio),
        })
    }

    /// Put every output in its safe state, then release the hardware.
    pub fn teardown(mut self) {
        if let Err(err) = self.display.set_online(false) {
            warn!("failed to clear display online flag: {err}");
        }
        if let Err(err) = self.devices.conveyor.stop() {
            warn!("failed to stop conveyor: {err}");
        }
        if let Err(err) = self.devices.actuator.rest() {
            warn!("failed to rest actuator: {err}");
        }
        if let Err(err) = self.devices.defect_line.set_level(false) {
            warn!("failed to lower defect line: {err}");
        }
        self.devices.camera.release();
        self.resources.reclaimer.reclaim(&self.resources.camera_device);
        drop(self);
        info!("cell hardware released");
    }
}
