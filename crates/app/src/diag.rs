//! Single-device checks used when commissioning the cell.

use std::{
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use inspection::{InspectionConfig, InspectionResult, SharedControl};
use line_io::{ActuatorCommand, Conveyor, DistanceSample, DutyCycle, PwmChannel, PwmConveyor};
use tracing::info;
use video_ingest::ImageCheck;

use crate::{
    cli::{DiagArgs, DiagTarget},
    hardware,
};

const SERVO_HOLD_MS: u32 = 1_000;

pub fn run(args: DiagArgs, control: Arc<SharedControl>) -> Result<()> {
    let config = match args.config.as_deref() {
        Some(path) => InspectionConfig::load(path)?,
        None => InspectionConfig::default(),
    };

    match args.target {
        DiagTarget::Display => display(&config),
        DiagTarget::Listen => listen(&config, &control),
        DiagTarget::Sensor { count, interval_ms } => {
            sensor(&config, count, Duration::from_millis(interval_ms))
        }
        DiagTarget::Camera { output } => camera(&config, &output),
        DiagTarget::Classify { image } => classify(&config, &image),
        DiagTarget::Servo => servo(&config),
        DiagTarget::Motor {
            period_ns,
            duty_ns,
            seconds,
        } => motor(&config, period_ns, duty_ns, Duration::from_secs(seconds)),
    }
}

fn display(config: &InspectionConfig) -> Result<()> {
    let display = hardware::open_display(config)?;
    display.send_raw("b1.bco=2016")?;
    println!("button b1 set to green");
    thread::sleep(Duration::from_secs(1));
    display.send_raw("b1.bco=65535")?;
    println!("button b1 set to white");
    display.set_text("t0", "display link ok")?;
    println!("text t0 updated");
    Ok(())
}

fn listen(config: &InspectionConfig, control: &SharedControl) -> Result<()> {
    let display = hardware::open_display(config)?;
    println!(
        "listening on {} at {} baud, Ctrl+C to stop",
        config.serial.display_port, config.serial.baud
    );
    while !control.shutdown_requested() {
        match display.poll_byte()? {
            Some(byte) => println!("{}", describe_byte(byte)),
            None => thread::sleep(Duration::from_millis(10)),
        }
    }
    Ok(())
}

fn describe_byte(byte: u8) -> String {
    if byte.is_ascii_graphic() || byte == b' ' {
        format!("{}", byte as char)
    } else {
        format!("[0x{byte:02X}]")
    }
}

fn sensor(config: &InspectionConfig, count: u32, interval: Duration) -> Result<()> {
    let gpio = hardware::gpio_chip(config);
    let mut sensor = hardware::open_sensor(config, &gpio)?;
    for reading in 1..=count {
        match sensor.measure() {
            DistanceSample::Range { centimeters } => {
                let marker = if centimeters < config.detection.threshold_cm {
                    " (object)"
                } else {
                    ""
                };
                println!("#{reading:>2}: {centimeters:.1} cm{marker}");
            }
            DistanceSample::OutOfRange { centimeters } => {
                println!("#{reading:>2}: {centimeters:.1} cm out of range")
            }
            DistanceSample::NoEcho => println!("#{reading:>2}: no echo"),
            DistanceSample::Timeout => println!("#{reading:>2}: timeout"),
        }
        thread::sleep(interval);
    }
    Ok(())
}

fn camera(config: &InspectionConfig, output: &std::path::Path) -> Result<()> {
    let mut camera = hardware::open_camera(config);
    camera.acquire().context("failed to acquire camera")?;
    let captured = camera.capture(output);
    camera.release();
    let captured = captured.context("capture failed")?;

    let bytes = image_check(config)
        .verify(&captured.path)
        .context("captured image failed the sanity check")?;
    println!("captured {} ({bytes} bytes)", captured.path.display());
    Ok(())
}

fn classify(config: &InspectionConfig, image: &std::path::Path) -> Result<()> {
    if !image.is_file() {
        bail!("image {} does not exist", image.display());
    }
    image_check(config)
        .verify(image)
        .context("image failed the sanity check")?;

    let mut classifier = hardware::open_classifier(config)?;
    let class_id = classifier.classify(image).context("classification failed")?;
    let result = InspectionResult::from_class(class_id);
    println!(
        "class {class_id}: {}",
        if result.is_defect { "DEFECTIVE" } else { "NON DEFECTIVE" }
    );
    Ok(())
}

fn image_check(config: &InspectionConfig) -> ImageCheck {
    ImageCheck {
        min_bytes: config.camera.min_image_bytes,
        ..ImageCheck::default()
    }
}

fn servo(config: &InspectionConfig) -> Result<()> {
    let gpio = hardware::gpio_chip(config);
    let mut actuator = hardware::open_actuator(config, &gpio)?;
    for angle in [0, config.servo.reject_angle, 90] {
        println!("moving to {angle} degrees");
        actuator.move_to(ActuatorCommand::new(angle, SERVO_HOLD_MS))?;
    }
    actuator.rest()?;
    Ok(())
}

fn motor(config: &InspectionConfig, period_ns: u32, duty_ns: u32, run_for: Duration) -> Result<()> {
    let duty = DutyCycle::new(period_ns, duty_ns)?;
    let mut conveyor = PwmConveyor::new(PwmChannel::new(
        &config.conveyor.chip,
        config.conveyor.channel,
    ));
    conveyor.start(duty).context("failed to start motor")?;
    info!(
        period_ns,
        duty_ns,
        ratio = duty.ratio(),
        "motor running for {}s",
        run_for.as_secs()
    );
    thread::sleep(run_for);
    conveyor.stop().context("failed to stop motor")?;
    println!("motor stopped");
    Ok(())
}
