use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use inspection::{RunArgs, TelemetryOptions};

#[derive(Debug, Parser)]
#[command(name = "inspection-app", version, about = "Conveyor inspection and sorting cell")]
pub struct Cli {
    #[command(subcommand)]
    pub command: CommandKind,
}

#[derive(Debug, Subcommand)]
pub enum CommandKind {
    /// Run the inspection loop until the operator stops it.
    Run(RunArgs),
    /// Exercise a single device.
    Diag(DiagArgs),
}

impl CommandKind {
    pub fn telemetry(&self) -> TelemetryOptions {
        match self {
            CommandKind::Run(args) => args.telemetry(),
            CommandKind::Diag(args) => TelemetryOptions {
                chrome_trace_path: None,
                verbose: args.verbose,
            },
        }
    }
}

#[derive(Debug, Args)]
pub struct DiagArgs {
    /// JSON configuration file describing the hardware map.
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
    /// Enable debug logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub target: DiagTarget,
}

#[derive(Debug, Subcommand)]
pub enum DiagTarget {
    /// Flash a button colour on the operator display.
    Display,
    /// Print raw bytes received from the operator display.
    Listen,
    /// Take a series of distance readings.
    Sensor {
        #[arg(long, default_value_t = 20)]
        count: u32,
        #[arg(long = "interval-ms", default_value_t = 250)]
        interval_ms: u64,
    },
    /// Capture one frame and sanity check it.
    Camera {
        #[arg(long, default_value = "test.jpg")]
        output: PathBuf,
    },
    /// Check and classify an existing image.
    Classify {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },
    /// Sweep the reject actuator.
    Servo,
    /// Run the conveyor motor for a few seconds.
    Motor {
        #[arg(long = "period-ns", default_value_t = 12_500)]
        period_ns: u32,
        #[arg(long = "duty-ns", default_value_t = 7_500)]
        duty_ns: u32,
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}
