//! Inspection cell core.
//!
//! - `control`: flags shared between the controller, the listener and the
//!   process signal handler.
//! - `display`: operator display protocol (field assignments + terminator).
//! - `uplink`: wireless telemetry lines.
//! - `listener`: background thread turning display input into commands.
//! - `pipeline`: the cycle state machine plus its config and telemetry.
//! - `state`: cycle states, verdicts and per-item results.

pub mod control;
pub mod display;
pub mod listener;
pub mod pipeline;
pub mod state;
pub mod uplink;

pub use control::{ControlFlags, SharedControl, wait_for_start};
pub use display::{DisplayCommand, FieldValue, StatusDisplay};
pub use listener::{Command, CommandListener, ListenerHandle, ListenerStats};
pub use pipeline::{
    config::{InspectionConfig, ResultFormat, RunArgs, TelemetryOptions, TimingSettings},
    controller::{
        CycleOutcome, CycleSettings, CycleTimings, Devices, InspectionController, RunSummary,
    },
    telemetry,
};
pub use state::{CorrelationId, CycleState, InspectionResult, Verdict};
pub use uplink::Uplink;
