//! Inspection cycle state machine.
//!
//! One cycle: run the belt and scan for an item, stop, let it settle, image
//! and classify it, then accept or reject and reset. Shutdown is observed at
//! every scan poll and at each `Idle` entry. Once an item is detected the
//! cycle always runs to `Resetting`; capture and actuation are not safely
//! abortable part way through.

use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use line_io::{Actuator, Conveyor, DutyCycle, OutputLine, RangeSensor, RejectSequence};
use ml_core::Classifier;
use rand::{SeedableRng, rngs::StdRng};
use tracing::{Span, debug, info, warn};
use video_ingest::{ImageCheck, ImageSource};

use crate::{
    control::SharedControl,
    display::StatusDisplay,
    pipeline::config::InspectionConfig,
    state::{CorrelationId, CycleState, InspectionResult},
    uplink::Uplink,
};

/// External collaborators driven by the controller.
pub struct Devices {
    pub conveyor: Box<dyn Conveyor>,
    pub sensor: Box<dyn RangeSensor>,
    pub camera: Box<dyn ImageSource>,
    pub classifier: Box<dyn Classifier>,
    pub actuator: Box<dyn Actuator>,
    pub defect_line: Box<dyn OutputLine>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleTimings {
    /// Interval between proximity polls while scanning.
    pub poll: Duration,
    /// Vibration decay before imaging.
    pub settle: Duration,
    /// Pause between the result and the accept/reject action.
    pub pre_action: Duration,
    /// How long the defect line is held high.
    pub defect_strobe: Duration,
    pub reset: Duration,
}

impl Default for CycleTimings {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(50),
            settle: Duration::from_millis(500),
            pre_action: Duration::from_secs(1),
            defect_strobe: Duration::from_secs(1),
            reset: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CycleSettings {
    pub threshold_cm: f64,
    pub duty: DutyCycle,
    pub image_path: PathBuf,
    /// Sanity check on each captured frame; `None` disables it.
    pub image_check: Option<ImageCheck>,
    pub reject: RejectSequence,
    pub timings: CycleTimings,
}

impl CycleSettings {
    pub fn from_config(config: &InspectionConfig) -> Result<Self> {
        let duty = DutyCycle::new(config.conveyor.period_ns, config.conveyor.duty_ns)
            .context("invalid conveyor duty cycle")?;
        let image_check = config.camera.check_image.then(|| ImageCheck {
            min_bytes: config.camera.min_image_bytes,
            ..ImageCheck::default()
        });
        let timings = &config.timings;
        Ok(Self {
            threshold_cm: config.detection.threshold_cm,
            duty,
            image_path: config.camera.image_path.clone(),
            image_check,
            reject: RejectSequence {
                reject_angle: config.servo.reject_angle,
                home_hold_ms: config.servo.home_hold_ms,
                push_hold_ms: config.servo.push_hold_ms,
                return_hold_ms: config.servo.return_hold_ms,
            },
            timings: CycleTimings {
                poll: Duration::from_millis(timings.poll_ms),
                settle: Duration::from_millis(timings.settle_ms),
                pre_action: Duration::from_millis(timings.pre_action_ms),
                defect_strobe: Duration::from_millis(timings.defect_strobe_ms),
                reset: Duration::from_millis(timings.reset_ms),
            },
        })
    }
}

/// How one call to [`InspectionController::run_cycle`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Shutdown observed while idle or scanning; the conveyor is stopped.
    Shutdown,
    /// Capture, image check or classification failed; back to `Idle`.
    Abandoned(&'static str),
    Accepted(InspectionResult),
    Rejected(InspectionResult),
}

impl CycleOutcome {
    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Shutdown => "shutdown",
            CycleOutcome::Abandoned(_) => "abandoned",
            CycleOutcome::Accepted(_) => "accepted",
            CycleOutcome::Rejected(_) => "rejected",
        }
    }
}

/// Totals for one [`InspectionController::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub abandoned: u64,
}

pub struct InspectionController {
    devices: Devices,
    display: StatusDisplay,
    uplink: Uplink,
    control: Arc<SharedControl>,
    settings: CycleSettings,
    rng: StdRng,
    state: CycleState,
    cycles: u64,
}

impl InspectionController {
    pub fn new(
        devices: Devices,
        display: StatusDisplay,
        uplink: Uplink,
        control: Arc<SharedControl>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            devices,
            display,
            uplink,
            control,
            settings,
            rng: StdRng::from_entropy(),
            state: CycleState::Idle,
            cycles: 0,
        }
    }

    /// Seed the correlation id generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Hand the devices back for teardown.
    pub fn into_parts(self) -> (Devices, StatusDisplay, Uplink) {
        (self.devices, self.display, self.uplink)
    }

    /// Run cycles until shutdown. Only conveyor failures at `Idle` are
    /// returned as errors; per-item failures abandon the cycle and continue.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        info!(
            threshold_cm = self.settings.threshold_cm,
            "inspection controller running"
        );
        loop {
            let outcome = self.run_cycle()?;
            match outcome {
                CycleOutcome::Shutdown => break,
                CycleOutcome::Abandoned(_) => summary.abandoned += 1,
                CycleOutcome::Accepted(_) => summary.accepted += 1,
                CycleOutcome::Rejected(_) => summary.rejected += 1,
            }
            summary.cycles += 1;
        }
        info!(?summary, "inspection controller stopped");
        Ok(summary)
    }

    /// One pass from `Idle` back to `Idle`.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.cycles += 1;
        let span = tracing::info_span!(
            "inspection.cycle",
            cycle = self.cycles,
            correlation_id = tracing::field::Empty
        );
        let _guard = span.enter();

        // `clear` reports the idle state along with the zeroed fields.
        self.state = CycleState::Idle;
        self.show(|display| display.clear());
        if self.control.shutdown_requested() {
            self.stop_conveyor();
            return Ok(CycleOutcome::Shutdown);
        }

        self.devices
            .conveyor
            .start(self.settings.duty)
            .context("failed to start conveyor")?;

        if !self.scan()? {
            return Ok(CycleOutcome::Shutdown);
        }
        let started = Instant::now();

        self.enter(CycleState::ObjectDetected);
        thread::sleep(self.settings.timings.settle);

        self.enter(CycleState::Processing);
        let result = match self.inspect(&span) {
            Ok(result) => result,
            Err(reason) => {
                metrics::counter!("inspection_cycles_total", "outcome" => "abandoned")
                    .increment(1);
                self.enter(CycleState::Idle);
                return Ok(CycleOutcome::Abandoned(reason));
            }
        };

        thread::sleep(self.settings.timings.pre_action);
        let outcome = if result.is_defect {
            self.reject(result)
        } else {
            self.accept(result)
        };

        self.enter(CycleState::Resetting);
        thread::sleep(self.settings.timings.reset);

        metrics::counter!("inspection_cycles_total", "outcome" => outcome.label()).increment(1);
        metrics::histogram!("inspection_cycle_seconds").record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Poll the sensor until an item is in range (`true`) or shutdown is
    /// requested (`false`). The conveyor is stopped either way.
    fn scan(&mut self) -> Result<bool> {
        let mut polls: u64 = 0;
        loop {
            if self.control.shutdown_requested() {
                debug!(polls, "shutdown while scanning");
                self.stop_conveyor();
                return Ok(false);
            }

            let sample = self.devices.sensor.measure();
            polls += 1;
            if let Some(cm) = sample.centimeters() {
                metrics::gauge!("inspection_last_distance_cm").set(cm);
            }
            if sample.is_within(self.settings.threshold_cm) {
                self.devices
                    .conveyor
                    .stop()
                    .context("failed to stop conveyor on detection")?;
                info!(?sample, polls, "item detected");
                return Ok(true);
            }

            thread::sleep(self.settings.timings.poll);
        }
    }

    /// Capture and classify the item. The camera is released on every path.
    fn inspect(&mut self, span: &Span) -> std::result::Result<InspectionResult, &'static str> {
        let result = self.capture_and_classify(span);
        self.devices.camera.release();
        let result = result?;

        self.send_uplink(|uplink| uplink.send_result(&result));
        self.show(|display| display.show_product(result.class_id));
        Ok(result)
    }

    fn capture_and_classify(
        &mut self,
        span: &Span,
    ) -> std::result::Result<InspectionResult, &'static str> {
        let path = self.settings.image_path.clone();

        let captured = self
            .devices
            .camera
            .acquire()
            .and_then(|()| self.devices.camera.capture(&path));
        if let Err(err) = captured {
            warn!("capture failed: {err}");
            metrics::counter!("inspection_capture_failures_total").increment(1);
            return Err("capture");
        }

        if let Some(check) = self.settings.image_check.as_ref() {
            if let Err(err) = check.verify(&path) {
                warn!("captured image rejected: {err}");
                metrics::counter!("inspection_capture_failures_total").increment(1);
                return Err("image check");
            }
        }

        let id = CorrelationId::generate(&mut self.rng);
        span.record("correlation_id", id.value());
        self.send_uplink(|uplink| uplink.send_correlation(id));

        match self.devices.classifier.classify(&path) {
            Ok(class_id) => {
                let result = InspectionResult::from_class(class_id);
                info!(class_id, defect = result.is_defect, "item classified");
                Ok(result)
            }
            Err(err) => {
                warn!("classification failed: {err}");
                metrics::counter!("inspection_classify_failures_total").increment(1);
                Err("classify")
            }
        }
    }

    fn reject(&mut self, result: InspectionResult) -> CycleOutcome {
        self.enter(CycleState::Rejected);
        self.show(|display| display.show_verdict(result.verdict()));

        self.strobe_defect_line();
        self.restart_conveyor();
        if let Err(err) = self.settings.reject.run(self.devices.actuator.as_mut()) {
            warn!("reject sequence failed: {err}");
        }
        CycleOutcome::Rejected(result)
    }

    fn accept(&mut self, result: InspectionResult) -> CycleOutcome {
        self.enter(CycleState::Accepted);
        self.show(|display| display.show_verdict(result.verdict()));
        self.restart_conveyor();
        CycleOutcome::Accepted(result)
    }

    fn strobe_defect_line(&mut self) {
        if let Err(err) = self.devices.defect_line.set_level(true) {
            warn!("failed to raise defect line: {err}");
            return;
        }
        thread::sleep(self.settings.timings.defect_strobe);
        if let Err(err) = self.devices.defect_line.set_level(false) {
            warn!("failed to lower defect line: {err}");
        }
    }

    fn restart_conveyor(&mut self) {
        if let Err(err) = self.devices.conveyor.start(self.settings.duty) {
            warn!("failed to restart conveyor: {err}");
        }
    }

    fn stop_conveyor(&mut self) {
        if let Err(err) = self.devices.conveyor.stop() {
            warn!("failed to stop conveyor: {err}");
        }
    }

    fn enter(&mut self, state: CycleState) {
        debug!(from = self.state.label(), to = state.label(), "state transition");
        self.state = state;
        self.show(|display| display.show_state(state));
    }

    fn show<F>(&self, write: F)
    where
        F: FnOnce(&StatusDisplay) -> std::result::Result<(), line_io::LineError>,
    {
        if let Err(err) = write(&self.display) {
            warn!("display update failed: {err}");
        }
    }

    fn send_uplink<F>(&mut self, write: F)
    where
        F: FnOnce(&mut Uplink) -> std::result::Result<(), line_io::LineError>,
    {
        if let Err(err) = write(&mut self.uplink) {
            warn!("telemetry write failed: {err}");
        }
    }
}
