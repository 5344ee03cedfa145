//! Recording stand-ins for the cell hardware.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use inspection::{
    CycleSettings, CycleTimings, Devices, InspectionController, ResultFormat, SharedControl,
    StatusDisplay, Uplink,
};
use line_io::{
    Actuator, ActuatorCommand, ByteLink, Conveyor, DistanceSample, DutyCycle, LineError,
    OutputLine, RangeSensor, RejectSequence,
};
use ml_core::{Classifier, ClassifyError};
use video_ingest::{CaptureError, CapturedImage, ImageCheck, ImageSource};

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    ConveyorStart,
    ConveyorStop,
    Measure(DistanceSample),
    Acquire,
    Capture,
    Release,
    Classify,
    Move(u16),
    Rest,
    Defect(bool),
}

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, matcher: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| matcher(e)).count()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

pub struct MockConveyor {
    pub log: EventLog,
    pub fail_start: bool,
}

impl Conveyor for MockConveyor {
    fn start(&mut self, _duty: DutyCycle) -> Result<(), LineError> {
        if self.fail_start {
            return Err(LineError::Write {
                path: PathBuf::from("enable"),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }
        self.log.push(Event::ConveyorStart);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), LineError> {
        self.log.push(Event::ConveyorStop);
        Ok(())
    }
}

/// Replays samples, then repeats the last one.
pub struct ScriptedSensor {
    pub log: EventLog,
    samples: VecDeque<DistanceSample>,
    last: DistanceSample,
}

impl ScriptedSensor {
    pub fn new(log: EventLog, samples: &[DistanceSample]) -> Self {
        Self {
            log,
            samples: samples.iter().copied().collect(),
            last: DistanceSample::Range { centimeters: 100.0 },
        }
    }
}

impl RangeSensor for ScriptedSensor {
    fn measure(&mut self) -> DistanceSample {
        if let Some(sample) = self.samples.pop_front() {
            self.last = sample;
        }
        self.log.push(Event::Measure(self.last));
        self.last
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraBehavior {
    Jpeg,
    Tiny,
    FailAcquire,
    FailCapture,
}

pub struct MockCamera {
    pub log: EventLog,
    pub behavior: CameraBehavior,
}

impl ImageSource for MockCamera {
    fn acquire(&mut self) -> Result<(), CaptureError> {
        self.log.push(Event::Acquire);
        if self.behavior == CameraBehavior::FailAcquire {
            return Err(CaptureError::Open {
                uri: "/dev/video0".into(),
            });
        }
        Ok(())
    }

    fn capture(&mut self, path: &Path) -> Result<CapturedImage, CaptureError> {
        self.log.push(Event::Capture);
        let bytes = match self.behavior {
            CameraBehavior::FailCapture => {
                return Err(CaptureError::Backend {
                    status: "exit status: 1".into(),
                    stderr: "device busy".into(),
                });
            }
            CameraBehavior::Tiny => vec![0xFF, 0xD8, 0x00],
            _ => {
                let mut jpeg = vec![0xFF, 0xD8];
                jpeg.resize(512, 0);
                jpeg
            }
        };
        fs::write(path, &bytes)?;
        Ok(CapturedImage {
            path: path.to_path_buf(),
            bytes: bytes.len() as u64,
            captured_at: chrono::Utc::now(),
        })
    }

    fn release(&mut self) {
        self.log.push(Event::Release);
    }
}

pub struct MockClassifier {
    pub log: EventLog,
    pub class_id: Option<i32>,
    /// Raise shutdown from inside the cycle, as an operator would mid-item.
    pub shutdown_on_classify: Option<Arc<SharedControl>>,
}

impl Classifier for MockClassifier {
    fn classify(&mut self, _image: &Path) -> Result<i32, ClassifyError> {
        self.log.push(Event::Classify);
        if let Some(control) = self.shutdown_on_classify.as_ref() {
            control.request_shutdown();
        }
        self.class_id.ok_or(ClassifyError::Sentinel(-1))
    }
}

pub struct MockActuator {
    pub log: EventLog,
}

impl Actuator for MockActuator {
    fn move_to(&mut self, command: ActuatorCommand) -> Result<(), LineError> {
        self.log.push(Event::Move(command.angle_degrees));
        Ok(())
    }

    fn rest(&mut self) -> Result<(), LineError> {
        self.log.push(Event::Rest);
        Ok(())
    }
}

pub struct MockDefectLine {
    pub log: EventLog,
}

impl OutputLine for MockDefectLine {
    fn set_level(&mut self, high: bool) -> Result<(), LineError> {
        self.log.push(Event::Defect(high));
        Ok(())
    }
}

/// Byte link that records output and replays queued input.
#[derive(Clone, Default)]
pub struct RecordingLink {
    pub sent: Arc<Mutex<Vec<u8>>>,
    pub inbound: Arc<Mutex<VecDeque<u8>>>,
}

impl RecordingLink {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.sent.lock().unwrap()).into_owned()
    }

    /// Display frames without their terminators.
    pub fn frames(&self) -> Vec<String> {
        let sent = self.sent.lock().unwrap().clone();
        sent.split(|b| *b == 0xFF)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect()
    }

    /// Successive values written to `field.val`.
    pub fn values(&self, field: &str) -> Vec<i64> {
        let prefix = format!("{field}.val=");
        self.frames()
            .iter()
            .filter_map(|frame| frame.strip_prefix(&prefix))
            .filter_map(|value| value.parse().ok())
            .collect()
    }

    pub fn push_input(&self, byte: u8) {
        self.inbound.lock().unwrap().push_back(byte);
    }
}

impl ByteLink for RecordingLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LineError> {
        self.sent.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn try_read_byte(&mut self) -> Result<Option<u8>, LineError> {
        Ok(self.inbound.lock().unwrap().pop_front())
    }
}

pub struct Cell {
    pub log: EventLog,
    pub display_link: RecordingLink,
    pub uplink_link: RecordingLink,
    pub display: StatusDisplay,
    pub control: Arc<SharedControl>,
    pub image_dir: tempfile::TempDir,
}

pub struct CellBuilder {
    pub samples: Vec<DistanceSample>,
    pub camera: CameraBehavior,
    pub class_id: Option<i32>,
    pub poll: Duration,
    pub fail_conveyor_start: bool,
    pub result_format: ResultFormat,
    pub shutdown_on_classify: bool,
}

impl Default for CellBuilder {
    fn default() -> Self {
        Self {
            samples: vec![DistanceSample::Range { centimeters: 5.0 }],
            camera: CameraBehavior::Jpeg,
            class_id: Some(0),
            poll: Duration::from_millis(5),
            fail_conveyor_start: false,
            result_format: ResultFormat::Verdict,
            shutdown_on_classify: false,
        }
    }
}

pub fn cm(centimeters: f64) -> DistanceSample {
    DistanceSample::Range { centimeters }
}

impl CellBuilder {
    pub fn build(self) -> (Cell, InspectionController) {
        let log = EventLog::default();
        let display_link = RecordingLink::default();
        let uplink_link = RecordingLink::default();
        let display = StatusDisplay::new(Box::new(display_link.clone()));
        let control = Arc::new(SharedControl::new());
        let image_dir = tempfile::tempdir().unwrap();

        let devices = Devices {
            conveyor: Box::new(MockConveyor {
                log: log.clone(),
                fail_start: self.fail_conveyor_start,
            }),
            sensor: Box::new(ScriptedSensor::new(log.clone(), &self.samples)),
            camera: Box::new(MockCamera {
                log: log.clone(),
                behavior: self.camera,
            }),
            classifier: Box::new(MockClassifier {
                log: log.clone(),
                class_id: self.class_id,
                shutdown_on_classify: self
                    .shutdown_on_classify
                    .then(|| Arc::clone(&control)),
            }),
            actuator: Box::new(MockActuator { log: log.clone() }),
            defect_line: Box::new(MockDefectLine { log: log.clone() }),
        };
        let settings = CycleSettings {
            threshold_cm: 8.0,
            duty: DutyCycle::new(20_000_000, 1_500_000).unwrap(),
            image_path: image_dir.path().join("capture.jpg"),
            image_check: Some(ImageCheck::default()),
            reject: RejectSequence::default(),
            timings: CycleTimings {
                poll: self.poll,
                settle: Duration::from_millis(1),
                pre_action: Duration::from_millis(1),
                defect_strobe: Duration::from_millis(1),
                reset: Duration::from_millis(1),
            },
        };
        let controller = InspectionController::new(
            devices,
            display.clone(),
            Uplink::new(Box::new(uplink_link.clone()), self.result_format),
            Arc::clone(&control),
            settings,
        )
        .with_seed(42);

        (
            Cell {
                log,
                display_link,
                uplink_link,
                display,
                control,
                image_dir,
            },
            controller,
        )
    }
}
