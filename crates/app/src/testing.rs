//! Recording stand-ins for a whole cell, used to check the shutdown path.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use inspection::{CycleSettings, CycleTimings, Devices, ResultFormat, StatusDisplay, Uplink};
use line_io::{
    Actuator, ActuatorCommand, ByteLink, Conveyor, DistanceSample, DutyCycle, GpioChip,
    LineError, OutputLine, RangeSensor, RejectSequence,
};
use ml_core::{Classifier, ClassifyError};
use video_ingest::{CaptureError, CapturedImage, DeviceReclaimer, ImageSource};

use crate::hardware::{Cell, CellResources};

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    ConveyorStart,
    ConveyorStop,
    Rest,
    Defect(bool),
    Release,
    /// One display frame without its terminator.
    Display(String),
    LinkRead,
    LinkClosed,
}

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn first(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn last(&self, event: &Event) -> Option<usize> {
        self.events().iter().rposition(|e| e == event)
    }

    /// Events from the first `Display("blinkMode.val=0")` onwards.
    pub fn teardown_events(&self) -> Vec<Event> {
        let events = self.events();
        let start = events
            .iter()
            .position(|e| *e == offline_frame())
            .unwrap_or(events.len());
        events[start..].to_vec()
    }
}

pub fn offline_frame() -> Event {
    Event::Display("blinkMode.val=0".into())
}

pub fn online_frame() -> Event {
    Event::Display("blinkMode.val=1".into())
}

/// Order in which teardown puts the outputs into their safe state.
pub fn safe_state_sequence() -> Vec<Event> {
    vec![
        offline_frame(),
        Event::ConveyorStop,
        Event::Rest,
        Event::Defect(false),
        Event::Release,
        Event::LinkClosed,
    ]
}

struct RecordingConveyor {
    log: EventLog,
    fail_start: bool,
}

impl Conveyor for RecordingConveyor {
    fn start(&mut self, _duty: DutyCycle) -> Result<(), LineError> {
        if self.fail_start {
            return Err(LineError::Write {
                path: PathBuf::from("pwm0/enable"),
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

struct EmptyBelt;

impl RangeSensor for EmptyBelt {
    fn measure(&mut self) -> DistanceSample {
        DistanceSample::Range { centimeters: 100.0 }
    }
}

struct RecordingCamera {
    log: EventLog,
}

impl ImageSource for RecordingCamera {
    fn acquire(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn capture(&mut self, _path: &Path) -> Result<CapturedImage, CaptureError> {
        Err(CaptureError::NotAcquired)
    }

    fn release(&mut self) {
        self.log.push(Event::Release);
    }
}

struct NoModel;

impl Classifier for NoModel {
    fn classify(&mut self, _image: &Path) -> Result<i32, ClassifyError> {
        Err(ClassifyError::Sentinel(-1))
    }
}

struct RecordingActuator {
    log: EventLog,
}

impl Actuator for RecordingActuator {
    fn move_to(&mut self, _command: ActuatorCommand) -> Result<(), LineError> {
        Ok(())
    }

    fn rest(&mut self) -> Result<(), LineError> {
        self.log.push(Event::Rest);
        Ok(())
    }
}

struct RecordingLine {
    log: EventLog,
}

impl OutputLine for RecordingLine {
    fn set_level(&mut self, high: bool) -> Result<(), LineError> {
        self.log.push(Event::Defect(high));
        Ok(())
    }
}

/// Display link that logs frames, reads and its own close.
struct RecordingDisplayLink {
    log: EventLog,
}

impl ByteLink for RecordingDisplayLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LineError> {
        let body = bytes
            .iter()
            .position(|b| *b == 0xFF)
            .map_or(bytes, |end| &bytes[..end]);
        self.log
            .push(Event::Display(String::from_utf8_lossy(body).into_owned()));
        Ok(())
    }

    fn try_read_byte(&mut self) -> Result<Option<u8>, LineError> {
        self.log.push(Event::LinkRead);
        Ok(None)
    }
}

impl Drop for RecordingDisplayLink {
    fn drop(&mut self) {
        self.log.push(Event::LinkClosed);
    }
}

struct SinkLink;

impl ByteLink for SinkLink {
    fn send(&mut self, _bytes: &[u8]) -> Result<(), LineError> {
        Ok(())
    }

    fn try_read_byte(&mut self) -> Result<Option<u8>, LineError> {
        Ok(None)
    }
}

pub struct TestCell {
    pub log: EventLog,
    pub cell: Cell,
    _root: tempfile::TempDir,
}

pub fn test_cell(fail_conveyor_start: bool) -> TestCell {
    let log = EventLog::default();
    let root = tempfile::tempdir().unwrap();
    let proc_root = root.path().join("proc");
    std::fs::create_dir(&proc_root).unwrap();

    let devices = Devices {
        conveyor: Box::new(RecordingConveyor {
            log: log.clone(),
            fail_start: fail_conveyor_start,
        }),
        sensor: Box::new(EmptyBelt),
        camera: Box::new(RecordingCamera { log: log.clone() }),
        classifier: Box::new(NoModel),
        actuator: Box::new(RecordingActuator { log: log.clone() }),
        defect_line: Box::new(RecordingLine { log: log.clone() }),
    };
    let cell = Cell {
        devices,
        display: StatusDisplay::new(Box::new(RecordingDisplayLink { log: log.clone() })),
        uplink: Uplink::new(Box::new(SinkLink), ResultFormat::Verdict),
        resources: CellResources::new(
            DeviceReclaimer::default().with_proc_root(&proc_root),
            root.path().join("video0"),
            Arc::new(GpioChip::new(root.path().join("gpio"), 512)),
        ),
    };

    TestCell {
        log,
        cell,
        _root: root,
    }
}

pub fn fast_settings(image_dir: &Path) -> CycleSettings {
    CycleSettings {
        threshold_cm: 8.0,
        duty: DutyCycle::new(20_000_000, 1_500_000).unwrap(),
        image_path: image_dir.join("capture.jpg"),
        image_check: None,
        reject: RejectSequence::default(),
        timings: CycleTimings {
            poll: Duration::from_millis(5),
            settle: Duration::from_millis(1),
            pre_action: Duration::from_millis(1),
            defect_strobe: Duration::from_millis(1),
            reset: Duration::from_millis(1),
        },
    }
}
