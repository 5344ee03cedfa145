//! Operator display link.
//!
//! Outbound frames are ASCII field assignments (`state.val=2`,
//! `t0.txt="ready"`) followed by three `0xFF` bytes. Inbound traffic is single
//! raw bytes. The link is shared by the controller (writes) and the command
//! listener (reads); every access holds the link mutex for one frame or one
//! byte only.

use std::sync::{Arc, Mutex, MutexGuard};

use line_io::{ByteLink, LineError};

use crate::state::{CycleState, Verdict};

pub const FRAME_TERMINATOR: [u8; 3] = [0xFF, 0xFF, 0xFF];

pub const FIELD_STATE: &str = "state";
pub const FIELD_VERDICT: &str = "pf";
pub const FIELD_PRODUCT: &str = "prdID";
pub const FIELD_ONLINE: &str = "blinkMode";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Number(i64),
    Text(String),
}

/// One display assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayCommand {
    pub field: String,
    pub value: FieldValue,
}

impl DisplayCommand {
    pub fn number(field: impl Into<String>, value: i64) -> Self {
        Self {
            field: field.into(),
            value: FieldValue::Number(value),
        }
    }

    pub fn text(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: FieldValue::Text(value.into()),
        }
    }

    /// Raw instruction sent without any field suffix, e.g. `b1.bco=2016`.
    pub fn raw_frame(instruction: &str) -> Vec<u8> {
        let mut frame = instruction.as_bytes().to_vec();
        frame.extend_from_slice(&FRAME_TERMINATOR);
        frame
    }

    /// Encoded bytes including the terminator.
    pub fn encode(&self) -> Vec<u8> {
        let body = match &self.value {
            FieldValue::Number(value) => format!("{}.val={value}", self.field),
            FieldValue::Text(text) => format!("{}.txt=\"{}\"", self.field, text.replace('"', "\\\"")),
        };
        Self::raw_frame(&body)
    }
}

/// Shared handle to the operator display.
#[derive(Clone)]
pub struct StatusDisplay {
    link: Arc<Mutex<Box<dyn ByteLink>>>,
}

impl StatusDisplay {
    pub fn new(link: Box<dyn ByteLink>) -> Self {
        Self {
            link: Arc::new(Mutex::new(link)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn ByteLink>> {
        match self.link.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn send(&self, command: &DisplayCommand) -> Result<(), LineError> {
        let frame = command.encode();
        self.lock().send(&frame)
    }

    pub fn send_raw(&self, instruction: &str) -> Result<(), LineError> {
        let frame = DisplayCommand::raw_frame(instruction);
        self.lock().send(&frame)
    }

    pub fn set_number(&self, field: &str, value: i64) -> Result<(), LineError> {
        self.send(&DisplayCommand::number(field, value))
    }

    pub fn set_text(&self, field: &str, value: &str) -> Result<(), LineError> {
        self.send(&DisplayCommand::text(field, value))
    }

    pub fn show_state(&self, state: CycleState) -> Result<(), LineError> {
        self.set_number(FIELD_STATE, state.code())
    }

    pub fn show_verdict(&self, verdict: Verdict) -> Result<(), LineError> {
        self.set_number(FIELD_VERDICT, verdict.code())
    }

    pub fn show_product(&self, class_id: i32) -> Result<(), LineError> {
        self.set_number(FIELD_PRODUCT, i64::from(class_id))
    }

    pub fn set_online(&self, online: bool) -> Result<(), LineError> {
        self.set_number(FIELD_ONLINE, i64::from(online))
    }

    /// Zero state, verdict and product fields.
    pub fn clear(&self) -> Result<(), LineError> {
        self.show_state(CycleState::Idle)?;
        self.show_verdict(Verdict::None)?;
        self.show_product(0)
    }

    /// Non-blocking read of one inbound byte.
    pub fn poll_byte(&self) -> Result<Option<u8>, LineError> {
        self.lock().try_read_byte()
    }
}
