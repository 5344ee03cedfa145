//! Wireless telemetry lines: `ID:<n>\n` then `RESULT:<..>\n` per item.

use line_io::{ByteLink, LineError};

use crate::{
    pipeline::config::ResultFormat,
    state::{CorrelationId, InspectionResult},
};

pub fn correlation_line(id: CorrelationId) -> String {
    format!("ID:{id}\n")
}

pub fn result_line(format: ResultFormat, result: &InspectionResult) -> String {
    match format {
        ResultFormat::Verdict if result.is_defect => "RESULT:DEFECTIVE\n".to_string(),
        ResultFormat::Verdict => "RESULT:NON DEFECTIVE\n".to_string(),
        ResultFormat::Class => format!("RESULT:CLASS_{}\n", result.class_id),
    }
}

/// Telemetry link owned by the controller.
pub struct Uplink {
    link: Box<dyn ByteLink>,
    format: ResultFormat,
}

impl Uplink {
    pub fn new(link: Box<dyn ByteLink>, format: ResultFormat) -> Self {
        Self { link, format }
    }

    pub fn send_correlation(&mut self, id: CorrelationId) -> Result<(), LineError> {
        self.link.send(correlation_line(id).as_bytes())
    }

    pub fn send_result(&mut self, result: &InspectionResult) -> Result<(), LineError> {
        self.link.send(result_line(self.format, result).as_bytes())
    }
}
