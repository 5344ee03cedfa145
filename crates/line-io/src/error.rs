use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LineError {
    #[error("gpio line {line} is already claimed")]
    Busy { line: u32 },
    #[error("failed to export {what} via {path:?}")]
    Export {
        what: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{what} did not appear at {path:?} after export")]
    ExportTimeout { what: String, path: PathBuf },
    #[error("failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid duty cycle: {duty_ns} ns exceeds period {period_ns} ns")]
    InvalidDuty { period_ns: u32, duty_ns: u32 },
    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(u32),
    #[error("serial port {port:?} failed")]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial link {port:?} i/o failed")]
    SerialIo {
        port: String,
        #[source]
        source: io::Error,
    },
}
