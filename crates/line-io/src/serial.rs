//! Raw 8N1 serial links with non-blocking reads.

use std::{
    io::{self, Read, Write},
    time::Duration,
};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::info;

use crate::{ByteLink, LineError};

pub const SUPPORTED_BAUD_RATES: [u32; 4] = [9_600, 19_200, 38_400, 115_200];

/// Serial device opened in raw mode. Reads never wait for data.
pub struct SerialLink {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn open(path: &str, baud: u32) -> Result<Self, LineError> {
        if !SUPPORTED_BAUD_RATES.contains(&baud) {
            return Err(LineError::UnsupportedBaud(baud));
        }

        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::ZERO)
            .open()
            .map_err(|source| LineError::Serial {
                port: path.to_string(),
                source,
            })?;

        let _ = port.clear(serialport::ClearBuffer::All);
        info!(port = path, baud, "serial link opened");
        Ok(Self {
            name: path.to_string(),
            port,
        })
    }

    fn io_error(&self, source: io::Error) -> LineError {
        LineError::SerialIo {
            port: self.name.clone(),
            source,
        }
    }
}

impl ByteLink for SerialLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LineError> {
        self.port
            .write_all(bytes)
            .and_then(|_| self.port.flush())
            .map_err(|err| self.io_error(err))
    }

    fn try_read_byte(&mut self) -> Result<Option<u8>, LineError> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(self.io_error(err)),
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        info!(port = %self.name, "serial link closed");
    }
}
