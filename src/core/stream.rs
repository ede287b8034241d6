//! Byte-stream transport for the session.
//!
//! Wraps the `serialport` crate behind two narrow seams: `ByteStream`, the
//! capability set the session and reader actually use (read, write, flush,
//! clone-for-reader), and `PortOpener`, which turns a validated `Config`
//! into an open stream. Tests substitute both with scripted fakes.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::config::{Config, Parity, StopBits};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("no device path set. use ':set path <device>' to pick one")]
    NoDevicePath,

    #[error("serial device '{path}' does not exist. pass a valid device path")]
    DeviceMissing {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to open '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to clone the port handle for reading: {0}")]
    CloneHandle(#[source] serialport::Error),

    #[error("invalid serial configuration: {0}")]
    Config(String),
}

/// The capability set consumed by the session (write side) and the reader
/// (read side).
///
/// `read` follows `io::Read` semantics with a timeout: an `Ok(0)` or an
/// error of kind `TimedOut` both mean "no data right now", anything else is
/// a hard failure.
pub trait ByteStream: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;

    /// A second handle onto the same stream for the reader task.
    fn try_clone_reader(&self) -> Result<Box<dyn ByteStream>, ConnectionError>;
}

/// Opens a byte stream for a configuration.
pub trait PortOpener: Send {
    fn open(&self, config: &Config) -> Result<Box<dyn ByteStream>, ConnectionError>;
}

/// Effective read timeout for a configuration.
///
/// At least one byte period (8 bits at the configured baud rate, plus a
/// one-microsecond guard) so the read call can never time out before a
/// single byte has had time to arrive on a slow link. A larger requested
/// timeout wins.
pub fn effective_timeout(config: &Config) -> Duration {
    let baud = u64::from(config.baud.max(1));
    let byte_period = Duration::from_nanos(8_000_000_000 / baud) + Duration::from_micros(1);
    match config.timeout {
        Some(requested) => requested.max(byte_period),
        None => byte_period,
    }
}

/// Production opener backed by `serialport`.
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(&self, config: &Config) -> Result<Box<dyn ByteStream>, ConnectionError> {
        if config.path.is_empty() {
            return Err(ConnectionError::NoDevicePath);
        }
        let timeout = effective_timeout(config);
        debug!(
            "opening {} at {} baud, read timeout {:?}",
            config.path, config.baud, timeout
        );
        let builder = serialport::new(config.path.as_str(), config.baud)
            .data_bits(data_bits(config.data_bits)?)
            .parity(parity(config.parity))
            .stop_bits(stop_bits(config.stop_bits))
            .timeout(timeout);
        match builder.open() {
            Ok(port) => Ok(Box::new(SerialStream { port })),
            Err(e) if e.kind() == serialport::ErrorKind::NoDevice => {
                Err(ConnectionError::DeviceMissing {
                    path: config.path.clone(),
                    source: e,
                })
            }
            Err(e) => Err(ConnectionError::Open {
                path: config.path.clone(),
                source: e,
            }),
        }
    }
}

struct SerialStream {
    port: Box<dyn serialport::SerialPort>,
}

impl ByteStream for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.port, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.port)
    }

    fn try_clone_reader(&self) -> Result<Box<dyn ByteStream>, ConnectionError> {
        let port = self.port.try_clone().map_err(ConnectionError::CloneHandle)?;
        Ok(Box::new(SerialStream { port }))
    }
}

fn data_bits(bits: u8) -> Result<serialport::DataBits, ConnectionError> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(ConnectionError::Config(format!(
            "{} data bits is out of range (5-8)",
            other
        ))),
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn stop_bits(stop_bits: StopBits) -> serialport::StopBits {
    match stop_bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}
