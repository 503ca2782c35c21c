// Byte transport used by the device I/O loops
//
// The loops only need "give me whatever arrived within a short timeout" and
// "send this frame", so the serial port sits behind a small trait that tests
// replace with a scripted stream.

use serialport::{self, ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

use crate::shm::ShmError;

/// Read timeout; bounds how long one loop iteration can block
pub const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Transport or shared-memory failure inside a device worker. Fatal to the loop.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Shared memory error: {0}")]
    Shm(#[from] ShmError),
}

pub trait Transport {
    /// Read available bytes into `buf`. Returns 0 when nothing arrived before the timeout.
    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write a whole frame
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// 8N1 serial line with a short read timeout
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, baudrate: u32) -> Result<Self, DeviceError> {
        let port = serialport::new(path, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()?;

        // The device streams as soon as the port opens; start from a clean buffer
        port.clear(ClearBuffer::All)?;
        debug!("Opened {} at {} baud", path, baudrate);

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }
}
