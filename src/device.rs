//! Serial link implementation using the serialport crate.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::debug;

use crate::config::{CameraDescriptor, CaptureConfig};
use crate::traits::{CameraError, CameraLink, LinkOpener, Result};

/// Serial connection to one camera module, 8N1.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialLink {
    /// Open `path` at `baud_rate` with `timeout` as the default read timeout.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout)
            .open()
            .map_err(|err| CameraError::LinkOpen {
                port: path.to_owned(),
                reason: err.to_string(),
            })?;

        debug!(port = path, baud_rate, "serial link open");
        Ok(Self {
            port,
            path: path.to_owned(),
        })
    }

    /// Device path of this link.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn io_error<E: Into<io::Error>>(&self, source: E) -> CameraError {
        CameraError::LinkIo {
            port: self.path.clone(),
            source: source.into(),
        }
    }
}

impl CameraLink for SerialLink {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .write_all(bytes)
            .and_then(|()| self.port.flush())
            .map_err(|err| self.io_error(err))
    }

    fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; len];
        let mut filled = 0;

        while filled < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port
                .set_timeout(remaining)
                .map_err(|err| self.io_error(err))?;

            let Some(window) = buf.get_mut(filled..) else {
                break;
            };
            match self.port.read(window) {
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(self.io_error(err)),
            }
        }

        buf.truncate(filled);
        Ok(buf)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let pending = self
            .port
            .bytes_to_read()
            .map_err(|err| self.io_error(err))? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending];
        match self.port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn reset_input_buffer(&mut self) -> Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|err| self.io_error(err))
    }
}

/// Opens [`SerialLink`]s with shared line settings.
#[derive(Debug, Clone, Copy)]
pub struct SerialOpener {
    baud_rate: u32,
    timeout: Duration,
}

impl SerialOpener {
    /// Opener with explicit settings.
    #[must_use]
    pub const fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self { baud_rate, timeout }
    }

    /// Opener using the configured baud rate and read timeout.
    #[must_use]
    pub const fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.baud_rate, config.read_timeout())
    }
}

impl LinkOpener for SerialOpener {
    type Link = SerialLink;

    fn open(&self, camera: &CameraDescriptor) -> Result<SerialLink> {
        SerialLink::open(&camera.port, self.baud_rate, self.timeout)
    }
}
