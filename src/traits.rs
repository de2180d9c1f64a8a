//! Core traits and types for the serial camera link abstraction.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CameraDescriptor;
use crate::decode::DecodeError;

/// Identifier of one camera module in the static port map.
pub type CameraId = u8;

/// Raw pixel layout produced by the sensor.
///
/// Selected by configuration; the decoder never inspects the data to guess it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Interleaved luma/chroma, `[Y0 U Y1 V]` per pixel pair.
    #[default]
    Yuv422,
    /// Big-endian 16-bit words, 5 bits red / 6 bits green / 5 bits blue.
    Rgb565,
}

impl PixelLayout {
    /// Bytes used by one pixel on the wire.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Yuv422 | Self::Rgb565 => 2,
        }
    }
}

/// Byte order of the interleaved layout, used to locate luma for grayscale output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LumaOrder {
    /// `[U Y V Y]`: luma on odd bytes.
    #[default]
    Uyvy,
    /// `[Y U Y V]`: luma on even bytes.
    Yuyv,
}

impl LumaOrder {
    /// Offset of the first luma byte within a pixel pair.
    #[must_use]
    pub const fn luma_offset(self) -> usize {
        match self {
            Self::Uyvy => 1,
            Self::Yuyv => 0,
        }
    }
}

/// Frame geometry and raw layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw pixel layout.
    pub layout: PixelLayout,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::new(320, 240, PixelLayout::Yuv422)
    }
}

impl FrameFormat {
    /// Create a new frame format.
    #[must_use]
    pub const fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            layout,
        }
    }

    /// Bytes per line.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// Exact byte count of one complete raw frame.
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.stride() * self.height as usize
    }
}

/// Error type for per-camera operations.
///
/// Every variant is confined to the camera it was raised for.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The serial port could not be opened.
    #[error("cannot open port {port}: {reason}")]
    LinkOpen {
        /// Device path that failed.
        port: String,
        /// Driver-level reason.
        reason: String,
    },
    /// A read or write on an open link failed.
    #[error("I/O error on port {port}: {source}")]
    LinkIo {
        /// Device path of the link.
        port: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The capture read ended before a full frame arrived.
    #[error("timed out: got {received} / {expected} bytes")]
    ShortRead {
        /// Bytes actually received.
        received: usize,
        /// Bytes of a complete frame.
        expected: usize,
    },
    /// The raw frame did not match the configured geometry.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The worker thread unwound before reporting.
    #[error("worker thread panicked")]
    WorkerPanicked,
    /// The worker thread could not be spawned.
    #[error("worker thread could not be started: {0}")]
    WorkerNotStarted(String),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// One exclusively owned connection to a camera module.
pub trait CameraLink: Send {
    /// Write raw bytes; no framing is added.
    fn write_command(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read until `len` bytes arrived or `timeout` elapsed.
    ///
    /// Returns what was accumulated, which may be shorter than `len`.
    /// A short read is not an error at this level.
    fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Drain whatever is currently buffered without waiting.
    fn read_available(&mut self) -> Result<Vec<u8>>;

    /// Discard bytes queued on the input side.
    fn reset_input_buffer(&mut self) -> Result<()>;
}

/// Opens links for camera descriptors.
///
/// Shared by all workers of a batch, so it must be usable from several threads.
pub trait LinkOpener: Sync {
    /// The link type produced by `open`.
    type Link: CameraLink;

    /// Open the link for one camera. Failures are reported as [`CameraError::LinkOpen`].
    fn open(&self, camera: &CameraDescriptor) -> Result<Self::Link>;
}
