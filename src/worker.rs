//! Per-camera protocol driver.
//!
//! Commands are newline-terminated ASCII:
//!
//! - `W {address:04X} {value:02X}` programs one sensor register
//! - `R` resets the sensor
//! - `S` triggers one frame, answered by exactly one raw frame and no framing

use std::fmt::{self, Write as _};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::barrier::GateTicket;
use crate::config::{CameraDescriptor, ProtocolTiming};
use crate::decode::{DecodedImage, FrameDecoder};
use crate::registers::RegisterMap;
use crate::traits::{CameraError, CameraId, CameraLink, LinkOpener, Result};

/// Reset command.
pub const CMD_RESET: &[u8] = b"R\n";
/// Capture trigger.
pub const CMD_CAPTURE: &[u8] = b"S\n";

/// Format one register write command.
pub fn register_command(address: u16, value: u8) -> String {
    format!("W {address:04X} {value:02X}\n")
}

/// Operation applied to every camera of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Program registers, then reset.
    Update,
    /// Reset only.
    Reset,
    /// Acquire one frame.
    Capture,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Update => "UPDATE",
            Self::Reset => "RESET",
            Self::Capture => "CAPTURE",
        })
    }
}

/// Parameters of a capture.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Decoder for the configured layout.
    pub decoder: FrameDecoder,
    /// Read timeout for the whole frame.
    pub timeout: Duration,
    /// Batch the frame belongs to.
    pub batch_id: Option<String>,
    /// Single-shot live frame.
    pub live: bool,
    /// Log the raw frame as hex.
    pub dump_hex: bool,
}

/// Work handed to one worker; each worker owns its copy.
#[derive(Debug, Clone)]
pub enum Task {
    /// Upload this register map, then reset.
    Update(RegisterMap),
    /// Reset only.
    Reset,
    /// Capture one frame.
    Capture(CaptureRequest),
}

impl Task {
    /// Mode this task runs in.
    pub const fn mode(&self) -> Mode {
        match self {
            Self::Update(_) => Mode::Update,
            Self::Reset => Mode::Reset,
            Self::Capture(_) => Mode::Capture,
        }
    }
}

/// Metadata handed to image consumers with each frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureMetadata {
    /// Camera that produced the frame.
    pub camera: CameraId,
    /// Batch identifier, if any.
    pub batch_id: Option<String>,
    /// Whether this is a live single-shot.
    pub live: bool,
    /// When the frame finished arriving.
    pub captured_at: DateTime<Utc>,
}

/// A decoded frame and where it came from.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Decoded pixels.
    pub image: DecodedImage,
    /// Provenance.
    pub metadata: CaptureMetadata,
}

/// Protocol acknowledgment for non-capture modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgment {
    /// Registers were uploaded and the sensor reset.
    RegistersApplied {
        /// Registers transmitted.
        count: usize,
    },
    /// The sensor was reset.
    Reset {
        /// Text the module sent back, not parsed.
        response: String,
    },
}

impl fmt::Display for Acknowledgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegistersApplied { count } => {
                write!(f, "{count} registers applied, camera reset")
            }
            Self::Reset { response } => write!(f, "reset response: {response}"),
        }
    }
}

/// Result of one camera's part in a batch.
#[derive(Debug)]
pub enum CameraOutcome {
    /// A frame was captured and decoded.
    Captured(Box<CapturedFrame>),
    /// An UPDATE or RESET completed.
    Acknowledged(Acknowledgment),
    /// This camera failed; others are unaffected.
    Failed(CameraError),
}

impl CameraOutcome {
    /// Whether the camera completed its task.
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// The error, if the camera failed.
    pub const fn error(&self) -> Option<&CameraError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// The captured frame, if any.
    pub fn frame(&self) -> Option<&CapturedFrame> {
        match self {
            Self::Captured(frame) => Some(frame.as_ref()),
            _ => None,
        }
    }

    /// The acknowledgment, if any.
    pub const fn acknowledgment(&self) -> Option<&Acknowledgment> {
        match self {
            Self::Acknowledged(ack) => Some(ack),
            _ => None,
        }
    }
}

fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Drives one exclusively owned link through the protocol.
pub struct CameraWorker<'a, L: CameraLink> {
    camera: &'a CameraDescriptor,
    link: L,
    timing: ProtocolTiming,
}

impl<'a, L: CameraLink> CameraWorker<'a, L> {
    /// Wrap an open link.
    pub const fn new(camera: &'a CameraDescriptor, link: L, timing: ProtocolTiming) -> Self {
        Self {
            camera,
            link,
            timing,
        }
    }

    /// Upload every register in order, then reset.
    pub fn update(&mut self, registers: &RegisterMap) -> Result<Acknowledgment> {
        let camera = self.camera.id;
        info!(camera, "uploading {} registers", registers.len());

        self.link.reset_input_buffer()?;
        for (address, value) in registers.iter() {
            self.link
                .write_command(register_command(address, value).as_bytes())?;
            thread::sleep(self.timing.register_pacing());
        }

        info!(camera, "upload complete, sending reset");
        self.link.write_command(CMD_RESET)?;
        thread::sleep(self.timing.reset_settle());
        info!(camera, "registers applied and camera reset");

        Ok(Acknowledgment::RegistersApplied {
            count: registers.len(),
        })
    }

    /// Reset and collect whatever the module answers.
    pub fn reset(&mut self) -> Result<Acknowledgment> {
        let camera = self.camera.id;
        info!(camera, "sending reset command");

        self.link.write_command(CMD_RESET)?;
        thread::sleep(self.timing.reset_settle());
        let raw = self.link.read_available()?;
        let response = String::from_utf8_lossy(&raw).trim().to_owned();

        info!(camera, "reset response: {response}");
        Ok(Acknowledgment::Reset { response })
    }

    /// Trigger, read exactly one frame and decode it.
    pub fn capture(&mut self, request: &CaptureRequest) -> Result<CapturedFrame> {
        let camera = self.camera.id;
        let expected = request.decoder.format().frame_size();

        self.link.write_command(CMD_CAPTURE)?;
        thread::sleep(self.timing.capture_pacing());
        self.link.reset_input_buffer()?;

        let data = self.link.read_exact(expected, request.timeout)?;
        if data.len() != expected {
            error!(camera, "timed out, got {} / {expected} bytes", data.len());
            return Err(CameraError::ShortRead {
                received: data.len(),
                expected,
            });
        }

        info!(camera, "frame received");
        if request.dump_hex {
            info!(camera, "hex dump: {}", hex_dump(&data));
        }

        let image = request.decoder.decode(&data)?;
        Ok(CapturedFrame {
            image,
            metadata: CaptureMetadata {
                camera,
                batch_id: request.batch_id.clone(),
                live: request.live,
                captured_at: Utc::now(),
            },
        })
    }

    /// Run one task and fold any error into the outcome.
    pub fn execute(&mut self, task: &Task) -> CameraOutcome {
        let result = match task {
            Task::Update(registers) => self.update(registers).map(CameraOutcome::Acknowledged),
            Task::Reset => self.reset().map(CameraOutcome::Acknowledged),
            Task::Capture(request) => self
                .capture(request)
                .map(|frame| CameraOutcome::Captured(Box::new(frame))),
        };
        result.unwrap_or_else(|err| {
            error!(camera = self.camera.id, "{err}");
            CameraOutcome::Failed(err)
        })
    }
}

/// Whole life of one worker thread: open, wait at the gate, run the task.
///
/// A failed open still passes the gate, so the failure is reported after
/// release like every other outcome.
pub fn run_worker<O: LinkOpener>(
    opener: &O,
    camera: &CameraDescriptor,
    timing: ProtocolTiming,
    ticket: GateTicket<'_>,
    task: &Task,
) -> CameraOutcome {
    let link = opener.open(camera);
    debug!(camera = camera.id, port = %camera.port, "waiting at start gate");
    ticket.wait();

    match link {
        Ok(link) => CameraWorker::new(camera, link, timing).execute(task),
        Err(err) => {
            error!(camera = camera.id, port = %camera.port, "port error: {err}");
            CameraOutcome::Failed(err)
        }
    }
}
