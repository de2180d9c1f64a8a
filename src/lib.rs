//! Multicam-Capture: synchronized capture from serial-attached camera modules
//!
//! Each camera module sits behind its own serial port and speaks a tiny
//! line-oriented protocol. This library drives a whole set of them at once:
//! register upload, reset, and frame capture run on one thread per camera,
//! lined up behind a shared start gate so every module sees its first command
//! at the same moment. Links are abstracted behind traits, enabling both
//! production use with real hardware and testing with scripted mock links.

pub mod barrier;
pub mod batch;
pub mod config;
pub mod decode;
pub mod device;
pub mod logging;
pub mod registers;
pub mod traits;
pub mod validation;
pub mod worker;

#[cfg(test)]
pub mod mock;

pub use batch::{
    BatchError, BatchOptions, BatchOrchestrator, BatchResult, LivePreviewControl, LivePreviewError,
    NoLivePreview, ShotReport,
};
pub use config::{CameraDescriptor, CaptureConfig, ConfigError, ProtocolTiming};
pub use decode::{ColorKind, DecodeError, DecodedImage, FrameDecoder};
pub use device::{SerialLink, SerialOpener};
pub use registers::{
    compute_exposure, ExposureRegisters, RegisterMap, RegisterProgram, SensorTestPattern,
};
pub use traits::{
    CameraError, CameraId, CameraLink, FrameFormat, LinkOpener, LumaOrder, PixelLayout,
};
pub use worker::{Acknowledgment, CameraOutcome, CaptureMetadata, CapturedFrame, Mode};
