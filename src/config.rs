//! Static configuration: camera-to-port map, frame geometry and protocol timing.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::traits::{CameraId, FrameFormat, LumaOrder};

/// Baud rate of the camera modules' USB-serial bridge.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Read timeout for a full capture.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5_000;

/// One camera module and the device path it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    /// Small positive id, unique within the configuration.
    pub id: CameraId,
    /// Device path, e.g. `/dev/stm32_cam_1`.
    pub port: String,
}

impl CameraDescriptor {
    /// Create a new descriptor.
    pub fn new(id: CameraId, port: impl Into<String>) -> Self {
        Self {
            id,
            port: port.into(),
        }
    }
}

/// Delays around protocol commands, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolTiming {
    /// Pause after each `W` register write.
    pub register_pacing_ms: u64,
    /// Pause after `R`.
    pub reset_settle_ms: u64,
    /// Pause between `S` and the input-buffer reset.
    pub capture_pacing_ms: u64,
    /// Pause after asking the live preview to let go of the ports.
    pub live_disable_pause_ms: u64,
    /// Pause between the reset batch and the capture batch of a shot.
    pub shot_stabilize_ms: u64,
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            register_pacing_ms: 50,
            reset_settle_ms: 100,
            capture_pacing_ms: 50,
            live_disable_pause_ms: 500,
            shot_stabilize_ms: 500,
        }
    }
}

impl ProtocolTiming {
    /// All delays set to zero.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            register_pacing_ms: 0,
            reset_settle_ms: 0,
            capture_pacing_ms: 0,
            live_disable_pause_ms: 0,
            shot_stabilize_ms: 0,
        }
    }

    /// Pause after each register write.
    #[must_use]
    pub const fn register_pacing(&self) -> Duration {
        Duration::from_millis(self.register_pacing_ms)
    }

    /// Pause after a reset command.
    #[must_use]
    pub const fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    /// Pause after the capture trigger.
    #[must_use]
    pub const fn capture_pacing(&self) -> Duration {
        Duration::from_millis(self.capture_pacing_ms)
    }

    /// Pause after disabling live preview.
    #[must_use]
    pub const fn live_disable_pause(&self) -> Duration {
        Duration::from_millis(self.live_disable_pause_ms)
    }

    /// Pause inside a reset-then-capture shot.
    #[must_use]
    pub const fn shot_stabilize(&self) -> Duration {
        Duration::from_millis(self.shot_stabilize_ms)
    }
}

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON for [`CaptureConfig`].
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// Camera id 0 is reserved.
    #[error("camera id must be at least 1")]
    InvalidId,
    /// Two cameras share an id.
    #[error("duplicate camera id {0}")]
    DuplicateId(CameraId),
    /// Two cameras share a port.
    #[error("duplicate port {0}")]
    DuplicatePort(String),
    /// Interleaved frames carry pixel pairs.
    #[error("frame width {0} must be even")]
    OddWidth(u32),
}

/// Complete configuration of a capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Static camera-to-port map.
    pub cameras: Vec<CameraDescriptor>,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Capture read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Frame geometry and raw layout.
    pub format: FrameFormat,
    /// Luma position used for grayscale output.
    pub luma_order: LumaOrder,
    /// Command pacing.
    pub timing: ProtocolTiming,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cameras: vec![
                CameraDescriptor::new(2, "/dev/stm32_cam_1"),
                CameraDescriptor::new(3, "/dev/stm32_cam_2"),
                CameraDescriptor::new(1, "/dev/stm32_cam_3"),
                CameraDescriptor::new(4, "/dev/stm32_cam_4"),
            ],
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            format: FrameFormat::default(),
            luma_order: LumaOrder::default(),
            timing: ProtocolTiming::default(),
        }
    }
}

impl CaptureConfig {
    /// Load a JSON configuration file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants of the camera map and geometry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for camera in &self.cameras {
            if camera.id == 0 {
                return Err(ConfigError::InvalidId);
            }
            if !ids.insert(camera.id) {
                return Err(ConfigError::DuplicateId(camera.id));
            }
            if !ports.insert(camera.port.as_str()) {
                return Err(ConfigError::DuplicatePort(camera.port.clone()));
            }
        }
        if self.format.width % 2 != 0 {
            return Err(ConfigError::OddWidth(self.format.width));
        }
        Ok(())
    }

    /// Look up a camera by id.
    #[must_use]
    pub fn camera(&self, id: CameraId) -> Option<&CameraDescriptor> {
        self.cameras.iter().find(|camera| camera.id == id)
    }

    /// Ids of every configured camera, in ascending order.
    #[must_use]
    pub fn camera_ids(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self.cameras.iter().map(|camera| camera.id).collect();
        ids.sort_unstable();
        ids
    }

    /// Capture read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
