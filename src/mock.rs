//! Scripted links and test patterns for testing without hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::CameraDescriptor;
use crate::traits::{
    CameraError, CameraId, CameraLink, FrameFormat, LinkOpener, PixelLayout, Result,
};

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Eight vertical color bars.
    ColorBars,
    /// Horizontal gray ramp from dark to light.
    Gradient,
    /// One color in the layout's native components: Y, U, V for the
    /// interleaved layout, R, G, B (5/6/5 bit) for RGB565.
    Solid(u8, u8, u8),
}

/// Generate a complete raw frame for `format`.
pub fn generate_test_frame(format: &FrameFormat, pattern: TestPattern) -> Vec<u8> {
    let mut data = vec![0u8; format.frame_size()];

    match (format.layout, pattern) {
        (PixelLayout::Yuv422, TestPattern::ColorBars) => {
            generate_yuv_color_bars(&mut data, format.width, format.height);
        }
        (PixelLayout::Yuv422, TestPattern::Gradient) => {
            generate_yuv_gradient(&mut data, format.width, format.height);
        }
        (PixelLayout::Yuv422, TestPattern::Solid(y, u, v)) => {
            for group in data.chunks_exact_mut(4) {
                group.copy_from_slice(&[y, u, y, v]);
            }
        }
        (PixelLayout::Rgb565, TestPattern::ColorBars) => {
            generate_rgb565_color_bars(&mut data, format.width);
        }
        (PixelLayout::Rgb565, TestPattern::Gradient) => {
            generate_rgb565_gradient(&mut data, format.width);
        }
        (PixelLayout::Rgb565, TestPattern::Solid(r, g, b)) => {
            let word = pack565(r, g, b).to_be_bytes();
            for pixel in data.chunks_exact_mut(2) {
                pixel.copy_from_slice(&word);
            }
        }
    }

    data
}

/// Interleave a luma buffer with neutral chroma (`U = V = 128`).
pub fn encode_interleaved(luma: &[u8]) -> Vec<u8> {
    luma.chunks_exact(2)
        .flat_map(|pair| [pair[0], 128, pair[1], 128])
        .collect()
}

/// Pack 5/6/5-bit components into one RGB565 word.
pub fn pack565(r: u8, g: u8, b: u8) -> u16 {
    (u16::from(r & 0x1F) << 11) | (u16::from(g & 0x3F) << 5) | u16::from(b & 0x1F)
}

/// Color bar order shared by both layouts.
/// White, Yellow, Cyan, Green, Magenta, Red, Blue, Black.
const RGB565_BARS: [(u8, u8, u8); 8] = [
    (31, 63, 31),
    (31, 63, 0),
    (0, 63, 31),
    (0, 63, 0),
    (31, 0, 31),
    (31, 0, 0),
    (0, 0, 31),
    (0, 0, 0),
];

fn generate_yuv_color_bars(data: &mut [u8], width: u32, height: u32) {
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = u_val;
                data[offset + 2] = y_val;
                data[offset + 3] = v_val;
            }
        }
    }
}

fn generate_yuv_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if offset + 3 < data.len() {
                data[offset] = y_val;
                data[offset + 1] = 128;
                data[offset + 2] = y_val;
                data[offset + 3] = 128;
            }
        }
    }
}

fn generate_rgb565_color_bars(data: &mut [u8], width: u32) {
    let bar_width = (width / 8).max(1) as usize;
    for (index, pixel) in data.chunks_exact_mut(2).enumerate() {
        let x = index % width as usize;
        let (r, g, b) = RGB565_BARS[(x / bar_width).min(7)];
        pixel.copy_from_slice(&pack565(r, g, b).to_be_bytes());
    }
}

fn generate_rgb565_gradient(data: &mut [u8], width: u32) {
    for (index, pixel) in data.chunks_exact_mut(2).enumerate() {
        let x = index % width as usize;
        #[allow(clippy::cast_possible_truncation)]
        let level = ((x * 63) / width as usize) as u8;
        pixel.copy_from_slice(&pack565(level >> 1, level, level >> 1).to_be_bytes());
    }
}

/// Behaviour of one scripted camera.
#[derive(Debug, Clone, Default)]
pub struct MockCamera {
    open_delay: Duration,
    open_failure: Option<String>,
    frame: Vec<u8>,
    reset_reply: Vec<u8>,
    stale_input: Vec<u8>,
    read_delay: Duration,
}

impl MockCamera {
    /// A camera that opens instantly and answers resets with `OK`.
    pub fn new() -> Self {
        Self {
            reset_reply: b"OK\r\n".to_vec(),
            ..Self::default()
        }
    }

    /// Delay `open`, standing in for a slow device node.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Make `open` fail with `reason`.
    pub fn failing_open(mut self, reason: &str) -> Self {
        self.open_failure = Some(reason.to_owned());
        self
    }

    /// Bytes streamed back after `S`.
    pub fn with_frame(mut self, frame: Vec<u8>) -> Self {
        self.frame = frame;
        self
    }

    /// Bytes queued after `R`.
    pub fn with_reset_reply(mut self, reply: &[u8]) -> Self {
        self.reset_reply = reply.to_vec();
        self
    }

    /// Garbage already sitting in the input buffer when the link opens.
    pub fn with_stale_input(mut self, stale: &[u8]) -> Self {
        self.stale_input = stale.to_vec();
        self
    }

    /// Time a capture read takes, capped by its timeout.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }
}

/// One command as it reached a mock link.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    /// When the write happened.
    pub at: Instant,
    /// Bytes written.
    pub bytes: Vec<u8>,
}

/// Everything a mock link observed.
#[derive(Debug, Clone, Default)]
pub struct LinkLog {
    /// When `open` returned.
    pub opened_at: Option<Instant>,
    /// Writes in order.
    pub writes: Vec<WriteRecord>,
    /// Number of input-buffer resets.
    pub input_resets: usize,
}

impl LinkLog {
    /// Writes as text.
    pub fn commands(&self) -> Vec<String> {
        self.writes
            .iter()
            .map(|write| String::from_utf8_lossy(&write.bytes).into_owned())
            .collect()
    }

    /// Time of the first write.
    pub fn first_write(&self) -> Option<Instant> {
        self.writes.first().map(|write| write.at)
    }
}

type SharedLogs = Arc<Mutex<HashMap<CameraId, LinkLog>>>;

fn with_log<T, F: FnOnce(&mut LinkLog) -> T>(logs: &SharedLogs, id: CameraId, f: F) -> T {
    let mut logs = logs.lock().unwrap_or_else(PoisonError::into_inner);
    f(logs.entry(id).or_default())
}

/// Opener handing out scripted links.
#[derive(Debug, Default)]
pub struct MockOpener {
    cameras: HashMap<CameraId, MockCamera>,
    logs: SharedLogs,
}

impl MockOpener {
    /// Opener with no cameras; unknown ids fail to open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the camera with `id`.
    pub fn with_camera(mut self, id: CameraId, camera: MockCamera) -> Self {
        self.cameras.insert(id, camera);
        self
    }

    /// Snapshot of what the link for `id` observed.
    pub fn log(&self, id: CameraId) -> LinkLog {
        with_log(&self.logs, id, |log| log.clone())
    }
}

impl LinkOpener for MockOpener {
    type Link = MockLink;

    fn open(&self, camera: &CameraDescriptor) -> Result<MockLink> {
        let script = self
            .cameras
            .get(&camera.id)
            .cloned()
            .ok_or_else(|| CameraError::LinkOpen {
                port: camera.port.clone(),
                reason: "No such file or directory".to_owned(),
            })?;

        std::thread::sleep(script.open_delay);
        if let Some(reason) = &script.open_failure {
            return Err(CameraError::LinkOpen {
                port: camera.port.clone(),
                reason: reason.clone(),
            });
        }

        with_log(&self.logs, camera.id, |log| {
            log.opened_at = Some(Instant::now());
        });

        Ok(MockLink {
            id: camera.id,
            rx: script.stale_input.iter().copied().collect(),
            armed: VecDeque::new(),
            script,
            logs: Arc::clone(&self.logs),
        })
    }
}

/// Scripted link: `S` arms the frame, `R` queues the reset reply.
///
/// The armed frame survives input-buffer resets, mirroring a camera that
/// starts streaming only after the host cleared its buffer.
#[derive(Debug)]
pub struct MockLink {
    id: CameraId,
    script: MockCamera,
    rx: VecDeque<u8>,
    armed: VecDeque<u8>,
    logs: SharedLogs,
}

impl CameraLink for MockLink {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        with_log(&self.logs, self.id, |log| {
            log.writes.push(WriteRecord {
                at: Instant::now(),
                bytes: bytes.to_vec(),
            });
        });
        match bytes {
            b"S\n" => self.armed = self.script.frame.iter().copied().collect(),
            b"R\n" => self.rx.extend(self.script.reset_reply.iter().copied()),
            _ => {}
        }
        Ok(())
    }

    fn read_exact(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        std::thread::sleep(self.script.read_delay.min(timeout));
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            match self.rx.pop_front().or_else(|| self.armed.pop_front()) {
                Some(byte) => out.push(byte),
                None => break,
            }
        }
        Ok(out)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        Ok(self.rx.drain(..).collect())
    }

    fn reset_input_buffer(&mut self) -> Result<()> {
        self.rx.clear();
        with_log(&self.logs, self.id, |log| log.input_resets += 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_bars_pattern() {
        let format = FrameFormat::new(640, 480, PixelLayout::Yuv422);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = FrameFormat::new(640, 480, PixelLayout::Yuv422);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        assert!(data[0] < 10);
        let last_row_start = 479 * 640 * 2;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_rgb565_solid_pattern() {
        let format = FrameFormat::new(4, 2, PixelLayout::Rgb565);
        let data = generate_test_frame(&format, TestPattern::Solid(31, 0, 0));
        assert_eq!(data.len(), 16);
        assert!(data.chunks_exact(2).all(|pixel| pixel == [0xF8, 0x00]));
    }

    #[test]
    fn test_encode_interleaved() {
        assert_eq!(
            encode_interleaved(&[1, 2, 3, 4]),
            vec![1, 128, 2, 128, 3, 128, 4, 128]
        );
    }

    #[test]
    fn test_mock_link_script() {
        let opener = MockOpener::new().with_camera(
            1,
            MockCamera::new()
                .with_frame(vec![1, 2, 3])
                .with_stale_input(b"junk"),
        );
        let mut link = opener
            .open(&CameraDescriptor::new(1, "/dev/mock1"))
            .expect("open failed");

        link.write_command(b"S\n").expect("write failed");
        link.reset_input_buffer().expect("reset failed");
        let data = link
            .read_exact(4, Duration::from_millis(10))
            .expect("read failed");
        assert_eq!(data, vec![1, 2, 3]);

        link.write_command(b"R\n").expect("write failed");
        assert_eq!(link.read_available().expect("read failed"), b"OK\r\n");

        let log = opener.log(1);
        assert_eq!(log.commands(), vec!["S\n", "R\n"]);
        assert_eq!(log.input_resets, 1);
        assert!(log.opened_at.is_some());
    }

    #[test]
    fn test_mock_unknown_camera_fails_open() {
        let opener = MockOpener::new();
        let result = opener.open(&CameraDescriptor::new(9, "/dev/missing"));
        assert!(matches!(
            result,
            Err(CameraError::LinkOpen { port, .. }) if port == "/dev/missing"
        ));
    }
}
