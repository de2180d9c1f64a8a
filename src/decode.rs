//! Raw sensor bytes to pixel buffers.
//!
//! Two raw layouts are supported and chosen by configuration:
//!
//! - interleaved luma/chroma, four bytes `[Y0 U Y1 V]` for two pixels
//! - packed 16-bit color, one big-endian RGB565 word per pixel
//!
//! All functions are pure and refuse buffers whose length does not match the
//! requested geometry.

use image::{DynamicImage, GrayImage, RgbImage};
use thiserror::Error;
use tracing::warn;

use crate::traits::{FrameFormat, LumaOrder, PixelLayout};

/// Error raised when a raw buffer does not fit the frame geometry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Buffer length differs from `width * height * bytes_per_pixel`.
    #[error("raw frame is {actual} bytes, expected {expected}")]
    LengthMismatch {
        /// Required length.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },
    /// Interleaved frames are made of pixel pairs.
    #[error("interleaved frame width {width} is not even")]
    OddWidth {
        /// Width supplied.
        width: u32,
    },
}

/// Channel layout of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorKind {
    /// Three channels, red first.
    Rgb8,
    /// Single luma channel.
    Luma8,
}

impl ColorKind {
    /// Bytes per decoded pixel.
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Luma8 => 1,
        }
    }
}

/// A decoded frame, rows top to bottom, channels clipped to `0..=255`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    kind: ColorKind,
    data: Vec<u8>,
}

impl DecodedImage {
    /// Frame width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Channel layout.
    #[must_use]
    pub const fn kind(&self) -> ColorKind {
        self.kind
    }

    /// Pixel bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get RGB values for a pixel. Luma images report the same value three times.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.kind.channels();
        let offset = (y as usize * self.width as usize + x as usize) * channels;
        match self.kind {
            ColorKind::Rgb8 => Some((
                *self.data.get(offset)?,
                *self.data.get(offset + 1)?,
                *self.data.get(offset + 2)?,
            )),
            ColorKind::Luma8 => {
                let luma = *self.data.get(offset)?;
                Some((luma, luma, luma))
            }
        }
    }

    /// Convert into an `image` buffer for encoding.
    pub fn into_dynamic_image(self) -> Result<DynamicImage, DecodeError> {
        let expected = self.width as usize * self.height as usize * self.kind.channels();
        let actual = self.data.len();
        let mismatch = DecodeError::LengthMismatch { expected, actual };
        match self.kind {
            ColorKind::Rgb8 => RgbImage::from_raw(self.width, self.height, self.data)
                .map(DynamicImage::ImageRgb8)
                .ok_or(mismatch),
            ColorKind::Luma8 => GrayImage::from_raw(self.width, self.height, self.data)
                .map(DynamicImage::ImageLuma8)
                .ok_or(mismatch),
        }
    }
}

fn check_length(
    bytes: &[u8],
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Result<(), DecodeError> {
    let expected = width as usize * height as usize * bytes_per_pixel;
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(DecodeError::LengthMismatch {
            expected,
            actual: bytes.len(),
        })
    }
}

/// Clip to the byte range and truncate.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clip(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

/// Full-scale luma/chroma to RGB for one sample.
///
/// Channel pairing follows the camera modules: the `1.772` term lands on red
/// and the `1.402` term on green. Neutral chroma yields `R = G = B = Y`.
///
/// Products are rounded before each sum; fused multiply-add would shift some
/// outputs by one level.
#[must_use]
#[allow(clippy::many_single_char_names, clippy::suboptimal_flops)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = y_f + 1.772 * u_f;
    let g = y_f + 1.402 * v_f;
    let b = y_f - 0.344_136 * u_f - 0.714_136 * v_f;

    (clip(r), clip(g), clip(b))
}

/// Decode an interleaved `[Y0 U Y1 V]` frame to RGB888.
///
/// Both luma samples of a group share its chroma pair.
pub fn decode_interleaved(
    bytes: &[u8],
    width: u32,
    height: u32,
) -> Result<DecodedImage, DecodeError> {
    if width % 2 != 0 {
        return Err(DecodeError::OddWidth { width });
    }
    check_length(bytes, width, height, 2)?;

    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for group in bytes.chunks_exact(4) {
        if let [y0, u, y1, v] = *group {
            let (r0, g0, b0) = yuv_to_rgb(y0, u, v);
            let (r1, g1, b1) = yuv_to_rgb(y1, u, v);
            data.extend_from_slice(&[r0, g0, b0, r1, g1, b1]);
        }
    }

    Ok(DecodedImage {
        width,
        height,
        kind: ColorKind::Rgb8,
        data,
    })
}

/// Expand a `bits`-wide component to 8 bits by replicating its high bits.
#[allow(clippy::cast_possible_truncation)]
const fn replicate(component: u16, bits: u32) -> u8 {
    let shifted = component << (8 - bits);
    let fill = component >> (2 * bits - 8);
    (shifted | fill) as u8
}

/// Decode a big-endian RGB565 frame to RGB888.
pub fn decode_packed16(bytes: &[u8], width: u32, height: u32) -> Result<DecodedImage, DecodeError> {
    check_length(bytes, width, height, 2)?;

    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for word in bytes.chunks_exact(2) {
        if let [hi, lo] = *word {
            let pixel = u16::from_be_bytes([hi, lo]);
            let r5 = (pixel >> 11) & 0x1F;
            let g6 = (pixel >> 5) & 0x3F;
            let b5 = pixel & 0x1F;
            data.extend_from_slice(&[replicate(r5, 5), replicate(g6, 6), replicate(b5, 5)]);
        }
    }

    Ok(DecodedImage {
        width,
        height,
        kind: ColorKind::Rgb8,
        data,
    })
}

/// Pull the luma plane out of an interleaved frame without color conversion.
pub fn extract_luma(
    bytes: &[u8],
    width: u32,
    height: u32,
    order: LumaOrder,
) -> Result<DecodedImage, DecodeError> {
    check_length(bytes, width, height, 2)?;

    let data = bytes
        .iter()
        .skip(order.luma_offset())
        .step_by(2)
        .copied()
        .collect();

    Ok(DecodedImage {
        width,
        height,
        kind: ColorKind::Luma8,
        data,
    })
}

/// Decoder bound to one frame format.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    format: FrameFormat,
    luma: Option<LumaOrder>,
}

impl FrameDecoder {
    /// Color decoder for `format`.
    #[must_use]
    pub const fn new(format: FrameFormat) -> Self {
        Self { format, luma: None }
    }

    /// Produce single-channel luma instead of RGB.
    ///
    /// Only the interleaved layout has a luma plane; RGB565 frames stay in color.
    #[must_use]
    pub const fn grayscale(mut self, order: LumaOrder) -> Self {
        self.luma = Some(order);
        self
    }

    /// The bound frame format.
    #[must_use]
    pub const fn format(&self) -> &FrameFormat {
        &self.format
    }

    /// Decode one raw frame.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        let FrameFormat {
            width,
            height,
            layout,
        } = self.format;
        match (layout, self.luma) {
            (PixelLayout::Yuv422, Some(order)) => extract_luma(bytes, width, height, order),
            (PixelLayout::Yuv422, None) => decode_interleaved(bytes, width, height),
            (PixelLayout::Rgb565, luma) => {
                if luma.is_some() {
                    warn!("grayscale requested for RGB565 frame, decoding in color");
                }
                decode_packed16(bytes, width, height)
            }
        }
    }
}
