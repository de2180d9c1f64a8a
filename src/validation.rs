//! Frame validation utilities for test pattern verification.
//!
//! The sensor can replace the scene with a synthetic pattern through
//! [`REG_PRE_ISP_TEST`](crate::registers::REG_PRE_ISP_TEST). These checks
//! confirm that a decoded frame carries the expected pattern, which catches
//! wrong layout configuration and byte-order mistakes on real hardware.

use thiserror::Error;

use crate::decode::DecodedImage;

/// Primary color bars as produced by the sensor color bar pattern.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
pub const PRIMARY_COLOR_BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255), // White
    (255, 255, 0),   // Yellow
    (0, 255, 255),   // Cyan
    (0, 255, 0),     // Green
    (255, 0, 255),   // Magenta
    (255, 0, 0),     // Red
    (0, 0, 255),     // Blue
    (0, 0, 0),       // Black
];

/// Per-channel tolerance for frames decoded from synthetic data.
pub const DEFAULT_TOLERANCE: u8 = 15;

/// Why a frame failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A sample point lies outside the frame.
    #[error("pixel ({x}, {y}) is outside the frame")]
    PixelOutOfBounds {
        /// Column sampled.
        x: u32,
        /// Row sampled.
        y: u32,
    },
    /// A color bar differs from its expected color.
    #[error("color bar {bar} mismatch at ({x}, {y}): expected RGB{expected:?}, got RGB{actual:?}")]
    ColorMismatch {
        /// Bar index, left to right.
        bar: usize,
        /// Column sampled.
        x: u32,
        /// Row sampled.
        y: u32,
        /// Expected color.
        expected: (u8, u8, u8),
        /// Color found.
        actual: (u8, u8, u8),
    },
    /// The frame is not one solid color.
    #[error("pixel ({x}, {y}) is RGB{actual:?}, expected RGB{expected:?}")]
    NotSolid {
        /// Column sampled.
        x: u32,
        /// Row sampled.
        y: u32,
        /// Expected color.
        expected: (u8, u8, u8),
        /// Color found.
        actual: (u8, u8, u8),
    },
}

fn sample(image: &DecodedImage, x: u32, y: u32) -> Result<(u8, u8, u8), ValidationError> {
    image
        .pixel_at(x, y)
        .ok_or(ValidationError::PixelOutOfBounds { x, y })
}

/// Validates that a frame contains vertical color bars.
///
/// The frame is split into `palette.len()` equal stripes and the center of
/// each stripe, on the middle row, is compared against its palette entry.
///
/// # Errors
///
/// Returns the first sample that is out of bounds or off-color.
pub fn validate_color_bars(
    image: &DecodedImage,
    palette: &[(u8, u8, u8)],
    tolerance: u8,
) -> Result<(), ValidationError> {
    let bars = u32::try_from(palette.len()).unwrap_or(u32::MAX).max(1);
    let bar_width = image.width() / bars;
    let center_y = image.height() / 2;

    for ((bar, expected), index) in palette.iter().enumerate().zip(0u32..) {
        let sample_x = index * bar_width + bar_width / 2;
        let actual = sample(image, sample_x, center_y)?;

        if !colors_match(actual, *expected, tolerance) {
            return Err(ValidationError::ColorMismatch {
                bar,
                x: sample_x,
                y: center_y,
                expected: *expected,
                actual,
            });
        }
    }

    Ok(())
}

/// Validates that every pixel of the frame is `expected` within tolerance.
///
/// # Errors
///
/// Returns the first pixel that differs.
pub fn validate_solid(
    image: &DecodedImage,
    expected: (u8, u8, u8),
    tolerance: u8,
) -> Result<(), ValidationError> {
    for y in 0..image.height() {
        for x in 0..image.width() {
            let actual = sample(image, x, y)?;
            if !colors_match(actual, expected, tolerance) {
                return Err(ValidationError::NotSolid {
                    x,
                    y,
                    expected,
                    actual,
                });
            }
        }
    }
    Ok(())
}

/// Check if two RGB colors match within a per-channel tolerance.
pub const fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    actual.0.abs_diff(expected.0) <= tolerance
        && actual.1.abs_diff(expected.1) <= tolerance
        && actual.2.abs_diff(expected.2) <= tolerance
}
