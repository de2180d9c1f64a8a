//! Sensor register programming and exposure computation.
//!
//! The base tuning table is a process-wide constant. Each UPDATE batch builds
//! a private [`RegisterMap`] from it, optionally patches exposure into that
//! copy and hands one clone to every worker.

use indexmap::IndexMap;
use tracing::{info, warn};

/// Exposure high nibble, bits `[19:16]`.
pub const REG_EXPOSURE_HIGH: u16 = 0x3500;
/// Exposure middle byte, bits `[15:8]`.
pub const REG_EXPOSURE_MID: u16 = 0x3501;
/// Exposure low byte, bits `[7:0]`.
pub const REG_EXPOSURE_LOW: u16 = 0x3502;
/// Pre-ISP test pattern control. Bit 7 enables, bits `[1:0]` select.
pub const REG_PRE_ISP_TEST: u16 = 0x503D;

/// Lowest accepted exposure scale.
pub const MIN_SCALE: i32 = 1;
/// Highest accepted exposure scale.
pub const MAX_SCALE: i32 = 10;
/// Line count at scale 1.
pub const MIN_LINES: u32 = 5;
/// Line count at scale 10.
pub const MAX_LINES: u32 = 5000;

/// OV5640 tuning table uploaded by UPDATE batches.
///
/// Some addresses appear more than once; later entries override earlier ones.
pub const OV5640_TUNING: &[(u16, u8)] = &[
    (0x3503, 0x01), // AEC manual, AGC auto
    (0x350A, 0x00), // real gain [9:8]
    (0x350B, 0x10), // real gain [7:0]
    (0x5001, 0x23), // AWB, CMX, scale
    (0x5005, 0x32), // AWB bias, gamma bias
    (0x4302, 0x03), // Y max [9:8]
    (0x4303, 0xFF), // Y max [7:0]
    (0x4306, 0x03), // U max [9:8]
    (0x4307, 0xFF), // U max [7:0]
    (0x430A, 0x03), // V max [9:8]
    (0x430B, 0xFF), // V max [7:0]
    (0x5000, 0x21), // raw gamma, color interpolation
    (0x5481, 0x26), // gamma curve points 0..7
    (0x5482, 0x35),
    (0x5483, 0x48),
    (0x5484, 0x57),
    (0x5485, 0x63),
    (0x5486, 0x6E),
    (0x5487, 0x77),
    (0x5488, 0x80),
    (0x3801, 0x01), // X start [7:0]
    (0x3821, 0x07), // ISP mirror, sensor mirror, horizontal binning
    (0x5001, 0xA3), // SDE, scale, CMX, AWB
    (0x3812, 0x00), // V offset [10:8]
    (0x3811, 0x01), // H offset [7:0]
    (0x501F, 0x00), // format mux: ISP YUV422
    (0x4300, 0x30), // YUV422 output
    (0x503D, 0x00), // test pattern off
    (0x3800, 0x00), // X start [11:8]
    (0x3801, 0x01),
    (0x3802, 0x00), // Y start [10:8]
    (0x3803, 0x01), // Y start [7:0]
    (0x3820, 0x00), // no vertical flip
    (0x3821, 0x07),
    (0x4300, 0x30),
    (0x501F, 0x00),
    (0x5001, 0xA3),
    (0x5580, 0x02), // SDE manual UV adjust
    (0x5583, 0x40), // saturation U
    (0x5584, 0x40), // saturation V
    (0x5587, 0x00), // brightness
];

/// Ordered register address to value map.
///
/// Inserting an address that is already present replaces its value in place,
/// so transmission order follows the first appearance of each address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterMap {
    entries: IndexMap<u16, u8>,
}

impl RegisterMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite one register. Returns the previous value.
    pub fn insert(&mut self, address: u16, value: u8) -> Option<u8> {
        self.entries.insert(address, value)
    }

    /// Value currently stored for `address`.
    #[must_use]
    pub fn get(&self, address: u16) -> Option<u8> {
        self.entries.get(&address).copied()
    }

    /// Merge another map into this one; its values win.
    pub fn merge(&mut self, other: &Self) {
        for (address, value) in other.iter() {
            self.insert(address, value);
        }
    }

    /// Number of distinct registers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no registers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in transmission order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u8)> + '_ {
        self.entries
            .iter()
            .map(|(address, value)| (*address, *value))
    }
}

impl FromIterator<(u16, u8)> for RegisterMap {
    fn from_iter<I: IntoIterator<Item = (u16, u8)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (address, value) in iter {
            map.insert(address, value);
        }
        map
    }
}

/// Synthetic image the sensor can emit in place of the scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SensorTestPattern {
    /// Normal imaging.
    #[default]
    Off,
    /// Eight vertical bars: white, yellow, cyan, green, magenta, red, blue, black.
    ColorBars,
    /// Uniform black frame.
    Black,
}

impl SensorTestPattern {
    /// Value for [`REG_PRE_ISP_TEST`].
    #[must_use]
    pub const fn register_value(self) -> u8 {
        match self {
            Self::Off => 0x00,
            Self::ColorBars => 0x80,
            Self::Black => 0x83,
        }
    }
}

/// Raised when an exposure scale had to be clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRangeWarning {
    /// Scale as requested.
    pub requested: i32,
    /// Scale actually used.
    pub clamped: i32,
}

impl std::fmt::Display for RegisterRangeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "exposure scale {} is outside {MIN_SCALE}..={MAX_SCALE}, using {}",
            self.requested, self.clamped
        )
    }
}

/// Exposure register bytes derived from a scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposureRegisters {
    /// Value for `0x3500`.
    pub high: u8,
    /// Value for `0x3501`.
    pub mid: u8,
    /// Value for `0x3502`.
    pub low: u8,
}

/// Exposure derived from a 1-10 brightness scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposureProfile {
    /// Scale after clamping.
    pub scale: i32,
    /// Exposure time in sensor lines.
    pub actual_lines: u32,
    /// Exposure in 1/16-line units, 20 bits wide.
    pub exposure_value: u32,
    /// Present when the requested scale was out of range.
    pub warning: Option<RegisterRangeWarning>,
}

impl ExposureProfile {
    /// Derive a profile from a scale, clamping it into range.
    #[must_use]
    pub fn from_scale(requested: i32) -> Self {
        let scale = requested.clamp(MIN_SCALE, MAX_SCALE);
        let warning = (scale != requested).then_some(RegisterRangeWarning {
            requested,
            clamped: scale,
        });

        let fraction = f64::from(scale - MIN_SCALE) / f64::from(MAX_SCALE - MIN_SCALE);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let extra = (f64::from(MAX_LINES - MIN_LINES) * fraction).round() as u32;
        let actual_lines = MIN_LINES + extra;

        Self {
            scale,
            actual_lines,
            exposure_value: actual_lines * 16,
            warning,
        }
    }

    /// Split the exposure value into the three register bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn registers(&self) -> ExposureRegisters {
        ExposureRegisters {
            high: ((self.exposure_value >> 16) & 0x0F) as u8,
            mid: ((self.exposure_value >> 8) & 0xFF) as u8,
            low: (self.exposure_value & 0xFF) as u8,
        }
    }

    /// Write the exposure registers into `map`, replacing earlier values.
    pub fn apply(&self, map: &mut RegisterMap) {
        let regs = self.registers();
        map.insert(REG_EXPOSURE_HIGH, regs.high);
        map.insert(REG_EXPOSURE_MID, regs.mid);
        map.insert(REG_EXPOSURE_LOW, regs.low);
    }
}

/// Compute the exposure register triple for a scale.
///
/// Out-of-range scales are clamped and logged.
pub fn compute_exposure(scale: i32) -> ExposureRegisters {
    let profile = ExposureProfile::from_scale(scale);
    if let Some(warning) = profile.warning {
        warn!("{warning}");
    }
    profile.registers()
}

/// Base register table plus the per-batch working copy it produces.
#[derive(Debug, Clone)]
pub struct RegisterProgram {
    base: RegisterMap,
}

impl Default for RegisterProgram {
    fn default() -> Self {
        Self::ov5640()
    }
}

impl RegisterProgram {
    /// Program built on an arbitrary base map.
    #[must_use]
    pub const fn new(base: RegisterMap) -> Self {
        Self { base }
    }

    /// Program built on [`OV5640_TUNING`].
    #[must_use]
    pub fn ov5640() -> Self {
        Self::new(OV5640_TUNING.iter().copied().collect())
    }

    /// Same program with the sensor test pattern register overridden.
    #[must_use]
    pub fn with_test_pattern(mut self, pattern: SensorTestPattern) -> Self {
        self.base.insert(REG_PRE_ISP_TEST, pattern.register_value());
        self
    }

    /// The unpatched base map.
    #[must_use]
    pub const fn base(&self) -> &RegisterMap {
        &self.base
    }

    /// Fresh copy of the base map, exposure-patched when a scale is given.
    #[must_use]
    pub fn working_copy(&self, exposure_scale: Option<i32>) -> RegisterMap {
        let mut map = self.base.clone();
        if let Some(requested) = exposure_scale {
            let profile = ExposureProfile::from_scale(requested);
            if let Some(warning) = profile.warning {
                warn!("{warning}");
            }
            profile.apply(&mut map);
            let regs = profile.registers();
            info!(
                scale = profile.scale,
                lines = profile.actual_lines,
                "exposure set: 0x3500/0x3501/0x3502 = 0x{:02X} 0x{:02X} 0x{:02X}",
                regs.high,
                regs.mid,
                regs.low
            );
        }
        map
    }
}
