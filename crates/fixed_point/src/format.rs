//! Fixed-point number formats and the quantization rule

use serde::{Deserialize, Serialize};

use crate::error::{FixedPointError, Result};

/// Maximum total width (raw values are stored in an i32)
pub const MAX_WIDTH: u8 = 32;

/// Default format: 16 bits total, 6 integer bits (sign included), 10 fraction bits
pub const DEFAULT_FORMAT: FixedFormat = FixedFormat {
    width: 16,
    int_bits: 6,
    overflow: OverflowMode::Saturate,
};

/// What happens to a value that does not fit in the format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    /// Clamp to the nearest representable value
    #[default]
    Saturate,
    /// Keep the low `width` bits (two's complement)
    Wrap,
}

/// A signed fixed-point format with `width` total bits, `int_bits` of which
/// are integer bits (sign included). The remaining bits are fraction bits,
/// so a raw value `r` represents `r / 2^(width - int_bits)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedFormat {
    /// Total number of bits
    pub width: u8,
    /// Integer bits, including the sign bit
    pub int_bits: u8,
    /// Overflow policy
    #[serde(default)]
    pub overflow: OverflowMode,
}

impl FixedFormat {
    /// Create a validated format
    pub fn new(width: u8, int_bits: u8, overflow: OverflowMode) -> Result<Self> {
        let format = Self {
            width,
            int_bits,
            overflow,
        };
        format.validate()?;
        Ok(format)
    }

    /// Check width and integer bit bounds
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.width > MAX_WIDTH || self.int_bits > self.width {
            return Err(FixedPointError::InvalidFormat {
                width: self.width,
                int_bits: self.int_bits,
            });
        }
        Ok(())
    }

    /// Same bit split with a different overflow policy
    pub fn with_overflow(self, overflow: OverflowMode) -> Self {
        Self { overflow, ..self }
    }

    /// Number of fraction bits
    #[inline]
    pub fn frac_bits(&self) -> u32 {
        self.width.saturating_sub(self.int_bits) as u32
    }

    /// Largest raw value
    #[inline]
    pub fn max_raw(&self) -> i32 {
        ((1i64 << (self.width.max(1) - 1)) - 1) as i32
    }

    /// Smallest raw value
    #[inline]
    pub fn min_raw(&self) -> i32 {
        (-(1i64 << (self.width.max(1) - 1))) as i32
    }

    /// Value of one least-significant bit
    pub fn ulp(&self) -> f64 {
        1.0 / (1u64 << self.frac_bits()) as f64
    }

    /// Whether 1.0 is exactly representable
    pub fn represents_one(&self) -> bool {
        let one = 1i64 << self.frac_bits();
        one <= self.max_raw() as i64
    }

    /// Apply the overflow policy to a raw value already at this format's scale
    pub fn fit_raw(&self, value: i128) -> i32 {
        let max = self.max_raw() as i128;
        let min = self.min_raw() as i128;
        if (min..=max).contains(&value) {
            return value as i32;
        }
        match self.overflow {
            OverflowMode::Saturate => value.clamp(min, max) as i32,
            OverflowMode::Wrap => {
                let modulus = 1i128 << self.width;
                let mut low = value.rem_euclid(modulus);
                if low > max {
                    low -= modulus;
                }
                low as i32
            }
        }
    }

    /// Quantize a raw value carrying `frac` fraction bits into this format.
    ///
    /// Dropped fraction bits are truncated toward negative infinity, then the
    /// overflow policy is applied.
    pub fn quantize(&self, value: i128, frac: u32) -> i32 {
        let target = self.frac_bits();
        let aligned = if frac >= target {
            value >> (frac - target).min(127)
        } else {
            let shift = target - frac;
            match self.overflow {
                // low bits of (v << s) only depend on the low bits of v
                OverflowMode::Wrap => value.wrapping_shl(shift),
                OverflowMode::Saturate => {
                    if value.unsigned_abs() > (i128::MAX >> shift) as u128 {
                        if value < 0 {
                            i128::MIN
                        } else {
                            i128::MAX
                        }
                    } else {
                        value << shift
                    }
                }
            }
        };
        self.fit_raw(aligned)
    }
}

impl Default for FixedFormat {
    fn default() -> Self {
        DEFAULT_FORMAT
    }
}

impl std::fmt::Display for FixedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.overflow {
            OverflowMode::Saturate => "sat",
            OverflowMode::Wrap => "wrap",
        };
        write!(f, "fixed<{},{},{}>", self.width, self.int_bits, mode)
    }
}
