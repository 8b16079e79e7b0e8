//! Fixed-point scalar type

use crate::format::FixedFormat;

/// A fixed-point number: raw integer plus the format that gives it meaning.
///
/// Every constructor and operation is total. Results that do not fit the
/// target format follow its overflow policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fixed {
    /// The raw integer value (value = raw / 2^frac_bits)
    pub raw: i32,
    /// Format of this value
    pub format: FixedFormat,
}

impl Fixed {
    /// Create from a packed raw integer (wire representation).
    ///
    /// Raw words wider than the format go through the overflow policy.
    pub fn from_raw(raw: i32, format: FixedFormat) -> Self {
        Self {
            raw: format.fit_raw(raw as i128),
            format,
        }
    }

    /// Create from an integer value (the integer `3` becomes `3.0`)
    pub fn from_int(value: i64, format: FixedFormat) -> Self {
        Self {
            raw: format.quantize(value as i128, 0),
            format,
        }
    }

    /// Create from a floating-point value, truncating toward negative infinity.
    /// NaN maps to zero.
    pub fn from_f64(value: f64, format: FixedFormat) -> Self {
        if value.is_nan() {
            return Self::zero(format);
        }
        let scale_factor = (1u64 << format.frac_bits()) as f64;
        // float -> int `as` casts saturate at the i128 bounds
        let scaled = (value * scale_factor).floor() as i128;
        Self {
            raw: format.fit_raw(scaled),
            format,
        }
    }

    /// Zero in the given format
    pub fn zero(format: FixedFormat) -> Self {
        Self { raw: 0, format }
    }

    /// 1.0 in the given format (saturated or wrapped if not representable)
    pub fn one(format: FixedFormat) -> Self {
        Self::from_int(1, format)
    }

    /// Largest representable value
    pub fn max_value(format: FixedFormat) -> Self {
        Self {
            raw: format.max_raw(),
            format,
        }
    }

    /// Smallest representable value
    pub fn min_value(format: FixedFormat) -> Self {
        Self {
            raw: format.min_raw(),
            format,
        }
    }

    /// Convert back to floating-point
    pub fn to_f64(self) -> f64 {
        let scale_factor = (1u64 << self.format.frac_bits()) as f64;
        self.raw as f64 / scale_factor
    }

    /// Packed raw integer (wire representation)
    pub fn to_raw(self) -> i32 {
        self.raw
    }

    /// Integer part, truncated toward zero
    pub fn to_int(self) -> i32 {
        let frac = self.format.frac_bits();
        let raw = self.raw as i64;
        let int = if raw >= 0 {
            raw >> frac
        } else {
            -((-raw) >> frac)
        };
        int as i32
    }

    /// Convert into another format
    pub fn requantize(self, format: FixedFormat) -> Self {
        Self {
            raw: format.quantize(self.raw as i128, self.format.frac_bits()),
            format,
        }
    }

    /// Add; the result takes this value's format
    pub fn add(self, other: Self) -> Self {
        let (a, b, frac) = align(self, other);
        Self {
            raw: self.format.quantize(a + b, frac),
            format: self.format,
        }
    }

    /// Subtract; the result takes this value's format
    pub fn sub(self, other: Self) -> Self {
        let (a, b, frac) = align(self, other);
        Self {
            raw: self.format.quantize(a - b, frac),
            format: self.format,
        }
    }

    /// Multiply; the full product is formed first, then quantized once into
    /// this value's format
    pub fn mul(self, other: Self) -> Self {
        let product = (self.raw as i128) * (other.raw as i128);
        let frac = self.format.frac_bits() + other.format.frac_bits();
        Self {
            raw: self.format.quantize(product, frac),
            format: self.format,
        }
    }

    /// Negate the value
    pub fn neg(self) -> Self {
        Self {
            raw: self.format.fit_raw(-(self.raw as i128)),
            format: self.format,
        }
    }

    /// Larger of two values (compared by real value); keeps this value's format
    pub fn max(self, other: Self) -> Self {
        let (a, b, _) = align(self, other);
        if b > a {
            other.requantize(self.format)
        } else {
            self
        }
    }
}

/// Bring two values to a common scale without losing bits
fn align(a: Fixed, b: Fixed) -> (i128, i128, u32) {
    let fa = a.format.frac_bits();
    let fb = b.format.frac_bits();
    let frac = fa.max(fb);
    (
        (a.raw as i128) << (frac - fa),
        (b.raw as i128) << (frac - fb),
        frac,
    )
}

impl Default for Fixed {
    fn default() -> Self {
        Self::zero(FixedFormat::default())
    }
}

impl std::fmt::Display for Fixed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}", self.to_f64())
    }
}
