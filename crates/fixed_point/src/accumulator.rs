//! Wide multiply-accumulate register

use crate::fixed::Fixed;
use crate::format::FixedFormat;

/// Accumulates products at full precision and quantizes once at the end.
///
/// The register is 128 bits wide and carries `frac` fraction bits, so for
/// `in_format × weight_format` products `frac` is the sum of both fraction
/// bit counts. Additions saturate at the i128 bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulator {
    acc: i128,
    frac: u32,
}

impl Accumulator {
    /// Empty accumulator carrying `frac` fraction bits
    pub fn new(frac: u32) -> Self {
        Self { acc: 0, frac }
    }

    /// Empty accumulator sized for products of the two formats
    pub fn for_product(a: FixedFormat, b: FixedFormat) -> Self {
        Self::new(a.frac_bits() + b.frac_bits())
    }

    /// Add `x * w` where the raw operands are in the formats this
    /// accumulator was built for
    #[inline]
    pub fn mac(&mut self, x: i32, w: i32) {
        self.acc = self.acc.saturating_add((x as i128) * (w as i128));
    }

    /// Add a value expressed in its own format (typically a bias)
    pub fn add_fixed(&mut self, value: Fixed) {
        self.add_raw(value.raw, value.format.frac_bits());
    }

    /// Add a raw value carrying `frac` fraction bits
    pub fn add_raw(&mut self, raw: i32, frac: u32) {
        let aligned = if frac <= self.frac {
            (raw as i128) << (self.frac - frac)
        } else {
            (raw as i128) >> (frac - self.frac).min(127)
        };
        self.acc = self.acc.saturating_add(aligned);
    }

    /// Current register contents
    pub fn raw(&self) -> i128 {
        self.acc
    }

    /// Fraction bits carried by the register
    pub fn frac_bits(&self) -> u32 {
        self.frac
    }

    /// Quantize into the output format
    pub fn finish(self, format: FixedFormat) -> Fixed {
        Fixed {
            raw: format.quantize(self.acc, self.frac),
            format,
        }
    }
}
