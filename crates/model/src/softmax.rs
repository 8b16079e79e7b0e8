//! Table-driven fixed-point softmax

use convstream_fixed_point::{FixedFormat, FixedVector};

use crate::error::{ModelError, Result};

/// Fraction bits of the exponential table entries
const EXP_FRAC: u32 = 30;

/// log2 of the table's input span; entries cover `exp(-d)` for d in [0, 8)
const EXP_RANGE_LOG2: u32 = 3;

/// Stable softmax: `exp(x_i - max)` from a lookup table, normalized by
/// integer division so the outputs are non-negative and sum to at most 1.0
/// and more than `1.0 - n·ulp`.
#[derive(Debug, Clone)]
pub struct Softmax {
    n: usize,
    input_format: FixedFormat,
    output_format: FixedFormat,
    exp_table: Vec<u64>,
}

impl Softmax {
    pub fn new(
        n: usize,
        input_format: FixedFormat,
        output_format: FixedFormat,
        table_size: usize,
    ) -> Result<Self> {
        if n == 0 {
            return Err(ModelError::shape("softmax", vec![1], vec![0]));
        }
        if table_size < 2 {
            return Err(ModelError::Config(format!(
                "softmax table needs at least 2 entries, got {}",
                table_size
            )));
        }
        if !output_format.represents_one() {
            return Err(ModelError::Config(format!(
                "softmax output format {} cannot represent 1.0",
                output_format
            )));
        }

        let span = (1u32 << EXP_RANGE_LOG2) as f64;
        let scale = (1u64 << EXP_FRAC) as f64;
        let exp_table = (0..table_size)
            .map(|i| {
                let d = i as f64 * span / table_size as f64;
                ((-d).exp() * scale) as u64
            })
            .collect();

        Ok(Self {
            n,
            input_format,
            output_format,
            exp_table,
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn output_format(&self) -> FixedFormat {
        self.output_format
    }

    /// Declared normalization tolerance: `n` output ulps
    pub fn tolerance(&self) -> f64 {
        self.n as f64 * self.output_format.ulp()
    }

    #[inline]
    fn exp_neg(&self, distance: i64) -> u64 {
        let shift = self.input_format.frac_bits() + EXP_RANGE_LOG2;
        let idx = ((distance as i128) * (self.exp_table.len() as i128)) >> shift;
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.exp_table.get(i).copied())
            .unwrap_or(0)
    }

    pub fn forward(&self, input: &FixedVector) -> FixedVector {
        debug_assert_eq!(input.len(), self.n);
        debug_assert_eq!(input.format, self.input_format);

        let Some(&max) = input.data.iter().max() else {
            return FixedVector::zeros(0, self.output_format);
        };

        let exps: Vec<u64> = input
            .data
            .iter()
            .map(|&x| self.exp_neg(max as i64 - x as i64))
            .collect();
        // The max element contributes exp(0), so the sum is never zero
        let sum: u128 = exps.iter().map(|&e| e as u128).sum();
        let one = 1u128 << self.output_format.frac_bits();

        let data = exps
            .iter()
            .map(|&e| ((e as u128 * one) / sum) as i32)
            .collect();

        FixedVector {
            data,
            format: self.output_format,
        }
    }
}
