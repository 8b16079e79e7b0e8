//! Fixed-point vector operations

use crate::fixed::Fixed;
use crate::format::FixedFormat;

/// A vector of fixed-point values with common format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedVector {
    /// Raw i32 values
    pub data: Vec<i32>,
    /// Common format for all elements
    pub format: FixedFormat,
}

impl FixedVector {
    /// Create a new vector from raw data, fitting every word into the format
    pub fn from_raw(data: Vec<i32>, format: FixedFormat) -> Self {
        let data = data
            .into_iter()
            .map(|raw| format.fit_raw(raw as i128))
            .collect();
        Self { data, format }
    }

    /// Create a vector from floating-point values
    pub fn from_f64_slice(values: &[f64], format: FixedFormat) -> Self {
        let data = values
            .iter()
            .map(|&v| Fixed::from_f64(v, format).raw)
            .collect();
        Self { data, format }
    }

    /// Convert to floating-point vector
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let scale_factor = (1u64 << self.format.frac_bits()) as f64;
        self.data.iter().map(|&x| x as f64 / scale_factor).collect()
    }

    /// Get the length of the vector
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the vector is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get element at index
    pub fn get(&self, index: usize) -> Option<Fixed> {
        self.data.get(index).map(|&raw| Fixed {
            raw,
            format: self.format,
        })
    }

    /// Create a zero vector of given length
    pub fn zeros(len: usize, format: FixedFormat) -> Self {
        Self {
            data: vec![0; len],
            format,
        }
    }

    /// Convert every element into another format
    pub fn requantize(&self, format: FixedFormat) -> Self {
        let frac = self.format.frac_bits();
        Self {
            data: self
                .data
                .iter()
                .map(|&raw| format.quantize(raw as i128, frac))
                .collect(),
            format,
        }
    }

    /// Exact sum of the elements, in raw units of this vector's format
    pub fn sum_raw(&self) -> i64 {
        self.data.iter().map(|&x| x as i64).sum()
    }

    /// Sum of the elements as a real number
    pub fn sum_f64(&self) -> f64 {
        self.sum_raw() as f64 * self.format.ulp()
    }

    /// Index of the largest element (first one on ties)
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, i32)> = None;
        for (i, &v) in self.data.iter().enumerate() {
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((i, v)),
            }
        }
        best.map(|(i, _)| i)
    }
}
