//! Layer evaluators: valid 1-D convolution, reshapes, dense, ReLU
//!
//! Every layer accumulates in a wide [`Accumulator`] and quantizes exactly
//! once into its output format. Shapes are checked by the constructors, so
//! `forward` is total.

use convstream_fixed_point::{Accumulator, FixedFormat, FixedVector};

use crate::config::{ConvSpec, FeatureShape};
use crate::error::{ModelError, Result};
use crate::weights::{ConvWeights, DenseWeights};

/// A `[positions][channels]` tensor stored row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureMap {
    pub data: Vec<i32>,
    pub shape: FeatureShape,
    pub format: FixedFormat,
}

impl FeatureMap {
    /// Wrap raw words, checking the element count against `shape`. Words
    /// outside the format go through its overflow policy.
    pub fn new(data: Vec<i32>, shape: FeatureShape, format: FixedFormat) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(ModelError::shape("feature_map", shape.dims(), vec![data.len()]));
        }
        let data = FixedVector::from_raw(data, format).data;
        Ok(Self { data, shape, format })
    }

    pub fn zeros(shape: FeatureShape, format: FixedFormat) -> Self {
        Self {
            data: vec![0; shape.len()],
            shape,
            format,
        }
    }

    /// Raw value at `(position, channel)`
    #[inline]
    pub fn get(&self, position: usize, channel: usize) -> i32 {
        self.data[position * self.shape.channels + channel]
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        let ulp = self.format.ulp();
        self.data.iter().map(|&raw| raw as f64 * ulp).collect()
    }
}

/// Row-major linearization (position-major, channel-minor)
pub fn flatten(map: FeatureMap) -> FixedVector {
    FixedVector {
        data: map.data,
        format: map.format,
    }
}

/// Inverse of [`flatten`] for a fixed vector length and target shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unflatten {
    shape: FeatureShape,
}

impl Unflatten {
    pub fn new(len: usize, shape: FeatureShape) -> Result<Self> {
        if len != shape.len() {
            return Err(ModelError::shape("unflatten", shape.dims(), vec![len]));
        }
        Ok(Self { shape })
    }

    pub fn shape(&self) -> FeatureShape {
        self.shape
    }

    pub fn forward(&self, vector: FixedVector) -> FeatureMap {
        debug_assert_eq!(vector.len(), self.shape.len());
        FeatureMap {
            data: vector.data,
            shape: self.shape,
            format: vector.format,
        }
    }
}

/// Reshape a vector into `shape`; fails unless the element counts agree
pub fn unflatten(vector: FixedVector, shape: FeatureShape) -> Result<FeatureMap> {
    Ok(Unflatten::new(vector.len(), shape)?.forward(vector))
}

/// Elementwise `max(0, x)`, then requantized into `out_format`
pub fn relu(input: &FixedVector, out_format: FixedFormat) -> FixedVector {
    let frac = input.format.frac_bits();
    let data = input
        .data
        .iter()
        .map(|&raw| out_format.quantize(raw.max(0) as i128, frac))
        .collect();
    FixedVector {
        data,
        format: out_format,
    }
}

/// Valid (unpadded) 1-D convolution along the position axis
#[derive(Debug, Clone)]
pub struct Conv1d {
    stage: String,
    spec: ConvSpec,
    weights: ConvWeights,
    output_shape: FeatureShape,
    output_format: FixedFormat,
}

impl Conv1d {
    pub fn new(
        stage: &str,
        spec: ConvSpec,
        weights: ConvWeights,
        output_format: FixedFormat,
    ) -> Result<Self> {
        let output_shape = spec.output_shape(stage)?;
        weights.validate_against(stage, &spec)?;
        Ok(Self {
            stage: stage.to_string(),
            spec,
            weights,
            output_shape,
            output_format,
        })
    }

    pub fn input_shape(&self) -> FeatureShape {
        self.spec.input_shape()
    }

    pub fn output_shape(&self) -> FeatureShape {
        self.output_shape
    }

    /// `y[p][f] = b[f] + Σ_c Σ_k x[p*S + k][c] · w[k][c][f]`
    pub fn forward(&self, input: &FeatureMap) -> Result<FeatureMap> {
        let expected = self.spec.input_shape();
        if input.shape != expected || input.data.len() != expected.len() {
            return Err(ModelError::shape(&self.stage, expected.dims(), input.shape.dims()));
        }

        let ConvSpec {
            channels,
            filters,
            kernel_width,
            stride,
            ..
        } = self.spec;
        let bias_frac = self.weights.format.frac_bits();
        let mut out = Vec::with_capacity(self.output_shape.len());

        for p in 0..self.output_shape.positions {
            let base = p * stride;
            for f in 0..filters {
                let mut acc = Accumulator::for_product(input.format, self.weights.format);
                acc.add_raw(self.weights.bias[f], bias_frac);
                for c in 0..channels {
                    for k in 0..kernel_width {
                        acc.mac(input.get(base + k, c), self.weights.get_weight(k, c, f));
                    }
                }
                out.push(acc.finish(self.output_format).raw);
            }
        }

        Ok(FeatureMap {
            data: out,
            shape: self.output_shape,
            format: self.output_format,
        })
    }
}

/// Fully connected layer (Y = XW + b)
#[derive(Debug, Clone)]
pub struct Dense {
    stage: String,
    weights: DenseWeights,
    output_format: FixedFormat,
}

impl Dense {
    pub fn new(stage: &str, weights: DenseWeights, output_format: FixedFormat) -> Result<Self> {
        weights.validate_against(stage, weights.in_features, weights.out_features)?;
        Ok(Self {
            stage: stage.to_string(),
            weights,
            output_format,
        })
    }

    pub fn in_features(&self) -> usize {
        self.weights.in_features
    }

    pub fn out_features(&self) -> usize {
        self.weights.out_features
    }

    /// Accumulates in input index order, quantizes once per output
    pub fn forward(&self, input: &FixedVector) -> Result<FixedVector> {
        if input.len() != self.weights.in_features {
            return Err(ModelError::shape(
                &self.stage,
                vec![self.weights.in_features],
                vec![input.len()],
            ));
        }

        let bias_frac = self.weights.format.frac_bits();
        let data = (0..self.weights.out_features)
            .map(|j| {
                let mut acc = Accumulator::for_product(input.format, self.weights.format);
                acc.add_raw(self.weights.bias[j], bias_frac);
                for (i, &x) in input.data.iter().enumerate() {
                    acc.mac(x, self.weights.get_weight(i, j));
                }
                acc.finish(self.output_format).raw
            })
            .collect();

        Ok(FixedVector {
            data,
            format: self.output_format,
        })
    }
}
