//! Network configuration: layer shapes and numeric formats

use serde::{Deserialize, Serialize};
use std::path::Path;

use convstream_fixed_point::{FixedFormat, OverflowMode, DEFAULT_FORMAT};

use crate::error::{ModelError, Result};

/// Number of convolution blocks in the topology
pub const CONV_BLOCKS: usize = 3;

/// Shape of a 2-D feature map: `[positions][channels]`, row-major
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureShape {
    /// Spatial positions
    pub positions: usize,
    /// Channels per position
    pub channels: usize,
}

impl FeatureShape {
    pub const fn new(positions: usize, channels: usize) -> Self {
        Self {
            positions,
            channels,
        }
    }

    /// Total number of elements
    pub const fn len(&self) -> usize {
        self.positions * self.channels
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dims(&self) -> Vec<usize> {
        vec![self.positions, self.channels]
    }
}

/// Output extent of a valid (unpadded) 1-D convolution, `None` when the
/// kernel does not fit or the stride is zero
pub fn conv1d_output_len(positions: usize, kernel_width: usize, stride: usize) -> Option<usize> {
    if stride == 0 || kernel_width == 0 || positions < kernel_width {
        return None;
    }
    Some((positions - kernel_width) / stride + 1)
}

/// One convolution block: the shape it consumes and its kernel parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvSpec {
    /// Input positions
    pub positions: usize,
    /// Input channels
    pub channels: usize,
    /// Output channels
    pub filters: usize,
    /// Kernel width along the spatial axis
    #[serde(default = "default_kernel_width")]
    pub kernel_width: usize,
    /// Stride along the spatial axis
    #[serde(default = "default_stride")]
    pub stride: usize,
}

fn default_kernel_width() -> usize { 3 }
fn default_stride() -> usize { 1 }

impl ConvSpec {
    pub const fn new(
        positions: usize,
        channels: usize,
        filters: usize,
        kernel_width: usize,
        stride: usize,
    ) -> Self {
        Self {
            positions,
            channels,
            filters,
            kernel_width,
            stride,
        }
    }

    pub fn input_shape(&self) -> FeatureShape {
        FeatureShape::new(self.positions, self.channels)
    }

    /// Output shape, or a shape error naming `stage`
    pub fn output_shape(&self, stage: &str) -> Result<FeatureShape> {
        if self.channels == 0 || self.filters == 0 {
            return Err(ModelError::shape(
                stage,
                vec![self.positions, self.channels.max(1), self.filters.max(1)],
                vec![self.positions, self.channels, self.filters],
            ));
        }
        let out = conv1d_output_len(self.positions, self.kernel_width, self.stride).ok_or_else(|| {
            ModelError::shape(
                stage,
                vec![self.kernel_width.max(1), self.stride.max(1)],
                vec![self.positions, self.kernel_width, self.stride],
            )
        })?;
        Ok(FeatureShape::new(out, self.filters))
    }
}

/// Fixed-point formats of every tensor class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionConfig {
    /// Frames and every conv/relu activation
    #[serde(default = "default_format")]
    pub activation: FixedFormat,
    /// Weights and biases
    #[serde(default = "default_format")]
    pub weight: FixedFormat,
    /// Output of the first dense layer and its activation
    #[serde(default = "default_layer4_format")]
    pub layer4: FixedFormat,
    /// Output of the last dense layer and the softmax scores
    #[serde(default = "default_format")]
    pub result: FixedFormat,
}

fn default_format() -> FixedFormat { DEFAULT_FORMAT }
fn default_layer4_format() -> FixedFormat {
    FixedFormat {
        width: 18,
        int_bits: 8,
        overflow: OverflowMode::Saturate,
    }
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            activation: default_format(),
            weight: default_format(),
            layer4: default_layer4_format(),
            result: default_format(),
        }
    }
}

impl PrecisionConfig {
    /// Same bit splits, all switched to one overflow policy
    pub fn with_overflow(self, overflow: OverflowMode) -> Self {
        Self {
            activation: self.activation.with_overflow(overflow),
            weight: self.weight.with_overflow(overflow),
            layer4: self.layer4.with_overflow(overflow),
            result: self.result.with_overflow(overflow),
        }
    }

    /// The overflow policy shared by every format
    pub fn overflow(&self) -> OverflowMode {
        self.activation.overflow
    }

    /// Validate formats: legal bit splits, one overflow policy, and a
    /// result format that can hold a probability of 1.0
    pub fn validate(&self) -> Result<()> {
        let formats = [self.activation, self.weight, self.layer4, self.result];
        for format in &formats {
            format.validate()?;
        }
        if formats.iter().any(|f| f.overflow != self.activation.overflow) {
            return Err(ModelError::Config(
                "all formats must declare the same overflow mode".to_string(),
            ));
        }
        if !self.result.represents_one() {
            return Err(ModelError::Config(format!(
                "result format {} cannot represent 1.0",
                self.result
            )));
        }
        Ok(())
    }
}

/// Configuration of the fixed conv → conv → conv → dense → dense → softmax network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Convolution blocks; the first one consumes the frame
    #[serde(default = "default_conv")]
    pub conv: [ConvSpec; CONV_BLOCKS],

    /// Width of the first dense layer
    #[serde(default = "default_dense_width")]
    pub dense_width: usize,

    /// Number of class scores
    #[serde(default = "default_n_outputs")]
    pub n_outputs: usize,

    /// Numeric formats
    #[serde(default)]
    pub precision: PrecisionConfig,

    /// Entries in the softmax exponential table
    #[serde(default = "default_softmax_table_size")]
    pub softmax_table_size: usize,
}

fn default_conv() -> [ConvSpec; CONV_BLOCKS] {
    [
        ConvSpec::new(10, 4, 8, 3, 1),
        ConvSpec::new(8, 8, 8, 3, 1),
        ConvSpec::new(6, 8, 8, 3, 1),
    ]
}
fn default_dense_width() -> usize { 16 }
fn default_n_outputs() -> usize { 5 }
fn default_softmax_table_size() -> usize { 1024 }

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            conv: default_conv(),
            dense_width: default_dense_width(),
            n_outputs: default_n_outputs(),
            precision: PrecisionConfig::default(),
            softmax_table_size: default_softmax_table_size(),
        }
    }
}

impl NetworkConfig {
    /// Load config from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Shape of one input frame
    pub fn frame_shape(&self) -> FeatureShape {
        self.conv[0].input_shape()
    }

    /// Words per frame in the input buffer
    pub fn input_width(&self) -> usize {
        self.frame_shape().len()
    }

    /// Words per frame in the output buffer
    pub fn output_width(&self) -> usize {
        self.n_outputs
    }

    /// Output shapes of the three convolution blocks
    pub fn conv_output_shapes(&self) -> Result<[FeatureShape; CONV_BLOCKS]> {
        Ok([
            self.conv[0].output_shape("conv1")?,
            self.conv[1].output_shape("conv2")?,
            self.conv[2].output_shape("conv3")?,
        ])
    }

    /// Length of the flattened conv3 output feeding dense4
    pub fn flatten_width(&self) -> Result<usize> {
        Ok(self.conv_output_shapes()?[CONV_BLOCKS - 1].len())
    }

    /// Validate every shape contract of the topology
    pub fn validate(&self) -> Result<()> {
        self.precision.validate()?;

        let outputs = self.conv_output_shapes()?;
        for i in 1..CONV_BLOCKS {
            let produced = outputs[i - 1];
            let expected = self.conv[i].input_shape();
            if produced.len() != expected.len() {
                return Err(ModelError::shape(
                    format!("unflatten{}", i + 1),
                    expected.dims(),
                    produced.dims(),
                ));
            }
        }

        if self.dense_width == 0 {
            return Err(ModelError::Config("dense_width must be at least 1".to_string()));
        }
        if self.n_outputs == 0 {
            return Err(ModelError::Config("n_outputs must be at least 1".to_string()));
        }
        if self.softmax_table_size < 2 {
            return Err(ModelError::Config(format!(
                "softmax_table_size must be at least 2, got {}",
                self.softmax_table_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        config.validate().unwrap();
        assert_eq!(config.frame_shape(), FeatureShape::new(10, 4));
        assert_eq!(config.input_width(), 40);
        assert_eq!(config.output_width(), 5);
        assert_eq!(config.flatten_width().unwrap(), 32);
    }

    #[test]
    fn test_valid_conv_extent() {
        assert_eq!(conv1d_output_len(10, 3, 1), Some(8));
        assert_eq!(conv1d_output_len(10, 3, 2), Some(4));
        assert_eq!(conv1d_output_len(3, 3, 1), Some(1));
        assert_eq!(conv1d_output_len(2, 3, 1), None);
        assert_eq!(conv1d_output_len(10, 3, 0), None);
    }

    #[test]
    fn test_default_conv_output_shapes() {
        let shapes = NetworkConfig::default().conv_output_shapes().unwrap();
        assert_eq!(shapes[0], FeatureShape::new(8, 8));
        assert_eq!(shapes[1], FeatureShape::new(6, 8));
        assert_eq!(shapes[2], FeatureShape::new(4, 8));
    }

    #[test]
    fn test_unflatten_mismatch_is_reported() {
        let mut config = NetworkConfig::default();
        config.conv[1].positions = 7;
        match config.validate() {
            Err(ModelError::ShapeMismatch { stage, expected, got }) => {
                assert_eq!(stage, "unflatten2");
                assert_eq!(expected, vec![7, 8]);
                assert_eq!(got, vec![8, 8]);
            }
            other => panic!("expected shape mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_unflatten_may_regroup_channels() {
        // 8x8 conv1 output read back as 16x4
        let mut config = NetworkConfig::default();
        config.conv[1] = ConvSpec::new(16, 4, 8, 3, 1);
        config.conv[2] = ConvSpec::new(14, 8, 8, 3, 1);
        config.validate().unwrap();
        assert_eq!(config.flatten_width().unwrap(), 12 * 8);
    }

    #[test]
    fn test_kernel_wider_than_input() {
        let mut config = NetworkConfig::default();
        config.conv[0].kernel_width = 11;
        assert!(matches!(
            config.validate(),
            Err(ModelError::ShapeMismatch { ref stage, .. }) if stage == "conv1"
        ));
    }

    #[test]
    fn test_mixed_overflow_rejected() {
        let mut config = NetworkConfig::default();
        config.precision.layer4.overflow = OverflowMode::Wrap;
        assert!(matches!(config.validate(), Err(ModelError::Config(_))));

        config.precision = config.precision.with_overflow(OverflowMode::Wrap);
        config.validate().unwrap();
    }

    #[test]
    fn test_result_format_must_hold_one() {
        let mut config = NetworkConfig::default();
        config.precision.result = FixedFormat::new(8, 1, OverflowMode::Saturate).unwrap();
        assert!(matches!(config.validate(), Err(ModelError::Config(_))));
    }

    #[test]
    fn test_json_defaults() {
        let config: NetworkConfig = serde_json::from_str("{\"n_outputs\": 3}").unwrap();
        assert_eq!(config.n_outputs, 3);
        assert_eq!(config.conv, NetworkConfig::default().conv);
        assert_eq!(config.precision, PrecisionConfig::default());
    }
}
