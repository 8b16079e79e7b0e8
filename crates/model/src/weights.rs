//! Model weight structures

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use convstream_fixed_point::{Fixed, FixedFormat};

use crate::config::{ConvSpec, NetworkConfig, CONV_BLOCKS};
use crate::error::{ModelError, Result};

fn quantize_table(values: &[f64], format: FixedFormat) -> Vec<i32> {
    values.iter().map(|&v| Fixed::from_f64(v, format).raw).collect()
}

fn dequantize_table(values: &[i32], format: FixedFormat) -> Vec<f64> {
    let ulp = format.ulp();
    values.iter().map(|&raw| raw as f64 * ulp).collect()
}

fn random_table(rng: &mut ChaCha20Rng, len: usize, bound: f64) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(-bound..bound)).collect()
}

fn check_len(stage: &str, expected: Vec<usize>, got: usize) -> Result<()> {
    let want: usize = expected.iter().product();
    if want != got {
        return Err(ModelError::shape(stage, expected, vec![got]));
    }
    Ok(())
}

/// Weights of a 1-D convolution, laid out `[kernel_offset][in_channel][filter]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvWeights {
    /// Raw weights in `format`
    pub weight: Vec<i32>,
    /// Raw per-filter biases in `format`
    pub bias: Vec<i32>,
    pub kernel_width: usize,
    pub in_channels: usize,
    pub filters: usize,
    pub format: FixedFormat,
}

impl ConvWeights {
    /// Quantize real-valued tables into `format`
    pub fn from_f64(
        stage: &str,
        weight: &[f64],
        bias: &[f64],
        spec: &ConvSpec,
        format: FixedFormat,
    ) -> Result<Self> {
        check_len(
            stage,
            vec![spec.kernel_width, spec.channels, spec.filters],
            weight.len(),
        )?;
        check_len(stage, vec![spec.filters], bias.len())?;

        Ok(Self {
            weight: quantize_table(weight, format),
            bias: quantize_table(bias, format),
            kernel_width: spec.kernel_width,
            in_channels: spec.channels,
            filters: spec.filters,
            format,
        })
    }

    fn seeded(rng: &mut ChaCha20Rng, spec: &ConvSpec, format: FixedFormat) -> Self {
        let fan_in = (spec.kernel_width * spec.channels).max(1);
        let bound = (2.0 / fan_in as f64).sqrt();
        let weight = random_table(rng, spec.kernel_width * spec.channels * spec.filters, bound);
        let bias = random_table(rng, spec.filters, 0.25);
        Self {
            weight: quantize_table(&weight, format),
            bias: quantize_table(&bias, format),
            kernel_width: spec.kernel_width,
            in_channels: spec.channels,
            filters: spec.filters,
            format,
        }
    }

    /// Raw weight at `(k, c, f)`
    #[inline]
    pub fn get_weight(&self, k: usize, c: usize, f: usize) -> i32 {
        self.weight[(k * self.in_channels + c) * self.filters + f]
    }

    /// Check that the tables match a conv block
    pub fn validate_against(&self, stage: &str, spec: &ConvSpec) -> Result<()> {
        let declared = [spec.kernel_width, spec.channels, spec.filters];
        let held = [self.kernel_width, self.in_channels, self.filters];
        if declared != held {
            return Err(ModelError::shape(stage, declared.to_vec(), held.to_vec()));
        }
        check_len(stage, declared.to_vec(), self.weight.len())?;
        check_len(stage, vec![spec.filters], self.bias.len())
    }

    fn to_table(&self) -> LayerTable {
        LayerTable {
            weight: dequantize_table(&self.weight, self.format),
            bias: dequantize_table(&self.bias, self.format),
        }
    }
}

/// Weights of a dense layer (Y = XW + b), laid out `[in][out]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseWeights {
    /// Raw weight matrix (in_features × out_features) in `format`
    pub weight: Vec<i32>,
    /// Raw biases (out_features) in `format`
    pub bias: Vec<i32>,
    pub in_features: usize,
    pub out_features: usize,
    pub format: FixedFormat,
}

impl DenseWeights {
    /// Quantize a real-valued row-major matrix and bias into `format`
    pub fn from_f64(
        stage: &str,
        weight: &[f64],
        bias: &[f64],
        in_features: usize,
        out_features: usize,
        format: FixedFormat,
    ) -> Result<Self> {
        check_len(stage, vec![in_features, out_features], weight.len())?;
        check_len(stage, vec![out_features], bias.len())?;

        Ok(Self {
            weight: quantize_table(weight, format),
            bias: quantize_table(bias, format),
            in_features,
            out_features,
            format,
        })
    }

    fn seeded(
        rng: &mut ChaCha20Rng,
        in_features: usize,
        out_features: usize,
        format: FixedFormat,
    ) -> Self {
        // Kaiming-like bound
        let bound = (2.0 / in_features.max(1) as f64).sqrt();
        let weight = random_table(rng, in_features * out_features, bound);
        let bias = random_table(rng, out_features, 0.25);
        Self {
            weight: quantize_table(&weight, format),
            bias: quantize_table(&bias, format),
            in_features,
            out_features,
            format,
        }
    }

    /// Raw weight at `(in_idx, out_idx)`
    #[inline]
    pub fn get_weight(&self, in_idx: usize, out_idx: usize) -> i32 {
        self.weight[in_idx * self.out_features + out_idx]
    }

    pub fn validate_against(&self, stage: &str, in_features: usize, out_features: usize) -> Result<()> {
        if (self.in_features, self.out_features) != (in_features, out_features) {
            return Err(ModelError::shape(
                stage,
                vec![in_features, out_features],
                vec![self.in_features, self.out_features],
            ));
        }
        check_len(stage, vec![in_features, out_features], self.weight.len())?;
        check_len(stage, vec![out_features], self.bias.len())
    }

    fn to_table(&self) -> LayerTable {
        LayerTable {
            weight: dequantize_table(&self.weight, self.format),
            bias: dequantize_table(&self.bias, self.format),
        }
    }
}

/// Real-valued weight and bias table of one layer, as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerTable {
    pub weight: Vec<f64>,
    pub bias: Vec<f64>,
}

/// On-disk weight file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightFile {
    pub conv: Vec<LayerTable>,
    pub dense4: LayerTable,
    pub dense5: LayerTable,
}

/// All weights of the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkWeights {
    pub conv: [ConvWeights; CONV_BLOCKS],
    pub dense4: DenseWeights,
    pub dense5: DenseWeights,
}

impl NetworkWeights {
    /// Deterministic weights drawn from a ChaCha20 stream seeded with `seed`
    pub fn seeded(config: &NetworkConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let format = config.precision.weight;
        let mut rng = ChaCha20Rng::seed_from_u64(seed);

        let conv = [
            ConvWeights::seeded(&mut rng, &config.conv[0], format),
            ConvWeights::seeded(&mut rng, &config.conv[1], format),
            ConvWeights::seeded(&mut rng, &config.conv[2], format),
        ];
        let dense4 = DenseWeights::seeded(&mut rng, config.flatten_width()?, config.dense_width, format);
        let dense5 = DenseWeights::seeded(&mut rng, config.dense_width, config.n_outputs, format);

        tracing::debug!(seed, "generated seeded weights");
        Ok(Self { conv, dense4, dense5 })
    }

    /// Quantize a parsed weight file against `config`
    pub fn from_weight_file(file: &WeightFile, config: &NetworkConfig) -> Result<Self> {
        config.validate()?;
        if file.conv.len() != CONV_BLOCKS {
            return Err(ModelError::shape("conv", vec![CONV_BLOCKS], vec![file.conv.len()]));
        }
        let format = config.precision.weight;

        let conv_layer = |i: usize| {
            let table = &file.conv[i];
            ConvWeights::from_f64(
                &format!("conv{}", i + 1),
                &table.weight,
                &table.bias,
                &config.conv[i],
                format,
            )
        };
        let conv = [conv_layer(0)?, conv_layer(1)?, conv_layer(2)?];
        let dense4 = DenseWeights::from_f64(
            "dense4",
            &file.dense4.weight,
            &file.dense4.bias,
            config.flatten_width()?,
            config.dense_width,
            format,
        )?;
        let dense5 = DenseWeights::from_f64(
            "dense5",
            &file.dense5.weight,
            &file.dense5.bias,
            config.dense_width,
            config.n_outputs,
            format,
        )?;

        Ok(Self { conv, dense4, dense5 })
    }

    /// Parse and quantize a JSON weight file
    pub fn from_json_str(json: &str, config: &NetworkConfig) -> Result<Self> {
        let file: WeightFile = serde_json::from_str(json)?;
        Self::from_weight_file(&file, config)
    }

    /// Load weights from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P, config: &NetworkConfig) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let weights = Self::from_json_str(&content, config)?;
        tracing::info!(path = %path.display(), "loaded weights");
        Ok(weights)
    }

    /// Real-valued view of the tables
    pub fn to_weight_file(&self) -> WeightFile {
        WeightFile {
            conv: self.conv.iter().map(ConvWeights::to_table).collect(),
            dense4: self.dense4.to_table(),
            dense5: self.dense5.to_table(),
        }
    }

    /// Write the tables as a JSON weight file
    pub fn save_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_weight_file())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check every table against the shapes `config` declares
    pub fn validate_against(&self, config: &NetworkConfig) -> Result<()> {
        for (i, (weights, spec)) in self.conv.iter().zip(&config.conv).enumerate() {
            weights.validate_against(&format!("conv{}", i + 1), spec)?;
        }
        self.dense4
            .validate_against("dense4", config.flatten_width()?, config.dense_width)?;
        self.dense5
            .validate_against("dense5", config.dense_width, config.n_outputs)
    }
}
