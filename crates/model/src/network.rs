//! The assembled network
//!
//! conv1 → flatten → relu1 → unflatten → conv2 → flatten → relu2 →
//! unflatten → conv3 → flatten → relu3 → dense4 → relu4 → dense5 → softmax

use rayon::prelude::*;

use convstream_fixed_point::{FixedFormat, FixedVector};

use crate::config::{FeatureShape, NetworkConfig};
use crate::error::{ModelError, Result};
use crate::layers::{flatten, relu, Conv1d, Dense, FeatureMap, Unflatten};
use crate::softmax::Softmax;
use crate::weights::NetworkWeights;

/// One input frame: `[positions][channels]` in the activation format
pub type Frame = FeatureMap;

/// Output of one stage, recorded by [`NetworkEvaluator::trace`]
#[derive(Debug, Clone, PartialEq)]
pub struct StageTrace {
    pub stage: &'static str,
    pub shape: Vec<usize>,
    pub format: FixedFormat,
    pub raw: Vec<i32>,
}

impl StageTrace {
    pub fn values(&self) -> Vec<f64> {
        let ulp = self.format.ulp();
        self.raw.iter().map(|&r| r as f64 * ulp).collect()
    }
}

/// Bit-exact evaluator for the fixed topology. Immutable once built, so a
/// single instance is shared by every evaluation.
#[derive(Debug, Clone)]
pub struct NetworkEvaluator {
    config: NetworkConfig,
    conv: [Conv1d; 3],
    unflatten: [Unflatten; 2],
    dense4: Dense,
    dense5: Dense,
    softmax: Softmax,
}

impl NetworkEvaluator {
    /// Assemble the network, checking every shape contract between stages
    pub fn new(config: NetworkConfig, weights: NetworkWeights) -> Result<Self> {
        config.validate()?;
        weights.validate_against(&config)?;

        let precision = config.precision;
        let act = precision.activation;
        let NetworkWeights { conv, dense4, dense5 } = weights;
        let [w1, w2, w3] = conv;

        let conv = [
            Conv1d::new("conv1", config.conv[0], w1, act)?,
            Conv1d::new("conv2", config.conv[1], w2, act)?,
            Conv1d::new("conv3", config.conv[2], w3, act)?,
        ];
        let unflatten = [
            Unflatten::new(conv[0].output_shape().len(), config.conv[1].input_shape())?,
            Unflatten::new(conv[1].output_shape().len(), config.conv[2].input_shape())?,
        ];
        let dense4 = Dense::new("dense4", dense4, precision.layer4)?;
        let dense5 = Dense::new("dense5", dense5, precision.result)?;

        let flat = conv[2].output_shape().len();
        if dense4.in_features() != flat {
            return Err(ModelError::shape("dense4", vec![flat], vec![dense4.in_features()]));
        }
        if dense5.in_features() != dense4.out_features() {
            return Err(ModelError::shape(
                "dense5",
                vec![dense4.out_features()],
                vec![dense5.in_features()],
            ));
        }
        let softmax = Softmax::new(
            dense5.out_features(),
            precision.result,
            precision.result,
            config.softmax_table_size,
        )?;

        tracing::info!(
            frame = ?config.frame_shape(),
            outputs = config.n_outputs,
            overflow = ?precision.overflow(),
            "assembled network"
        );

        Ok(Self {
            config,
            conv,
            unflatten,
            dense4,
            dense5,
            softmax,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn frame_shape(&self) -> FeatureShape {
        self.config.frame_shape()
    }

    pub fn input_width(&self) -> usize {
        self.config.input_width()
    }

    pub fn output_width(&self) -> usize {
        self.config.output_width()
    }

    pub fn activation_format(&self) -> FixedFormat {
        self.config.precision.activation
    }

    pub fn result_format(&self) -> FixedFormat {
        self.config.precision.result
    }

    /// Wrap raw activation-format words as a frame; out-of-format words
    /// follow the overflow policy
    pub fn frame(&self, raw: Vec<i32>) -> Result<Frame> {
        FeatureMap::new(raw, self.frame_shape(), self.activation_format())
    }

    fn check_frame(&self, frame: &Frame) -> Result<()> {
        let expected = self.frame_shape();
        if frame.shape != expected {
            return Err(ModelError::shape("input", expected.dims(), frame.shape.dims()));
        }
        if frame.data.len() != expected.len() {
            return Err(ModelError::shape("input", expected.dims(), vec![frame.data.len()]));
        }
        Ok(())
    }

    fn forward<F>(&self, frame: &Frame, mut observe: F) -> Result<FixedVector>
    where
        F: FnMut(&'static str, &[usize], &[i32], FixedFormat),
    {
        let act = self.config.precision.activation;
        let layer4 = self.config.precision.layer4;

        let mut map = self.conv[0].forward(frame)?;
        observe("conv1", &map.shape.dims(), &map.data, map.format);
        let mut x = relu(&flatten(map), act);
        observe("relu1", &[x.len()], &x.data, x.format);

        map = self.conv[1].forward(&self.unflatten[0].forward(x))?;
        observe("conv2", &map.shape.dims(), &map.data, map.format);
        x = relu(&flatten(map), act);
        observe("relu2", &[x.len()], &x.data, x.format);

        map = self.conv[2].forward(&self.unflatten[1].forward(x))?;
        observe("conv3", &map.shape.dims(), &map.data, map.format);
        x = relu(&flatten(map), act);
        observe("relu3", &[x.len()], &x.data, x.format);

        x = self.dense4.forward(&x)?;
        observe("dense4", &[x.len()], &x.data, x.format);
        x = relu(&x, layer4);
        observe("relu4", &[x.len()], &x.data, x.format);

        x = self.dense5.forward(&x)?;
        observe("dense5", &[x.len()], &x.data, x.format);
        x = self.softmax.forward(&x);
        observe("softmax", &[x.len()], &x.data, x.format);
        Ok(x)
    }

    /// Class scores for one frame. Fails only when the frame does not have
    /// the configured shape.
    pub fn evaluate(&self, frame: &Frame) -> Result<FixedVector> {
        self.check_frame(frame)?;
        self.forward(frame, |_, _, _, _| {})
    }

    /// Evaluate independent frames in parallel, preserving order
    pub fn evaluate_batch(&self, frames: &[Frame]) -> Result<Vec<FixedVector>> {
        frames.par_iter().map(|frame| self.evaluate(frame)).collect()
    }

    /// Every intermediate tensor of one evaluation, input first
    pub fn trace(&self, frame: &Frame) -> Result<Vec<StageTrace>> {
        self.check_frame(frame)?;
        let mut stages = vec![StageTrace {
            stage: "input",
            shape: frame.shape.dims(),
            format: frame.format,
            raw: frame.data.clone(),
        }];
        self.forward(frame, |stage, shape, raw, format| {
            stages.push(StageTrace {
                stage,
                shape: shape.to_vec(),
                format,
                raw: raw.to_vec(),
            })
        })?;
        Ok(stages)
    }

    /// Evaluate an all-zero frame and check the output width and the
    /// softmax normalization
    pub fn self_check(&self) -> Result<()> {
        let frame = FeatureMap::zeros(self.frame_shape(), self.activation_format());
        let out = self.evaluate(&frame)?;

        if out.len() != self.output_width() {
            return Err(ModelError::shape(
                "self_check",
                vec![self.output_width()],
                vec![out.len()],
            ));
        }
        let sum = out.sum_f64();
        let tolerance = self.softmax.tolerance();
        if out.data.iter().any(|&x| x < 0) || sum > 1.0 || sum <= 1.0 - tolerance {
            return Err(ModelError::Config(format!(
                "self-check failed: softmax sum {} outside (1 - {}, 1]",
                sum, tolerance
            )));
        }
        tracing::debug!(sum, "network self-check passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convstream_fixed_point::OverflowMode;

    fn evaluator(seed: u64) -> NetworkEvaluator {
        let config = NetworkConfig::default();
        let weights = NetworkWeights::seeded(&config, seed).unwrap();
        NetworkEvaluator::new(config, weights).unwrap()
    }

    fn ramp_frame(net: &NetworkEvaluator, offset: f64) -> Frame {
        let values: Vec<f64> = (0..net.input_width())
            .map(|i| ((i as f64 + offset) * 0.37).sin() * 4.0)
            .collect();
        let v = FixedVector::from_f64_slice(&values, net.activation_format());
        net.frame(v.data).unwrap()
    }

    #[test]
    fn test_evaluate_shape_and_normalization() {
        let net = evaluator(42);
        let out = net.evaluate(&ramp_frame(&net, 0.0)).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out.format, net.result_format());
        assert!(out.data.iter().all(|&x| x >= 0));
        let sum = out.sum_f64();
        assert!(sum <= 1.0 && sum > 1.0 - 5.0 * out.format.ulp());
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let a = evaluator(42);
        let b = evaluator(42);
        let frame = ramp_frame(&a, 1.0);
        assert_eq!(a.evaluate(&frame).unwrap(), b.evaluate(&frame).unwrap());
        assert_eq!(a.evaluate(&frame).unwrap(), a.evaluate(&frame).unwrap());
    }

    #[test]
    fn test_zero_frame_is_bias_driven() {
        let net = evaluator(42);
        let zero = FeatureMap::zeros(net.frame_shape(), net.activation_format());
        let trace = net.trace(&zero).unwrap();
        let dense5 = trace.iter().find(|s| s.stage == "dense5").unwrap();
        assert!(dense5.raw.iter().any(|&x| x != 0));
        net.self_check().unwrap();
    }

    #[test]
    fn test_batch_matches_single() {
        let net = evaluator(9);
        let frames: Vec<Frame> = (0..16).map(|i| ramp_frame(&net, i as f64)).collect();
        let batch = net.evaluate_batch(&frames).unwrap();
        assert_eq!(batch.len(), frames.len());
        for (frame, out) in frames.iter().zip(&batch) {
            assert_eq!(&net.evaluate(frame).unwrap(), out);
        }
    }

    #[test]
    fn test_trace_stages() {
        let net = evaluator(1);
        let trace = net.trace(&ramp_frame(&net, 0.0)).unwrap();
        let names: Vec<&str> = trace.iter().map(|s| s.stage).collect();
        assert_eq!(
            names,
            vec![
                "input", "conv1", "relu1", "conv2", "relu2", "conv3", "relu3", "dense4", "relu4",
                "dense5", "softmax"
            ]
        );
        assert_eq!(trace[0].shape, vec![10, 4]);
        assert_eq!(trace[1].shape, vec![8, 8]);
        assert_eq!(trace[3].shape, vec![6, 8]);
        assert_eq!(trace[5].shape, vec![4, 8]);
        assert_eq!(trace[6].shape, vec![32]);
        assert_eq!(trace[7].format, net.config().precision.layer4);
        assert!(trace[8].raw.iter().all(|&x| x >= 0));
        assert_eq!(trace.last().unwrap().raw, net.evaluate(&ramp_frame(&net, 0.0)).unwrap().data);
    }

    #[test]
    fn test_frame_words_follow_overflow_policy() {
        let net = evaluator(3);
        // Words past the 16-bit range, as in later synthetic events
        let words: Vec<i32> = (0..net.input_width() as i32).map(|j| 39_488 + 12 * j).collect();
        let frame = net.frame(words.clone()).unwrap();
        assert!(frame.data.iter().all(|&x| x == net.activation_format().max_raw()));

        let trace = net.trace(&frame).unwrap();
        assert!(trace[0].raw.iter().all(|&x| x <= net.activation_format().max_raw()));

        let fitted = FixedVector::from_raw(words, net.activation_format());
        let expected = net.evaluate(&net.frame(fitted.data).unwrap()).unwrap();
        assert_eq!(net.evaluate(&frame).unwrap(), expected);
        assert_eq!(trace.last().unwrap().raw, expected.data);
    }

    #[test]
    fn test_frame_with_wrong_shape_rejected() {
        let net = evaluator(3);
        // Same element count as 10x4, different channel stride
        let transposed = FeatureMap::zeros(FeatureShape::new(20, 2), net.activation_format());
        for result in [net.evaluate(&transposed).map(|_| ()), net.trace(&transposed).map(|_| ())] {
            match result {
                Err(ModelError::ShapeMismatch { stage, expected, got }) => {
                    assert_eq!(stage, "input");
                    assert_eq!(expected, vec![10, 4]);
                    assert_eq!(got, vec![20, 2]);
                }
                other => panic!("expected shape mismatch, got {:?}", other),
            }
        }

        let mut truncated = FeatureMap::zeros(net.frame_shape(), net.activation_format());
        truncated.data.pop();
        assert!(net.evaluate_batch(&[truncated]).is_err());
    }

    #[test]
    fn test_wrap_mode_network() {
        let config = NetworkConfig {
            precision: NetworkConfig::default().precision.with_overflow(OverflowMode::Wrap),
            ..NetworkConfig::default()
        };
        let weights = NetworkWeights::seeded(&config, 5).unwrap();
        let net = NetworkEvaluator::new(config, weights).unwrap();
        net.self_check().unwrap();
    }

    #[test]
    fn test_mismatched_weights_rejected() {
        let config = NetworkConfig::default();
        let mut weights = NetworkWeights::seeded(&config, 0).unwrap();
        weights.conv[2].bias.pop();
        assert!(matches!(
            NetworkEvaluator::new(config, weights),
            Err(ModelError::ShapeMismatch { ref stage, .. }) if stage == "conv3"
        ));
    }
}
