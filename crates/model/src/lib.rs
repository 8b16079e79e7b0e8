//! convstream Model
//!
//! Quantized 1-D convolutional classifier: configuration, weight tables,
//! layer evaluators and the assembled network.

mod config;
mod error;
mod layers;
mod network;
mod softmax;
mod weights;

pub use config::{
    conv1d_output_len, ConvSpec, FeatureShape, NetworkConfig, PrecisionConfig, CONV_BLOCKS,
};
pub use error::{ModelError, Result};
pub use layers::{flatten, relu, unflatten, Conv1d, Dense, FeatureMap, Unflatten};
pub use network::{Frame, NetworkEvaluator, StageTrace};
pub use softmax::Softmax;
pub use weights::{ConvWeights, DenseWeights, LayerTable, NetworkWeights, WeightFile};
