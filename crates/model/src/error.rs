//! Model error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shape mismatch at {stage}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        stage: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Fixed-point error: {0}")]
    FixedPoint(#[from] convstream_fixed_point::FixedPointError),

    #[error("Model config error: {0}")]
    Config(String),
}

impl ModelError {
    pub(crate) fn shape(stage: impl Into<String>, expected: Vec<usize>, got: Vec<usize>) -> Self {
        Self::ShapeMismatch {
            stage: stage.into(),
            expected,
            got,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
