//! Pipeline error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Model error: {0}")]
    Model(#[from] convstream_model::ModelError),

    #[error("Pipeline config error: {0}")]
    Config(String),

    #[error("Queue {queue} depth {depth} cannot hold one entry of {required} elements")]
    QueueCapacityExceeded {
        queue: &'static str,
        depth: usize,
        required: usize,
    },

    #[error("{buffer} buffer has {got} words, expected {expected}")]
    BufferLength {
        buffer: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Stage {stage} disconnected before the stream completed")]
    StageDisconnected { stage: &'static str },

    #[error("Stage {stage} panicked")]
    StagePanicked { stage: &'static str },

    #[error("Result out of order: expected frame {expected}, got {got}")]
    OrderViolation { expected: usize, got: usize },

    #[error("Session error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
