//! Accelerator session abstraction

use crate::error::{PipelineError, Result};
use crate::pipeline::{RunStats, StreamingPipeline};

/// A device (or stand-in) that consumes one input buffer and fills one
/// output buffer per invocation
pub trait AcceleratorSession {
    /// Words the input buffer must hold
    fn input_len(&self) -> usize;

    /// Words the output buffer must hold
    fn output_len(&self) -> usize;

    /// Run one invocation to completion
    fn execute(&mut self, input: &[i32], output: &mut [i32]) -> Result<()>;
}

/// Session that runs the streaming pipeline in-process
pub struct SoftwareSession {
    pipeline: StreamingPipeline,
    last_stats: Option<RunStats>,
}

impl SoftwareSession {
    /// Open a session; the network self-check runs once here
    pub fn new(pipeline: StreamingPipeline) -> Result<Self> {
        pipeline
            .evaluator()
            .self_check()
            .map_err(|e| PipelineError::Session(format!("network self-check failed: {}", e)))?;
        tracing::info!(
            input_len = pipeline.input_len(),
            output_len = pipeline.output_len(),
            "software session opened"
        );
        Ok(Self {
            pipeline,
            last_stats: None,
        })
    }

    pub fn pipeline(&self) -> &StreamingPipeline {
        &self.pipeline
    }

    /// Statistics of the most recent successful invocation
    pub fn last_stats(&self) -> Option<RunStats> {
        self.last_stats
    }
}

impl AcceleratorSession for SoftwareSession {
    fn input_len(&self) -> usize {
        self.pipeline.input_len()
    }

    fn output_len(&self) -> usize {
        self.pipeline.output_len()
    }

    fn execute(&mut self, input: &[i32], output: &mut [i32]) -> Result<()> {
        let stats = self.pipeline.run(input, output)?;
        self.last_stats = Some(stats);
        Ok(())
    }
}
