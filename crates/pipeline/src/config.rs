//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::wire::WireEncoding;

/// How the three stages are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Ingest and compute on scoped worker threads, emit on the caller
    #[default]
    Threaded,
    /// Single-thread round-robin over the same queues
    Sequential,
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleMode::Threaded => write!(f, "threaded"),
            ScheduleMode::Sequential => write!(f, "sequential"),
        }
    }
}

impl FromStr for ScheduleMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "threaded" => Ok(ScheduleMode::Threaded),
            "sequential" => Ok(ScheduleMode::Sequential),
            other => Err(format!("unknown schedule mode: {}", other)),
        }
    }
}

/// Streaming pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Frames per invocation
    #[serde(default = "default_stream_size")]
    pub stream_size: usize,

    /// Frame queue depth in elements (default: stream_size × frame width)
    #[serde(default)]
    pub ingest_depth: Option<usize>,

    /// Result queue depth in elements (default: stream_size × output width)
    #[serde(default)]
    pub result_depth: Option<usize>,

    #[serde(default)]
    pub schedule: ScheduleMode,

    #[serde(default)]
    pub input_encoding: WireEncoding,

    #[serde(default)]
    pub output_encoding: WireEncoding,
}

fn default_stream_size() -> usize { 8 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream_size: default_stream_size(),
            ingest_depth: None,
            result_depth: None,
            schedule: ScheduleMode::default(),
            input_encoding: WireEncoding::default(),
            output_encoding: WireEncoding::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(size) = std::env::var("CONVSTREAM_STREAM_SIZE") {
            if let Ok(s) = size.parse() {
                config.stream_size = s;
            }
        }

        if let Ok(depth) = std::env::var("CONVSTREAM_INGEST_DEPTH") {
            if let Ok(d) = depth.parse() {
                config.ingest_depth = Some(d);
            }
        }

        if let Ok(depth) = std::env::var("CONVSTREAM_RESULT_DEPTH") {
            if let Ok(d) = depth.parse() {
                config.result_depth = Some(d);
            }
        }

        if let Ok(mode) = std::env::var("CONVSTREAM_SCHEDULE") {
            if let Ok(m) = mode.parse() {
                config.schedule = m;
            }
        }

        if let Ok(enc) = std::env::var("CONVSTREAM_INPUT_ENCODING") {
            if let Ok(e) = enc.parse() {
                config.input_encoding = e;
            }
        }

        if let Ok(enc) = std::env::var("CONVSTREAM_OUTPUT_ENCODING") {
            if let Ok(e) = enc.parse() {
                config.output_encoding = e;
            }
        }

        config
    }

    pub fn with_stream_size(mut self, stream_size: usize) -> Self {
        self.stream_size = stream_size;
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleMode) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_size == 0 {
            return Err(PipelineError::Config(
                "stream_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Words in a buffer of `stream_size` entries of `width` words each
    pub fn buffer_len(&self, width: usize) -> Result<usize> {
        self.stream_size.checked_mul(width).ok_or_else(|| {
            PipelineError::Config(format!(
                "stream_size {} × width {} overflows the buffer length",
                self.stream_size, width
            ))
        })
    }

    /// Frame queue depth in elements for frames of `frame_width` words
    pub fn ingest_depth_for(&self, frame_width: usize) -> Result<usize> {
        match self.ingest_depth {
            Some(depth) => Ok(depth),
            None => self.buffer_len(frame_width),
        }
    }

    /// Result queue depth in elements for results of `output_width` words
    pub fn result_depth_for(&self, output_width: usize) -> Result<usize> {
        match self.result_depth {
            Some(depth) => Ok(depth),
            None => self.buffer_len(output_width),
        }
    }
}
