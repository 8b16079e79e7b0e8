//! convstream Streaming Pipeline
//!
//! Ingest, compute and emit stages joined by bounded FIFO queues, plus the
//! accelerator-session boundary and the host-side event loop that drives it.

mod config;
mod driver;
mod error;
mod pipeline;
mod queue;
mod session;
mod wire;

pub use config::{PipelineConfig, ScheduleMode};
pub use driver::{synthetic_event_input, HostDriver};
pub use error::{PipelineError, Result};
pub use pipeline::{CancelToken, RunStats, StreamingPipeline};
pub use queue::{QueueSpec, Sequenced};
pub use session::{AcceleratorSession, SoftwareSession};
pub use wire::WireEncoding;
