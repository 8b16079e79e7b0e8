//! convstream Fixed-Point Encoding
//!
//! Signed fixed-point numbers with a declared `<width, integer bits>` split,
//! used for every activation, weight and score in the inference pipeline.
//!
//! One numeric rule applies everywhere:
//! - dropped fraction bits are truncated toward negative infinity
//! - values outside the format follow its [`OverflowMode`] (saturate or wrap)

mod accumulator;
mod error;
mod fixed;
mod format;
mod vector;

pub use accumulator::Accumulator;
pub use error::{FixedPointError, Result};
pub use fixed::Fixed;
pub use format::{FixedFormat, OverflowMode, DEFAULT_FORMAT, MAX_WIDTH};
pub use vector::FixedVector;
