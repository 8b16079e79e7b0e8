//! Fixed-point error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FixedPointError {
    #[error("Invalid fixed-point format: width {width}, integer bits {int_bits} (width must be 1-32, integer bits <= width)")]
    InvalidFormat { width: u8, int_bits: u8 },
}

pub type Result<T> = std::result::Result<T, FixedPointError>;
