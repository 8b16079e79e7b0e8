//! 32-bit word encodings at the buffer boundary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use convstream_fixed_point::{Fixed, FixedFormat};
use convstream_model::{Frame, NetworkEvaluator};

use crate::error::Result;

/// How a fixed-point value is carried in one 32-bit buffer word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireEncoding {
    /// The packed raw representation
    #[default]
    Raw,
    /// The integer value: decoding converts an integer into the format,
    /// encoding truncates toward zero
    Integer,
}

impl WireEncoding {
    /// Decode one word into a raw value of `format`
    pub fn decode(self, word: i32, format: FixedFormat) -> i32 {
        match self {
            WireEncoding::Raw => Fixed::from_raw(word, format).raw,
            WireEncoding::Integer => Fixed::from_int(word as i64, format).raw,
        }
    }

    /// Decode one frame's words into the evaluator's activation format
    pub fn decode_frame(self, words: &[i32], evaluator: &NetworkEvaluator) -> Result<Frame> {
        let format = evaluator.activation_format();
        let raw = words.iter().map(|&w| self.decode(w, format)).collect();
        Ok(evaluator.frame(raw)?)
    }

    /// Encode a raw value of `format` into one word
    pub fn encode(self, raw: i32, format: FixedFormat) -> i32 {
        match self {
            WireEncoding::Raw => raw,
            WireEncoding::Integer => Fixed::from_raw(raw, format).to_int(),
        }
    }
}

impl fmt::Display for WireEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireEncoding::Raw => write!(f, "raw"),
            WireEncoding::Integer => write!(f, "integer"),
        }
    }
}

impl FromStr for WireEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(WireEncoding::Raw),
            "integer" | "int" => Ok(WireEncoding::Integer),
            other => Err(format!("unknown wire encoding: {}", other)),
        }
    }
}
