//! Decoded field values

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value decoded from a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Scaled numeric value (also 0/1 for bit fields)
    Scalar(f64),
    /// ASCII text, trailing NULs removed
    String(String),
}

impl Value {
    /// Get as scalar, returning None for strings
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::String(_) => None,
        }
    }

    /// Get as string, returning None for scalars
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Scalar(_) => None,
        }
    }

    /// Render with a fixed number of decimals; strings are returned verbatim
    pub fn format(&self, decimals: usize) -> String {
        match self {
            Value::Scalar(v) => format!("{:.*}", decimals, v),
            Value::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
