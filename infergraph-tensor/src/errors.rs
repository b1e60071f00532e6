//! Error types that are reported by tensor construction and reshaping.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors that can occur when constructing a tensor from existing data.
#[derive(Debug, PartialEq)]
pub enum FromDataError {
    /// The storage length was expected to exactly match the product of the
    /// shape, and it did not.
    StorageLengthMismatch { expected: usize, actual: usize },
}

impl Display for FromDataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FromDataError::StorageLengthMismatch { expected, actual } => write!(
                f,
                "data length mismatch. expected {} elements, got {}",
                expected, actual
            ),
        }
    }
}

impl Error for FromDataError {}

/// Errors that can occur when reshaping a tensor.
#[derive(Clone, Debug, PartialEq)]
pub enum ReshapeError {
    /// The new shape has a different number of elements than the current
    /// shape.
    LengthMismatch,
}

impl Display for ReshapeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReshapeError::LengthMismatch => {
                write!(f, "new shape must have same number of elements as current shape")
            }
        }
    }
}

impl Error for ReshapeError {}
