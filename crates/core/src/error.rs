//! Error types for RRN

use thiserror::Error;

/// Main error type for RRN operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Insufficient data: accumulated weight {weight_sum} must exceed 1")]
    InsufficientData { weight_sum: f64 },

    #[error("Singular {which} matrix: {detail}")]
    SingularCovariance { which: &'static str, detail: String },

    #[error(
        "Complex eigenvalues: relative asymmetry {asymmetry:.3e} exceeds tolerance {tolerance:.3e}"
    )]
    ComplexEigenvalue { asymmetry: f64, tolerance: f64 },

    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Not enough (weighted) samples yet; pushing more data can fix it.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Error::InsufficientData { .. })
    }

    /// The data itself is numerically degenerate; more of the same will not help.
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            Error::SingularCovariance { .. } | Error::ComplexEigenvalue { .. }
        )
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Error::Other(e.to_string())
    }
}

/// Result type alias for RRN operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let e = Error::InsufficientData { weight_sum: 1.0 };
        assert!(e.is_insufficient_data());
        assert!(!e.is_degenerate());

        let e = Error::SingularCovariance {
            which: "xx covariance",
            detail: "min eigenvalue 0".into(),
        };
        assert!(e.is_degenerate());
        assert!(!e.is_insufficient_data());

        let e = Error::ComplexEigenvalue {
            asymmetry: 1e-3,
            tolerance: 1e-8,
        };
        assert!(e.is_degenerate());
    }

    #[test]
    fn test_shape_mismatch_message() {
        let e = Error::ShapeMismatch {
            context: "y batch",
            expected: (10, 3),
            actual: (10, 4),
        };
        let msg = e.to_string();
        assert!(msg.contains("y batch"), "message was {}", msg);
        assert!(msg.contains("(10, 4)"), "message was {}", msg);
    }
}
