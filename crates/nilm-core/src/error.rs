//! Unified error types for the NILM ecosystem
//!
//! This module provides a common error type [`NilmError`] that can represent
//! errors from any part of the system. Domain-specific error types (training,
//! solving) convert to `NilmError` for uniform handling at API boundaries.
//!
//! # Example
//!
//! ```ignore
//! use nilm_core::{NilmError, NilmResult};
//!
//! fn run_pipeline(models: &ApplianceModels, mains: &[f64]) -> NilmResult<()> {
//!     validate_window(mains)?;
//!     for model in models.iter() {
//!         validate_model(model)?;
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all disaggregation operations.
///
/// This enum provides a common error representation across training,
/// inference, and validation, allowing errors to be handled uniformly.
#[derive(Error, Debug)]
pub enum NilmError {
    /// Data validation errors (malformed traces, inconsistent models)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Model fitting errors (degenerate traces, EM failures)
    #[error("Training error: {0}")]
    Training(String),

    /// Solver/inference errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using NilmError.
pub type NilmResult<T> = Result<T, NilmError>;

// Conversion from anyhow::Error
impl From<anyhow::Error> for NilmError {
    fn from(err: anyhow::Error) -> Self {
        NilmError::Other(err.to_string())
    }
}

// Conversion from string-like types for convenience
impl From<String> for NilmError {
    fn from(s: String) -> Self {
        NilmError::Other(s)
    }
}

impl From<&str> for NilmError {
    fn from(s: &str) -> Self {
        NilmError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NilmError::Solver("no feasible occupancy".into());
        assert!(err.to_string().contains("Solver error"));
        assert!(err.to_string().contains("no feasible occupancy"));
    }

    #[test]
    fn test_result_type_alias() {
        fn example_fn() -> NilmResult<i32> {
            Ok(42)
        }
        assert_eq!(example_fn().unwrap(), 42);
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> NilmResult<()> {
            Err(NilmError::Validation("test".into()))
        }

        fn outer() -> NilmResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
