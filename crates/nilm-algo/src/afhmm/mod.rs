//! Additive factorial HMM inference under signal-aggregate constraints.
//!
//! - [`program`]: convex-program construction (variable layout, constraint
//!   set built once per window, per-round objective)
//! - [`solver`]: the alternating-minimization loop and result assembly
//! - [`disaggregate`]: chunked entry point over a long aggregate trace

use thiserror::Error;

use nilm_core::{validate_window, ApplianceModels, DisaggConfig, NilmError};

pub(crate) mod program;
mod solver;

pub use solver::{DisaggregationSolution, DisaggregationSolver};

/// Errors raised by the disaggregation solver.
///
/// Per-round solve failures are NOT errors: they degrade to zero occupancy
/// inside the round loop. These variants cover conditions under which the
/// window cannot be attempted at all.
#[derive(Debug, Clone, Error)]
pub enum DisaggError {
    /// Input data validation error (bad window, inconsistent models)
    #[error("disaggregation data validation: {0}")]
    DataValidation(String),

    /// Solver machinery could not be constructed
    #[error("disaggregation numerical issue: {0}")]
    NumericalIssue(String),
}

impl From<DisaggError> for NilmError {
    fn from(err: DisaggError) -> Self {
        NilmError::Solver(err.to_string())
    }
}

/// Disaggregate a long aggregate trace chunk by chunk.
///
/// The trace is split into consecutive windows of
/// `config.window_length` samples (the final window may be shorter) and each
/// window is solved independently: with the `parallel` feature on a rayon
/// worker per window, otherwise sequentially. Each worker owns exactly one
/// slot of the output; `collect` is the join barrier, after which results
/// are in chunk order. Models are shared immutably across workers.
pub fn disaggregate(
    models: &ApplianceModels,
    mains: &[f64],
    config: &DisaggConfig,
) -> Result<Vec<DisaggregationSolution>, DisaggError> {
    validate_window(mains).map_err(|e| DisaggError::DataValidation(e.to_string()))?;

    let chunks: Vec<&[f64]> = mains.chunks(config.window_length).collect();

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        chunks
            .par_iter()
            .map(|window| DisaggregationSolver::new(models, config).solve_window(window))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        chunks
            .iter()
            .map(|window| DisaggregationSolver::new(models, config).solve_window(window))
            .collect()
    }
}
