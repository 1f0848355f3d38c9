//! Configuration surface for training and inference.
//!
//! Two layers: [`DisaggConfig`] holds the model/schedule constants shared by
//! the trainer and the solver (state count, window length, round count, noise
//! model), [`SolverConfig`] holds the interior-point solver knobs.

use serde::{Deserialize, Serialize};

use crate::{NilmError, NilmResult};

/// Configuration for the disaggregation pipeline.
///
/// `num_states` and `window_length` must match between training and
/// inference: the per-appliance energy budget is `mean(trace) ×
/// window_length`, so the aggregate constraint is only physically meaningful
/// when inference windows have the same length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisaggConfig {
    /// Number of hidden states per appliance, shared across the collection
    /// (default: 2)
    pub num_states: usize,
    /// Inference window length in samples; also the horizon over which each
    /// appliance's energy budget is computed and enforced (default: 720)
    pub window_length: usize,
    /// Number of alternating-minimization rounds per window (default: 3).
    /// A fixed empirical schedule, not a convergence-checked loop.
    pub rounds: usize,
    /// Lower bound on the per-step noise level, guarding the residual and
    /// log-normalization terms against division by zero (default: 1.0)
    pub noise_floor: f64,
    /// Noise level used for every time step before the first solve
    /// (default: 100.0)
    pub initial_noise: f64,
    /// Maximum Baum-Welch iterations per appliance fit (default: 50)
    pub em_max_iterations: usize,
    /// Log-likelihood improvement below which the EM loop stops
    /// (default: 1e-5)
    pub em_tolerance: f64,
    /// Interior-point solver settings for the per-round convex program
    pub solver: SolverConfig,
}

impl Default for DisaggConfig {
    fn default() -> Self {
        Self {
            num_states: 2,
            window_length: 720,
            rounds: 3,
            noise_floor: 1.0,
            initial_noise: 100.0,
            em_max_iterations: 50,
            em_tolerance: 1e-5,
            solver: SolverConfig::default(),
        }
    }
}

impl DisaggConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> NilmResult<()> {
        if self.num_states == 0 {
            return Err(NilmError::Config("num_states must be > 0".into()));
        }
        if self.window_length == 0 {
            return Err(NilmError::Config("window_length must be > 0".into()));
        }
        if self.rounds == 0 {
            return Err(NilmError::Config("rounds must be > 0".into()));
        }
        if !(self.noise_floor > 0.0) {
            return Err(NilmError::Config(format!(
                "noise_floor must be positive, got {}",
                self.noise_floor
            )));
        }
        if !(self.initial_noise >= self.noise_floor) {
            return Err(NilmError::Config(format!(
                "initial_noise ({}) must be at least noise_floor ({})",
                self.initial_noise, self.noise_floor
            )));
        }
        Ok(())
    }
}

/// Configuration for the convex solver.
///
/// Default values are tuned for disaggregation windows:
/// - 100 interior-point iterations is ample for these LP/QP-structured programs
/// - 1e-6 tolerances are well below the watt-level accuracy of the output
/// - Equilibration helps when state means span orders of magnitude
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum interior point iterations (default: 100)
    pub max_iter: u32,
    /// Primal/dual feasibility tolerance (default: 1e-6)
    pub tol_feas: f64,
    /// Duality gap tolerance (default: 1e-6)
    pub tol_gap: f64,
    /// Enable matrix equilibration for better conditioning (default: true)
    pub equilibrate: bool,
    /// Verbose solver output (default: false)
    pub verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol_feas: 1e-6,
            tol_gap: 1e-6,
            equilibrate: true,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DisaggConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_states, 2);
        assert_eq!(config.window_length, 720);
        assert_eq!(config.rounds, 3);
    }

    #[test]
    fn zero_states_rejected() {
        let config = DisaggConfig {
            num_states: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn noise_floor_must_be_positive() {
        let config = DisaggConfig {
            noise_floor: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = DisaggConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: DisaggConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.num_states, config.num_states);
        assert_eq!(back.solver.max_iter, config.solver.max_iter);
    }
}
