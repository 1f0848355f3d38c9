//! Per-appliance model training.
//!
//! Fits one [`GaussianHmm`] per appliance from its historical power trace,
//! decodes the most likely state sequence, and derives the quantities the
//! disaggregation solver consumes: state means, the transposed transition
//! matrix, the empirical state-occupancy distribution, and the energy budget
//! enforced over each inference window.

use tracing::info;

use nilm_core::{ApplianceModel, ApplianceModels, DisaggConfig, NilmError, NilmResult, PROB_FLOOR};

use crate::hmm::{GaussianHmm, TrainError};

/// Probability assigned to states never observed in the decoded training
/// sequence, before renormalization. Large enough to keep `ln()` well
/// conditioned, small enough that an unobserved state stays strongly
/// penalized during inference.
pub const ABSENT_STATE_FLOOR: f64 = 1e-6;

/// Trains [`ApplianceModel`]s from historical per-appliance power traces.
///
/// Training is independent per appliance; the trainer holds no state beyond
/// its configuration and may be shared freely.
#[derive(Debug, Clone)]
pub struct ApplianceModelTrainer {
    config: DisaggConfig,
}

impl ApplianceModelTrainer {
    pub fn new(config: DisaggConfig) -> Self {
        Self { config }
    }

    /// Fit one appliance's model from its concatenated historical trace.
    ///
    /// # Errors
    ///
    /// Degenerate traces (constant value, fewer samples than states) are an
    /// unrecoverable fit failure and propagate as [`TrainError`]; nothing is
    /// masked here.
    pub fn train(&self, name: &str, trace: &[f64]) -> Result<ApplianceModel, TrainError> {
        let k = self.config.num_states;
        let hmm = GaussianHmm::fit(
            trace,
            k,
            self.config.em_max_iterations,
            self.config.em_tolerance,
        )?;
        let states = hmm.decode(trace);

        // Empirical occupancy frequency of each decoded state, in ascending
        // state order. Never-decoded states get ABSENT_STATE_FLOOR and the
        // vector is renormalized.
        let mut counts = vec![0_usize; k];
        for &s in &states {
            counts[s] += 1;
        }
        let total = states.len() as f64;
        let mut initial: Vec<f64> = counts
            .iter()
            .map(|&c| {
                if c == 0 {
                    ABSENT_STATE_FLOOR
                } else {
                    c as f64 / total
                }
            })
            .collect();
        let norm: f64 = initial.iter().sum();
        for p in initial.iter_mut() {
            *p /= norm;
        }

        // Store the transition matrix transposed; the solver reads it
        // column-stochastic going forward. Entries are floored so every
        // logarithm taken downstream is defined.
        let mut transition = vec![0.0; k * k];
        for i in 0..k {
            for j in 0..k {
                transition[i * k + j] = hmm.transition[j * k + i].max(PROB_FLOOR);
            }
        }

        let state_means: Vec<f64> = hmm.means.iter().map(|&m| m.max(0.0)).collect();

        let mean_power = trace.iter().sum::<f64>() / trace.len() as f64;
        let energy_budget = mean_power * self.config.window_length as f64;

        let model = ApplianceModel {
            name: name.to_string(),
            num_states: k,
            state_means,
            transition,
            initial_distribution: initial,
            energy_budget,
        };
        nilm_core::validate_model(&model)
            .map_err(|e| TrainError::NumericalIssue(e.to_string()))?;

        info!(
            appliance = name,
            states = k,
            samples = trace.len(),
            energy_budget,
            "fitted appliance model"
        );
        Ok(model)
    }

    /// Train the whole collection, failing fast on the first appliance whose
    /// fit fails. A collection never silently proceeds with an appliance
    /// missing.
    pub fn train_collection(&self, traces: &[(&str, &[f64])]) -> NilmResult<ApplianceModels> {
        let mut models = ApplianceModels::new();
        for (name, trace) in traces {
            let model = self
                .train(name, trace)
                .map_err(|e| NilmError::Training(format!("appliance '{name}': {e}")))?;
            models.push(model)?;
        }
        Ok(models)
    }
}
