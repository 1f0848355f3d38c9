//! # nilm-core: Energy Disaggregation Data Model
//!
//! Provides the fundamental data structures for factorial-HMM energy
//! disaggregation: per-appliance generative models, the ordered model
//! collection consumed by the solver, configuration, and validation.
//!
//! ## Design Philosophy
//!
//! A trained [`ApplianceModel`] is immutable: the trainer produces it once
//! and inference only ever reads it, so a collection can be shared freely
//! across concurrent inference workers without synchronization.
//!
//! Collections are an explicit ordered `Vec` plus a name → index lookup
//! rather than an insertion-ordered map, so appliance order (and therefore
//! decision-variable layout in the solver) is deterministic.
//!
//! ## Conventions
//!
//! - `transition` is stored **transposed** relative to the fitted
//!   row-stochastic matrix: entry `[i][j]` is read by the solver as the
//!   log-weight of arriving in state `i` with predecessor column `j`.
//!   Consequently the *columns* of the stored matrix sum to 1.
//! - every probability the solver passes through a logarithm is floored at
//!   [`PROB_FLOOR`] at training time; the solver re-floors defensively.
//! - `energy_budget` is in watt-samples: mean training power times the
//!   inference window length.
//!
//! ## Modules
//!
//! - [`config`] - Pipeline and solver configuration
//! - [`error`] - Unified error type
//! - [`validation`] - Model and input-window validation

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod validation;

pub use config::{DisaggConfig, SolverConfig};
pub use error::{NilmError, NilmResult};
pub use validation::{validate_model, validate_window};

/// Smallest probability admitted into a logarithm anywhere in the engine.
///
/// Transition and initial-state entries are floored to this value before
/// `ln()` so that states unobserved during training contribute a large but
/// finite penalty instead of an undefined `log(0)`.
pub const PROB_FLOOR: f64 = 1e-10;

/// One appliance's trained generative model.
///
/// Produced by the trainer from a historical power trace, immutable
/// afterwards. All appliances in a collection share the same `num_states`
/// (a configuration constant, not learned).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplianceModel {
    /// Identifier, unique within a collection (e.g. "fridge", "kettle")
    pub name: String,
    /// Number of discrete behavioral states
    pub num_states: usize,
    /// Expected power draw in each state, watts, length `num_states`
    pub state_means: Vec<f64>,
    /// Transposed transition matrix, row-major `num_states × num_states`.
    /// `transition[i][j]` pairs destination state i with source state j;
    /// columns sum to 1 (the fitted rows).
    pub transition: Vec<f64>,
    /// Empirical occupancy frequency of each decoded state over the
    /// training trace, length `num_states`, sums to 1
    pub initial_distribution: Vec<f64>,
    /// Signal-aggregate cap: mean training power × window length
    /// (watt-samples). Total inferred energy over one window may not
    /// exceed this.
    pub energy_budget: f64,
}

impl ApplianceModel {
    /// Stored (transposed) transition entry for destination `i`, source `j`.
    #[inline]
    pub fn transition_entry(&self, i: usize, j: usize) -> f64 {
        self.transition[i * self.num_states + j]
    }
}

/// Ordered collection of trained appliance models.
///
/// Solver decision variables are laid out by position in this collection,
/// so iteration order is the insertion order and never changes. Lookup by
/// name goes through a side index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplianceModels {
    models: Vec<ApplianceModel>,
    index: HashMap<String, usize>,
}

impl ApplianceModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a model, rejecting duplicate appliance names.
    pub fn push(&mut self, model: ApplianceModel) -> NilmResult<()> {
        if self.index.contains_key(&model.name) {
            return Err(NilmError::Validation(format!(
                "duplicate appliance name '{}' in model collection",
                model.name
            )));
        }
        self.index.insert(model.name.clone(), self.models.len());
        self.models.push(model);
        Ok(())
    }

    /// Look up a model by appliance name.
    pub fn get(&self, name: &str) -> Option<&ApplianceModel> {
        self.index.get(name).map(|&i| &self.models[i])
    }

    /// Positional access, matching solver variable layout.
    pub fn get_by_index(&self, index: usize) -> Option<&ApplianceModel> {
        self.models.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ApplianceModel> {
        self.models.iter()
    }

    /// Appliance names in collection order.
    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl<'a> IntoIterator for &'a ApplianceModels {
    type Item = &'a ApplianceModel;
    type IntoIter = std::slice::Iter<'a, ApplianceModel>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.iter()
    }
}
