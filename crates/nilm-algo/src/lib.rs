//! # nilm-algo: Disaggregation Algorithms
//!
//! This crate provides the estimation engine for factorial-HMM energy
//! disaggregation: model training from historical per-appliance traces and
//! constrained inference over aggregate power windows.
//!
//! ## Pipeline
//!
//! | Stage | Component | Problem class |
//! |-------|-----------|---------------|
//! | Training | [`ApplianceModelTrainer`] | Baum-Welch EM per appliance |
//! | Decoding | [`GaussianHmm::decode`] | Viterbi |
//! | Inference | [`DisaggregationSolver`] | Convex relaxation, interior point |
//!
//! ### Inference
//!
//! The solver implements additive factorial HMM inference with
//! signal-aggregate constraints: a fixed-round block coordinate descent
//! alternating between a convex solve over relaxed state occupancies
//! (Clarabel, conic form) and a closed-form noise re-estimation. Constraints
//! keep each occupancy row on the probability simplex, tie transition
//! indicators to adjacent occupancies, and cap each appliance's total
//! inferred energy at its trained budget.
//!
//! See the [module documentation](afhmm/program.rs) for the variable layout
//! and constraint formulation.
//!
//! ## Example
//!
//! ```ignore
//! use nilm_algo::{disaggregate, ApplianceModelTrainer};
//! use nilm_core::DisaggConfig;
//!
//! let config = DisaggConfig::default();
//! let trainer = ApplianceModelTrainer::new(config.clone());
//! let models = trainer.train_collection(&[
//!     ("fridge", fridge_trace.as_slice()),
//!     ("kettle", kettle_trace.as_slice()),
//! ])?;
//!
//! let solutions = disaggregate(&models, &mains, &config)?;
//! for solution in &solutions {
//!     println!("window residual: {:?}", solution.residual_norms.last());
//! }
//! ```

pub mod afhmm;
pub mod hmm;
pub mod train;

pub use afhmm::{disaggregate, DisaggError, DisaggregationSolution, DisaggregationSolver};
pub use hmm::{GaussianHmm, TrainError};
pub use train::{ApplianceModelTrainer, ABSENT_STATE_FLOOR};
