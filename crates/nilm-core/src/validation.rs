//! Validation of trained models and inference inputs.
//!
//! The solver assumes every invariant checked here; validating up front
//! turns silent numerical corruption (NaN propagation, `log(0)`) into
//! actionable errors at the API boundary.

use crate::{ApplianceModel, NilmError, NilmResult, PROB_FLOOR};

/// Tolerance on probability-vector sums.
const SUM_TOL: f64 = 1e-6;

/// Check the structural and stochastic invariants of a trained model.
///
/// - dimensions consistent with `num_states`
/// - state means non-negative and finite
/// - `initial_distribution` strictly positive, sums to 1
/// - stored (transposed) transition entries in (0, 1], columns sum to 1
///   (the fitted rows)
/// - `energy_budget` non-negative and finite
pub fn validate_model(model: &ApplianceModel) -> NilmResult<()> {
    let k = model.num_states;
    if k == 0 {
        return Err(NilmError::Validation(format!(
            "appliance '{}' has zero states",
            model.name
        )));
    }
    if model.state_means.len() != k {
        return Err(NilmError::Validation(format!(
            "appliance '{}': state_means length {} != num_states {}",
            model.name,
            model.state_means.len(),
            k
        )));
    }
    if model.transition.len() != k * k {
        return Err(NilmError::Validation(format!(
            "appliance '{}': transition length {} != num_states^2 {}",
            model.name,
            model.transition.len(),
            k * k
        )));
    }
    if model.initial_distribution.len() != k {
        return Err(NilmError::Validation(format!(
            "appliance '{}': initial_distribution length {} != num_states {}",
            model.name,
            model.initial_distribution.len(),
            k
        )));
    }

    for (i, &mean) in model.state_means.iter().enumerate() {
        if !mean.is_finite() || mean < 0.0 {
            return Err(NilmError::Validation(format!(
                "appliance '{}': state {} mean power {} is not a non-negative finite value",
                model.name, i, mean
            )));
        }
    }

    let pi_sum: f64 = model.initial_distribution.iter().sum();
    if (pi_sum - 1.0).abs() > SUM_TOL {
        return Err(NilmError::Validation(format!(
            "appliance '{}': initial distribution sums to {pi_sum}, expected ~1.0",
            model.name
        )));
    }
    for (i, &p) in model.initial_distribution.iter().enumerate() {
        if !p.is_finite() || p < PROB_FLOOR || p > 1.0 + SUM_TOL {
            return Err(NilmError::Validation(format!(
                "appliance '{}': initial probability of state {} is {} (must lie in [{PROB_FLOOR}, 1])",
                model.name, i, p
            )));
        }
    }

    // Stored matrix is transposed, so the fitted row-stochastic rows are
    // its columns.
    for j in 0..k {
        let mut col_sum = 0.0;
        for i in 0..k {
            let p = model.transition_entry(i, j);
            if !p.is_finite() || p < PROB_FLOOR || p > 1.0 + SUM_TOL {
                return Err(NilmError::Validation(format!(
                    "appliance '{}': transition entry [{i}][{j}] is {} (must lie in [{PROB_FLOOR}, 1])",
                    model.name, p
                )));
            }
            col_sum += p;
        }
        if (col_sum - 1.0).abs() > SUM_TOL {
            return Err(NilmError::Validation(format!(
                "appliance '{}': transitions out of state {j} sum to {col_sum}, expected ~1.0",
                model.name
            )));
        }
    }

    if !model.energy_budget.is_finite() || model.energy_budget < 0.0 {
        return Err(NilmError::Validation(format!(
            "appliance '{}': energy budget {} is not a non-negative finite value",
            model.name, model.energy_budget
        )));
    }

    Ok(())
}

/// Check an aggregate-power window before inference.
///
/// Windows must be non-empty with non-negative finite samples. A window
/// of length 1 is legal (no temporal-consistency constraints exist then).
pub fn validate_window(window: &[f64]) -> NilmResult<()> {
    if window.is_empty() {
        return Err(NilmError::Validation(
            "aggregate window is empty; nothing to disaggregate".into(),
        ));
    }
    for (t, &sample) in window.iter().enumerate() {
        if !sample.is_finite() || sample < 0.0 {
            return Err(NilmError::Validation(format!(
                "aggregate sample at t={t} is {sample}; power readings must be non-negative and finite"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ApplianceModel;

    fn valid_model() -> ApplianceModel {
        ApplianceModel {
            name: "fridge".into(),
            num_states: 2,
            state_means: vec![0.0, 120.0],
            transition: vec![0.95, 0.10, 0.05, 0.90],
            initial_distribution: vec![0.8, 0.2],
            energy_budget: 36_000.0,
        }
    }

    #[test]
    fn valid_model_passes() {
        assert!(validate_model(&valid_model()).is_ok());
    }

    #[test]
    fn negative_mean_rejected() {
        let mut model = valid_model();
        model.state_means[0] = -1.0;
        assert!(validate_model(&model).is_err());
    }

    #[test]
    fn zero_probability_rejected() {
        let mut model = valid_model();
        model.initial_distribution = vec![1.0, 0.0];
        let err = validate_model(&model).unwrap_err();
        assert!(err.to_string().contains("initial probability"));
    }

    #[test]
    fn non_stochastic_transition_rejected() {
        let mut model = valid_model();
        model.transition = vec![0.5, 0.1, 0.3, 0.9];
        let err = validate_model(&model).unwrap_err();
        assert!(err.to_string().contains("sum to"));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut model = valid_model();
        model.state_means.push(42.0);
        assert!(validate_model(&model).is_err());
    }

    #[test]
    fn window_checks() {
        assert!(validate_window(&[0.0, 1.5, 230.0]).is_ok());
        assert!(validate_window(&[10.0]).is_ok());
        assert!(validate_window(&[]).is_err());
        assert!(validate_window(&[1.0, -3.0]).is_err());
        assert!(validate_window(&[1.0, f64::NAN]).is_err());
    }
}
