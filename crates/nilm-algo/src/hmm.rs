//! One-dimensional Gaussian hidden Markov models.
//!
//! Implements scaled forward-backward, Baum-Welch parameter estimation, and
//! Viterbi decoding for HMMs with univariate Gaussian emissions. This is the
//! sequence-model capability the appliance trainer builds on: each appliance's
//! historical power trace is fitted with one of these models, then decoded to
//! recover its most likely state sequence.
//!
//! # Design
//!
//! The forward and backward passes use per-step scaling rather than full
//! log-space arithmetic: emission densities are computed in log space (they
//! underflow badly for tight variances), converted back per step, and each
//! step is normalized by its scale factor. The log-likelihood is the sum of
//! log scale factors. Viterbi runs entirely in log space.
//!
//! Initialization is deterministic: state means are seeded from evenly spaced
//! quantiles of the sorted trace, so fitting the same trace twice yields the
//! same model.

use thiserror::Error;
use tracing::debug;

use nilm_core::PROB_FLOOR;

/// Floor applied to fitted state variances. Keeps emission densities finite
/// when a state captures a constant-valued segment of the trace.
const VAR_FLOOR: f64 = 1e-6;

/// ln(2π), used by the Gaussian log-density.
const LOG_2PI: f64 = 1.837_877_066_409_345_3;

/// Floor for scale factors and posterior denominators.
const SCALE_FLOOR: f64 = 1e-100;

/// Errors raised while fitting an appliance trace.
#[derive(Debug, Clone, Error)]
pub enum TrainError {
    /// Trace has fewer samples than hidden states
    #[error("insufficient training data: {required} samples required, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// Trace carries no information to separate states (e.g. constant signal)
    #[error("degenerate training trace: {0}")]
    DegenerateTrace(String),

    /// Fit produced a non-finite or otherwise unusable parameter
    #[error("numerical issue during fit: {0}")]
    NumericalIssue(String),
}

impl From<TrainError> for nilm_core::NilmError {
    fn from(err: TrainError) -> Self {
        nilm_core::NilmError::Training(err.to_string())
    }
}

/// A fitted univariate-Gaussian hidden Markov model.
///
/// `transition` is row-stochastic in the fitted orientation: `[i][j]` is the
/// probability of moving from state i to state j between consecutive samples.
/// (The trainer transposes it when building the [`ApplianceModel`] consumed
/// by the solver.)
///
/// [`ApplianceModel`]: nilm_core::ApplianceModel
#[derive(Debug, Clone)]
pub struct GaussianHmm {
    /// Number of hidden states.
    pub num_states: usize,
    /// Initial state probabilities, length `num_states`.
    pub initial: Vec<f64>,
    /// Row-major `num_states × num_states` row-stochastic transition matrix.
    pub transition: Vec<f64>,
    /// Emission mean per state.
    pub means: Vec<f64>,
    /// Emission variance per state, floored at `VAR_FLOOR`.
    pub variances: Vec<f64>,
}

impl GaussianHmm {
    #[inline]
    fn a(&self, from: usize, to: usize) -> f64 {
        self.transition[from * self.num_states + to]
    }

    /// Gaussian log-density of `x` under `state`, clamped to keep a single
    /// extreme observation from dominating the whole sequence.
    fn emission_log_prob(&self, x: f64, state: usize) -> f64 {
        let var = self.variances[state];
        let diff = x - self.means[state];
        let log_prob = -0.5 * (LOG_2PI + var.ln() + diff * diff / var);
        log_prob.clamp(-1e3, 1e3)
    }

    /// Fit a model to `trace` with `num_states` states using Baum-Welch EM.
    ///
    /// The EM loop stops when the log-likelihood improvement drops below
    /// `tolerance` or after `max_iterations` iterations.
    ///
    /// # Errors
    ///
    /// - [`TrainError::InsufficientData`] when the trace is shorter than the
    ///   state count
    /// - [`TrainError::DegenerateTrace`] when the trace has zero variance
    pub fn fit(
        trace: &[f64],
        num_states: usize,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<Self, TrainError> {
        if num_states == 0 {
            return Err(TrainError::NumericalIssue("num_states must be > 0".into()));
        }
        if trace.len() < num_states {
            return Err(TrainError::InsufficientData {
                required: num_states,
                actual: trace.len(),
            });
        }

        let t_len = trace.len();
        let mean: f64 = trace.iter().sum::<f64>() / t_len as f64;
        let var: f64 = trace.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / t_len as f64;
        if var < 1e-12 {
            return Err(TrainError::DegenerateTrace(format!(
                "trace of {t_len} samples has zero variance (constant value {mean})"
            )));
        }

        let mut model = Self::initial_guess(trace, num_states, var);

        let mut prev_log_likelihood = f64::NEG_INFINITY;
        for iteration in 0..max_iterations {
            let emissions = model.emission_table(trace);
            let (alpha, beta, log_likelihood) = model.forward_backward(&emissions);

            if iteration > 0 && (log_likelihood - prev_log_likelihood).abs() < tolerance {
                debug!(iteration, log_likelihood, "EM converged");
                break;
            }
            prev_log_likelihood = log_likelihood;

            model.update_parameters(trace, &emissions, &alpha, &beta);
        }

        for &m in &model.means {
            if !m.is_finite() {
                return Err(TrainError::NumericalIssue(format!(
                    "fitted state mean is not finite: {m}"
                )));
            }
        }

        Ok(model)
    }

    /// Deterministic starting point: quantile-spaced means, shared variance,
    /// uniform initial distribution, persistence-biased transitions.
    fn initial_guess(trace: &[f64], num_states: usize, var: f64) -> Self {
        let mut sorted = trace.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mut means = Vec::with_capacity(num_states);
        for k in 0..num_states {
            let idx = if num_states == 1 {
                sorted.len() / 2
            } else {
                k * (sorted.len() - 1) / (num_states - 1)
            };
            let mut m = sorted[idx];
            // Identical quantiles would make states indistinguishable and EM
            // symmetric; force a strictly increasing ladder.
            if let Some(&prev) = means.last() {
                if m <= prev {
                    m = prev + 1e-3;
                }
            }
            means.push(m);
        }

        let mut transition = vec![0.0; num_states * num_states];
        for i in 0..num_states {
            for j in 0..num_states {
                transition[i * num_states + j] = if num_states == 1 {
                    1.0
                } else if i == j {
                    0.7
                } else {
                    0.3 / (num_states - 1) as f64
                };
            }
        }

        Self {
            num_states,
            initial: vec![1.0 / num_states as f64; num_states],
            transition,
            means,
            variances: vec![var.max(VAR_FLOOR); num_states],
        }
    }

    /// Emission log-densities for every (time, state) pair, row-major.
    fn emission_table(&self, trace: &[f64]) -> Vec<f64> {
        let n = self.num_states;
        let mut table = vec![0.0; trace.len() * n];
        for (t, &x) in trace.iter().enumerate() {
            for k in 0..n {
                table[t * n + k] = self.emission_log_prob(x, k);
            }
        }
        table
    }

    /// Scaled forward-backward pass.
    ///
    /// Returns `(alpha, beta, log_likelihood)` where `alpha` and `beta` are
    /// row-major `T × num_states` and normalized per step.
    fn forward_backward(&self, emissions: &[f64]) -> (Vec<f64>, Vec<f64>, f64) {
        let n = self.num_states;
        let t_len = emissions.len() / n;
        let mut alpha = vec![0.0; t_len * n];
        let mut beta = vec![0.0; t_len * n];
        let mut log_scale = vec![0.0; t_len];

        // Forward pass with per-step normalization
        for k in 0..n {
            alpha[k] = self.initial[k] * emissions[k].exp();
        }
        let scale = alpha[..n].iter().sum::<f64>().max(SCALE_FLOOR);
        log_scale[0] = scale.ln();
        for k in 0..n {
            alpha[k] /= scale;
        }

        for t in 1..t_len {
            for j in 0..n {
                let mut acc = 0.0;
                for i in 0..n {
                    acc += alpha[(t - 1) * n + i] * self.a(i, j);
                }
                alpha[t * n + j] = acc * emissions[t * n + j].exp();
            }
            let scale = alpha[t * n..(t + 1) * n].iter().sum::<f64>().max(SCALE_FLOOR);
            log_scale[t] = scale.ln();
            for j in 0..n {
                alpha[t * n + j] /= scale;
            }
        }

        // Backward pass, reusing the forward scale factors
        for k in 0..n {
            beta[(t_len - 1) * n + k] = 1.0;
        }
        for t in (0..t_len - 1).rev() {
            for i in 0..n {
                let mut acc = 0.0;
                for j in 0..n {
                    acc += self.a(i, j) * emissions[(t + 1) * n + j].exp() * beta[(t + 1) * n + j];
                }
                beta[t * n + i] = acc / log_scale[t + 1].exp();
            }
        }

        let log_likelihood = log_scale.iter().sum();
        (alpha, beta, log_likelihood)
    }

    /// M-step: re-estimate initial distribution, transitions, and Gaussian
    /// parameters from the posteriors.
    fn update_parameters(&mut self, trace: &[f64], emissions: &[f64], alpha: &[f64], beta: &[f64]) {
        let n = self.num_states;
        let t_len = trace.len();

        // State posteriors gamma[t][k], normalized in place
        let mut gamma = vec![0.0; t_len * n];
        for t in 0..t_len {
            let mut sum = 0.0;
            for k in 0..n {
                gamma[t * n + k] = alpha[t * n + k] * beta[t * n + k];
                sum += gamma[t * n + k];
            }
            if sum > SCALE_FLOOR {
                for k in 0..n {
                    gamma[t * n + k] /= sum;
                }
            }
        }

        // Transition statistics, xi computed on the fly (no T × N² tensor)
        let mut numerators = vec![0.0; n * n];
        let mut denominators = vec![0.0; n];
        let mut xi = vec![0.0; n * n];
        for t in 0..t_len - 1 {
            for i in 0..n {
                denominators[i] += gamma[t * n + i];
            }

            let mut xi_sum = 0.0;
            for i in 0..n {
                for j in 0..n {
                    let v = alpha[t * n + i]
                        * self.a(i, j)
                        * emissions[(t + 1) * n + j].exp()
                        * beta[(t + 1) * n + j];
                    xi[i * n + j] = v;
                    xi_sum += v;
                }
            }
            if xi_sum > SCALE_FLOOR {
                for v in xi.iter_mut() {
                    *v /= xi_sum;
                }
                for i in 0..n {
                    for j in 0..n {
                        numerators[i * n + j] += xi[i * n + j];
                    }
                }
            }
        }

        self.initial.copy_from_slice(&gamma[..n]);

        for i in 0..n {
            if denominators[i] > SCALE_FLOOR {
                for j in 0..n {
                    self.transition[i * n + j] = numerators[i * n + j] / denominators[i];
                }
            }
            // Rows with no posterior mass keep their previous estimate
        }

        // Gaussian parameters per state
        for k in 0..n {
            let weight: f64 = (0..t_len).map(|t| gamma[t * n + k]).sum();
            if weight <= SCALE_FLOOR {
                continue;
            }
            let mean: f64 = (0..t_len).map(|t| gamma[t * n + k] * trace[t]).sum::<f64>() / weight;
            let var: f64 = (0..t_len)
                .map(|t| gamma[t * n + k] * (trace[t] - mean) * (trace[t] - mean))
                .sum::<f64>()
                / weight;
            self.means[k] = mean;
            self.variances[k] = var.max(VAR_FLOOR);
        }
    }

    /// Viterbi decoding in log space: the most likely state sequence for
    /// `trace` under this model.
    pub fn decode(&self, trace: &[f64]) -> Vec<usize> {
        let n = self.num_states;
        let t_len = trace.len();
        if t_len == 0 {
            return Vec::new();
        }

        let mut delta = vec![f64::NEG_INFINITY; t_len * n];
        let mut psi = vec![0_usize; t_len * n];

        for k in 0..n {
            delta[k] = self.initial[k].max(PROB_FLOOR).ln() + self.emission_log_prob(trace[0], k);
        }

        for t in 1..t_len {
            for j in 0..n {
                let mut best_val = f64::NEG_INFINITY;
                let mut best_state = 0;
                for i in 0..n {
                    let candidate = delta[(t - 1) * n + i] + self.a(i, j).max(PROB_FLOOR).ln();
                    if candidate > best_val {
                        best_val = candidate;
                        best_state = i;
                    }
                }
                delta[t * n + j] = best_val + self.emission_log_prob(trace[t], j);
                psi[t * n + j] = best_state;
            }
        }

        let mut best_final = 0;
        let mut best_prob = f64::NEG_INFINITY;
        for k in 0..n {
            if delta[(t_len - 1) * n + k] > best_prob {
                best_prob = delta[(t_len - 1) * n + k];
                best_final = k;
            }
        }

        let mut path = vec![0_usize; t_len];
        path[t_len - 1] = best_final;
        for t in (0..t_len - 1).rev() {
            path[t] = psi[(t + 1) * n + path[t + 1]];
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 0/100 W square wave, two samples per level.
    fn square_wave(len: usize) -> Vec<f64> {
        (0..len)
            .map(|t| if (t / 2) % 2 == 0 { 0.0 } else { 100.0 })
            .collect()
    }

    #[test]
    fn fit_recovers_square_wave_levels() {
        let trace = square_wave(200);
        let hmm = GaussianHmm::fit(&trace, 2, 50, 1e-5).unwrap();

        let mut means = hmm.means.clone();
        means.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!(means[0].abs() < 1.0, "low state mean {} should be ~0", means[0]);
        assert!(
            (means[1] - 100.0).abs() < 1.0,
            "high state mean {} should be ~100",
            means[1]
        );
    }

    #[test]
    fn fit_is_deterministic() {
        let trace = square_wave(120);
        let a = GaussianHmm::fit(&trace, 2, 50, 1e-5).unwrap();
        let b = GaussianHmm::fit(&trace, 2, 50, 1e-5).unwrap();
        for (x, y) in a.means.iter().zip(b.means.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
        for (x, y) in a.transition.iter().zip(b.transition.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn fitted_rows_are_stochastic() {
        let trace = square_wave(150);
        let hmm = GaussianHmm::fit(&trace, 2, 50, 1e-5).unwrap();

        let pi_sum: f64 = hmm.initial.iter().sum();
        assert!((pi_sum - 1.0).abs() < 1e-6, "initial sums to {pi_sum}");
        for i in 0..hmm.num_states {
            let row_sum: f64 = (0..hmm.num_states).map(|j| hmm.a(i, j)).sum();
            assert!(
                (row_sum - 1.0).abs() < 1e-6,
                "transition row {i} sums to {row_sum}"
            );
        }
    }

    #[test]
    fn decode_tracks_levels() {
        let trace = square_wave(100);
        let hmm = GaussianHmm::fit(&trace, 2, 50, 1e-5).unwrap();
        let path = hmm.decode(&trace);
        assert_eq!(path.len(), trace.len());

        // The decoded state must imply the right power level at every step
        for (t, &state) in path.iter().enumerate() {
            assert!(state < 2);
            assert!(
                (hmm.means[state] - trace[t]).abs() < 10.0,
                "t={t}: state {state} (mean {}) against sample {}",
                hmm.means[state],
                trace[t]
            );
        }
    }

    #[test]
    fn short_trace_rejected() {
        let err = GaussianHmm::fit(&[1.0, 2.0], 3, 50, 1e-5).unwrap_err();
        assert!(matches!(
            err,
            TrainError::InsufficientData {
                required: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn constant_trace_rejected() {
        let trace = vec![60.0; 50];
        let err = GaussianHmm::fit(&trace, 2, 50, 1e-5).unwrap_err();
        assert!(matches!(err, TrainError::DegenerateTrace(_)));
    }

    #[test]
    fn three_state_fit() {
        // Staircase: 0, 50, 200 W
        let mut trace = Vec::new();
        for _ in 0..40 {
            trace.extend_from_slice(&[0.0, 0.0, 50.0, 50.0, 200.0, 200.0]);
        }
        let hmm = GaussianHmm::fit(&trace, 3, 50, 1e-5).unwrap();
        let mut means = hmm.means.clone();
        means.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!(means[0].abs() < 5.0);
        assert!((means[1] - 50.0).abs() < 5.0);
        assert!((means[2] - 200.0).abs() < 5.0);
    }
}
