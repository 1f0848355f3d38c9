//! Convex-program construction for one inference window.
//!
//! The relaxed joint state-assignment problem is assembled directly in the
//! conic form Clarabel consumes:
//!
//! ```text
//! minimize    (1/2)·xᵀPx + qᵀx
//! subject to  Ax + s = b,  s ∈ K
//! ```
//!
//! where K is a product of Zero cones (equalities) and Nonnegative cones
//! (inequalities). The constraint set depends only on the models and the
//! window length, so it is built once per window ([`ConstraintSet`]) and
//! reused across the alternating-minimization rounds; the objective depends
//! on the current noise level and is rebuilt before every solve
//! ([`Objective`]).
//!
//! # Decision variables
//!
//! Two groups, laid out in a single vector:
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────────┐
//! │ occupancy: T blocks of N·K   │ indicators: N·T blocks of K·K    │
//! └──────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! - occupancy `(t, a, k)`: relaxed probability that appliance a is in
//!   state k at time t. Time-major so the residual quadratic touches one
//!   contiguous block of columns per time step.
//! - indicator `(a, t, i, j)`: relaxed joint weight on (state i at t−1,
//!   state j at t); row sums recover the occupancy at t−1, column sums the
//!   occupancy at t. The t = 0 block exists (and carries transition cost)
//!   but has no backward constraint.

use clarabel::algebra::CscMatrix;
use clarabel::solver::SupportedConeT;

use nilm_core::{ApplianceModels, PROB_FLOOR};

/// Index arithmetic for the decision-variable vector.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VariableLayout {
    pub num_appliances: usize,
    pub num_states: usize,
    pub window_len: usize,
    /// Total occupancy variables; also where the indicator block starts.
    pub occ_count: usize,
    /// Total number of decision variables.
    pub n_var: usize,
}

impl VariableLayout {
    pub fn new(num_appliances: usize, num_states: usize, window_len: usize) -> Self {
        let occ_count = window_len * num_appliances * num_states;
        let ind_count = num_appliances * window_len * num_states * num_states;
        Self {
            num_appliances,
            num_states,
            window_len,
            occ_count,
            n_var: occ_count + ind_count,
        }
    }

    /// Occupancy of appliance `a`, state `k`, time `t`.
    #[inline]
    pub fn occ(&self, t: usize, a: usize, k: usize) -> usize {
        t * self.num_appliances * self.num_states + a * self.num_states + k
    }

    /// Transition indicator of appliance `a` at time `t`, row `i`, column `j`.
    #[inline]
    pub fn ind(&self, a: usize, t: usize, i: usize, j: usize) -> usize {
        self.occ_count
            + ((a * self.window_len + t) * self.num_states + i) * self.num_states
            + j
    }
}

/// The window's constraint matrix, right-hand side, and cone list.
///
/// Immutable after construction; every solve in the window reuses it.
pub(crate) struct ConstraintSet {
    pub a_mat: CscMatrix<f64>,
    pub rhs: Vec<f64>,
    pub cones: Vec<SupportedConeT<f64>>,
}

/// Build the constraint set for one window:
///
/// a. every occupancy entry in [0, 1], every occupancy row on the simplex
/// b. every indicator entry in [0, 1]
/// c. forward marginal: column sums of indicator(t) equal occupancy at t
/// d. backward marginal (t ≥ 1): row sums of indicator(t) equal occupancy
///    at t−1
/// e. per-appliance aggregate-energy inequality against the model's budget
pub(crate) fn build_constraints(layout: &VariableLayout, models: &ApplianceModels) -> ConstraintSet {
    let k = layout.num_states;
    let t_len = layout.window_len;

    // Column-wise accumulation of (row, coefficient) pairs, converted to CSC
    // at the end.
    let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); layout.n_var];
    let mut rhs: Vec<f64> = Vec::new();
    let mut cones: Vec<SupportedConeT<f64>> = Vec::new();

    // ------------------------------------------------------------------------
    // Helper: equality constraint (Zero cone): Σ coeffᵢ·xᵢ = b
    // ------------------------------------------------------------------------
    let push_eq = |coeffs: &[(usize, f64)],
                   b: f64,
                   rows: &mut Vec<Vec<(usize, f64)>>,
                   rhs: &mut Vec<f64>,
                   cones: &mut Vec<SupportedConeT<f64>>| {
        let row_idx = rhs.len();
        for &(col, val) in coeffs {
            rows[col].push((row_idx, val));
        }
        rhs.push(b);

        // Merge consecutive equality constraints into one Zero cone
        match cones.last_mut() {
            Some(SupportedConeT::ZeroConeT(n)) => *n += 1,
            _ => cones.push(SupportedConeT::ZeroConeT(1)),
        }
    };

    // ------------------------------------------------------------------------
    // Helper: inequality constraint (Nonnegative cone): Σ coeffᵢ·xᵢ ≤ b
    // ------------------------------------------------------------------------
    let push_leq = |coeffs: &[(usize, f64)],
                    b: f64,
                    rows: &mut Vec<Vec<(usize, f64)>>,
                    rhs: &mut Vec<f64>,
                    cones: &mut Vec<SupportedConeT<f64>>| {
        let row_idx = rhs.len();
        for &(col, val) in coeffs {
            rows[col].push((row_idx, val));
        }
        rhs.push(b);

        match cones.last_mut() {
            Some(SupportedConeT::NonnegativeConeT(n)) => *n += 1,
            _ => cones.push(SupportedConeT::NonnegativeConeT(1)),
        }
    };

    for a in 0..layout.num_appliances {
        // Occupancy bounds and simplex rows
        for t in 0..t_len {
            for s in 0..k {
                let v = layout.occ(t, a, s);
                // x ≥ 0  →  -x ≤ 0
                push_leq(&[(v, -1.0)], 0.0, &mut rows, &mut rhs, &mut cones);
                // x ≤ 1
                push_leq(&[(v, 1.0)], 1.0, &mut rows, &mut rhs, &mut cones);
            }

            let simplex: Vec<(usize, f64)> = (0..k).map(|s| (layout.occ(t, a, s), 1.0)).collect();
            push_eq(&simplex, 1.0, &mut rows, &mut rhs, &mut cones);
        }

        // Indicator bounds
        for t in 0..t_len {
            for i in 0..k {
                for j in 0..k {
                    let v = layout.ind(a, t, i, j);
                    push_leq(&[(v, -1.0)], 0.0, &mut rows, &mut rhs, &mut cones);
                    push_leq(&[(v, 1.0)], 1.0, &mut rows, &mut rhs, &mut cones);
                }
            }
        }

        // Forward marginal consistency, every t: for each state i the column
        // sum of indicator(t) equals the occupancy of i at t
        for t in 0..t_len {
            for i in 0..k {
                let mut coeffs: Vec<(usize, f64)> =
                    (0..k).map(|p| (layout.ind(a, t, p, i), 1.0)).collect();
                coeffs.push((layout.occ(t, a, i), -1.0));
                push_eq(&coeffs, 0.0, &mut rows, &mut rhs, &mut cones);
            }
        }

        // Backward marginal consistency, t ≥ 1: for each state i the row sum
        // of indicator(t) equals the occupancy of i at t−1. The t = 0 block
        // deliberately has no such constraint.
        for t in 1..t_len {
            for i in 0..k {
                let mut coeffs: Vec<(usize, f64)> =
                    (0..k).map(|j| (layout.ind(a, t, i, j), 1.0)).collect();
                coeffs.push((layout.occ(t - 1, a, i), -1.0));
                push_eq(&coeffs, 0.0, &mut rows, &mut rhs, &mut cones);
            }
        }
    }

    // Aggregate-energy inequality per appliance: predicted energy over the
    // window may not exceed the trained budget
    for (a, model) in models.iter().enumerate() {
        let mut coeffs = Vec::with_capacity(t_len * k);
        for t in 0..t_len {
            for s in 0..k {
                coeffs.push((layout.occ(t, a, s), model.state_means[s]));
            }
        }
        push_leq(
            &coeffs,
            model.energy_budget,
            &mut rows,
            &mut rhs,
            &mut cones,
        );
    }

    // Convert the column-wise accumulation to CSC
    let n_rows = rhs.len();
    let mut col_ptr = Vec::with_capacity(layout.n_var + 1);
    let mut row_idx = Vec::new();
    let mut values = Vec::new();
    let mut nnz = 0;

    for col in 0..layout.n_var {
        col_ptr.push(nnz);
        rows[col].sort_by_key(|(r, _)| *r);
        for &(r, v) in &rows[col] {
            row_idx.push(r);
            values.push(v);
            nnz += 1;
        }
    }
    col_ptr.push(nnz);

    let a_mat = CscMatrix::new(n_rows, layout.n_var, col_ptr, row_idx, values);

    ConstraintSet { a_mat, rhs, cones }
}

/// Noise-independent linear objective terms, computed once per window:
///
/// - transition term: −ln of the (transposed) transition entry on every
///   indicator variable, for every time step including t = 0
/// - initial-state term: −ln of the occupancy-frequency distribution on the
///   t = 0 occupancy row
///
/// Entries are re-floored before the logarithm; the trainer guarantees the
/// floor but the solver does not rely on it.
pub(crate) fn build_base_q(layout: &VariableLayout, models: &ApplianceModels) -> Vec<f64> {
    let k = layout.num_states;
    let mut q = vec![0.0; layout.n_var];

    for (a, model) in models.iter().enumerate() {
        for t in 0..layout.window_len {
            for i in 0..k {
                for j in 0..k {
                    let p = model.transition_entry(i, j).max(PROB_FLOOR);
                    q[layout.ind(a, t, i, j)] -= p.ln();
                }
            }
        }
        for s in 0..k {
            let p = model.initial_distribution[s].max(PROB_FLOOR);
            q[layout.occ(0, a, s)] -= p.ln();
        }
    }

    q
}

/// One round's objective: quadratic residual-fit matrix, full linear vector,
/// and the decision-variable-free part of the objective value.
pub(crate) struct Objective {
    /// Upper-triangular P in CSC form (Clarabel reads the upper triangle of
    /// the symmetric cost matrix).
    pub p_mat: CscMatrix<f64>,
    pub q: Vec<f64>,
    /// Σ_t ½·ln σ_t² + ½·y_t²/σ_t², constant during the solve; added back
    /// when reporting the objective value.
    pub constant: f64,
}

/// Build the objective for one solve from the current noise level.
///
/// The residual-fit term Σ_t ½·(y_t − c_tᵀx)²/σ_t² expands into
/// P += c_t·c_tᵀ/σ_t² and q −= (y_t/σ_t²)·c_t per time step, where c_t holds
/// each appliance's state means on the occupancy block of time t. With the
/// time-major occupancy layout each c_t touches one contiguous column range,
/// so P is block diagonal.
pub(crate) fn build_objective(
    layout: &VariableLayout,
    models: &ApplianceModels,
    mains: &[f64],
    sigma: &[f64],
    base_q: &[f64],
) -> Objective {
    let k = layout.num_states;
    let block = layout.num_appliances * k;

    // State means in occupancy-block order (appliance-major within a block)
    let mut coeff = vec![0.0; block];
    for (a, model) in models.iter().enumerate() {
        for s in 0..k {
            coeff[a * k + s] = model.state_means[s];
        }
    }

    let mut q = base_q.to_vec();
    let mut constant = 0.0;

    let mut p_col_ptr = vec![0_usize];
    let mut p_row_idx = Vec::new();
    let mut p_values = Vec::new();

    for col in 0..layout.n_var {
        if col < layout.occ_count {
            let t = col / block;
            let local = col % block;
            let c_col = coeff[local];
            let w = 1.0 / (sigma[t] * sigma[t]);

            if c_col != 0.0 {
                // Upper triangle of c·cᵀ/σ²: rows within the same time block
                // up to and including the diagonal
                let block_start = t * block;
                for local_row in 0..=local {
                    let c_row = coeff[local_row];
                    if c_row != 0.0 {
                        p_row_idx.push(block_start + local_row);
                        p_values.push(c_row * c_col * w);
                    }
                }
                q[col] -= mains[t] * c_col * w;
            }
        }
        p_col_ptr.push(p_row_idx.len());
    }

    for (t, &y) in mains.iter().enumerate() {
        let s2 = sigma[t] * sigma[t];
        constant += 0.5 * s2.ln() + 0.5 * y * y / s2;
    }

    let p_mat = CscMatrix::new(layout.n_var, layout.n_var, p_col_ptr, p_row_idx, p_values);

    Objective {
        p_mat,
        q,
        constant,
    }
}
