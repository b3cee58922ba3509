//! Linear algebra helpers for covariance square roots and SPD solves.
//!
//! Public API:
//!     pub fn symmetrize(m: &StateMatrix) -> StateMatrix
//!     pub fn matrix_square_root(matrix: &StateMatrix) -> Option<StateMatrix>
//!     pub fn chol_solve_spd(a: &MeasurementMatrix, b: &StateMatrix) -> Option<StateMatrix>
//!
//! Strategy:
//! 1) Symmetrize P ← 0.5 (P + Pᵀ)
//! 2) Cholesky
//! 3) Jittered Cholesky (geometric ramp)
//!
//! Unlike a general-purpose toolbox, there is no eigenvalue-decomposition fallback here:
//! a covariance that cannot be factored even with jitter is a numerical breakdown of the
//! filter, and the fusion loop needs that breakdown surfaced (as `None`) so its recovery
//! policy can reset the estimator. Silently repairing the matrix would hide exactly the
//! condition the loop is built to detect.

use crate::{MeasurementMatrix, StateMatrix};

use nalgebra::linalg::Cholesky;

// Tunable guards (conservative defaults for double precision at pendulum scales)
const INITIAL_JITTER: f64 = 1e-12;
const MAX_JITTER: f64 = 1e-6;
const MAX_TRIES: usize = 6;

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Reduces the round-off asymmetry that accumulates in covariance arithmetic.
#[inline]
pub fn symmetrize(m: &StateMatrix) -> StateMatrix {
    0.5 * (m + m.transpose())
}

/// Compute a square root `S` such that approximately `matrix ≈ S * Sᵀ`.
///
/// Attempts plain Cholesky first, then Cholesky with a geometrically ramped diagonal
/// jitter. The result is lower triangular.
///
/// # Arguments
/// * `matrix` - The matrix to factor. Assumed symmetric; symmetrized internally.
///
/// # Returns
/// * `Some(StateMatrix)` containing a matrix square root.
/// * `None` if the matrix is not positive definite even after jitter. Callers treat this
///   as a degenerate sigma-point set and fail the filter update.
pub fn matrix_square_root(matrix: &StateMatrix) -> Option<StateMatrix> {
    let p = symmetrize(matrix);
    if let Some(s) = chol_sqrt(&p) {
        return Some(s);
    }
    chol_sqrt_with_jitter(&p, INITIAL_JITTER, MAX_JITTER, MAX_TRIES)
}

/// Plain Cholesky square root: L such that P ≈ L Lᵀ, or None if it fails.
fn chol_sqrt(p: &StateMatrix) -> Option<StateMatrix> {
    Cholesky::new(*p).map(|ch| ch.l())
}

/// Cholesky with diagonal jitter (geometric ramp). Returns None if all tries fail.
fn chol_sqrt_with_jitter(
    p: &StateMatrix,
    initial_jitter: f64,
    max_jitter: f64,
    max_tries: usize,
) -> Option<StateMatrix> {
    let mut jitter = initial_jitter;
    for _ in 0..max_tries {
        let mut pj = *p;
        for i in 0..pj.nrows() {
            pj[(i, i)] += jitter;
        }
        if let Some(ch) = Cholesky::new(pj) {
            return Some(ch.l());
        }
        jitter *= 10.0;
        if jitter > max_jitter {
            break;
        }
    }
    None
}

/// Solve A X = B for SPD-ish A via Cholesky, with jitter retries.
///
/// Used for the Kalman gain: Kᵀ = S⁻¹ Cᵀ with S the innovation covariance. Returns None
/// if all attempts fail, which callers treat as a failed filter update.
pub fn chol_solve_spd(a: &MeasurementMatrix, b: &StateMatrix) -> Option<StateMatrix> {
    let a_sym = symmetrize(a);
    if let Some(ch) = Cholesky::new(a_sym) {
        return Some(ch.solve(b));
    }
    let mut jitter = INITIAL_JITTER;
    for _ in 0..MAX_TRIES {
        let mut a_j = a_sym;
        for i in 0..a_j.nrows() {
            a_j[(i, i)] += jitter;
        }
        if let Some(ch) = Cholesky::new(a_j) {
            return Some(ch.solve(b));
        }
        jitter *= 10.0;
        if jitter > MAX_JITTER {
            break;
        }
    }
    None
}
