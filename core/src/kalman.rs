//! Unscented Kalman Filter for the two-state pendulum family.
//!
//! The filter is generic over the [`SystemModel`] trait, so it never touches the pendulum
//! equations directly: sigma points are pushed through `predict_state` and
//! `predict_measurement` and everything else is unscented-transform bookkeeping. A single
//! `update` call runs one full predict + correct cycle, which is the granularity the
//! fusion loop works at (one measurement per tick, no separate propagate phase).
//!
//! Numerical breakdown is a first-class outcome here, not a panic: a covariance that
//! cannot produce a sigma-point set, an innovation covariance that cannot be solved, or a
//! non-finite corrected state all make `update` return `false` and leave the filter
//! untouched, so the caller can apply its recovery policy (see [`crate::fusion`]).

use crate::linalg::{chol_solve_spd, matrix_square_root, symmetrize};
use crate::models::SystemModel;
use crate::{ControlVector, MeasurementMatrix, MeasurementVector, StateMatrix, StateVector};
use crate::StateEstimator;

use std::fmt::{self, Debug, Display};

use nalgebra::{SMatrix, SVector};

/// Sigma-point spread parameter. With beta and kappa below, this is the classic unscented
/// transform parameterization for a well-scaled low-dimensional state.
pub const UKF_ALPHA: f64 = 1.0;
/// Prior-distribution parameter; 2.0 is optimal for Gaussian priors.
pub const UKF_BETA: f64 = 2.0;
/// Secondary scaling parameter, chosen as 3 - n for the two-state pendulum.
pub const UKF_KAPPA: f64 = 1.0;

/// Diagonal regularization added after each correction to keep the covariance positive
/// definite against round-off.
const COVARIANCE_FLOOR: f64 = 1e-9;

const STATE_SIZE: usize = 2;
const SIGMA_POINT_COUNT: usize = 2 * STATE_SIZE + 1;

/// Sigma-point set: one state hypothesis per column.
type SigmaPoints = SMatrix<f64, 2, 5>;
/// Measurement-space sigma-point set.
type MeasurementSigmaPoints = SMatrix<f64, 2, 5>;
type Weights = SVector<f64, 5>;

/// Unscented Kalman Filter implementation
#[derive(Clone)]
pub struct UnscentedKalmanFilter<M: SystemModel> {
    model: M,
    mean_state: StateVector,
    covariance: StateMatrix,
    process_noise: StateMatrix,
    measurement_noise: MeasurementMatrix,
    lambda: f64,
    weights_mean: Weights,
    weights_cov: Weights,
}

impl<M: SystemModel> Debug for UnscentedKalmanFilter<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UKF")
            .field("mean_state", &self.mean_state)
            .field("covariance", &self.covariance)
            .field("process_noise", &self.process_noise)
            .field("measurement_noise", &self.measurement_noise)
            .field("lambda", &self.lambda)
            .finish()
    }
}

impl<M: SystemModel> Display for UnscentedKalmanFilter<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UnscentedKalmanFilter {{ theta: {:.4}, theta_dot: {:.4}, lambda: {:.4} }}",
            self.mean_state[0], self.mean_state[1], self.lambda
        )
    }
}

impl<M: SystemModel> UnscentedKalmanFilter<M> {
    /// Create a new filter around a system model.
    ///
    /// # Arguments
    /// * `model` - The system model used for state and measurement prediction.
    /// * `initial_state` - Initial mean state. Typically a deliberately wrong guess when
    ///   demonstrating convergence against a known truth.
    /// * `covariance_scale` - Initial covariance is this scale times identity.
    /// * `process_noise_scale` - Process noise is this scale times identity.
    /// * `measurement_noise_scale` - Measurement noise is this scale times identity.
    /// * `alpha`, `beta`, `kappa` - Sigma-point spread parameters; see [`UKF_ALPHA`],
    ///   [`UKF_BETA`], [`UKF_KAPPA`] for the crate defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: M,
        initial_state: StateVector,
        covariance_scale: f64,
        process_noise_scale: f64,
        measurement_noise_scale: f64,
        alpha: f64,
        beta: f64,
        kappa: f64,
    ) -> UnscentedKalmanFilter<M> {
        let n = STATE_SIZE as f64;
        let lambda = alpha * alpha * (n + kappa) - n;
        let mut weights_mean = Weights::zeros();
        let mut weights_cov = Weights::zeros();
        weights_mean[0] = lambda / (n + lambda);
        weights_cov[0] = lambda / (n + lambda) + (1.0 - alpha * alpha + beta);
        for i in 1..SIGMA_POINT_COUNT {
            let w = 1.0 / (2.0 * (n + lambda));
            weights_mean[i] = w;
            weights_cov[i] = w;
        }
        UnscentedKalmanFilter {
            model,
            mean_state: initial_state,
            covariance: StateMatrix::identity() * covariance_scale,
            process_noise: StateMatrix::identity() * process_noise_scale,
            measurement_noise: MeasurementMatrix::identity() * measurement_noise_scale,
            lambda,
            weights_mean,
            weights_cov,
        }
    }

    /// Generate the scaled sigma-point set around the current mean and covariance.
    ///
    /// # Returns
    /// * `Some` with one state hypothesis per column: the mean, then mean plus/minus the
    ///   columns of sqrt((n + lambda) P).
    /// * `None` if the covariance square root fails (degenerate sigma-point set).
    pub fn get_sigma_points(&self) -> Option<SigmaPoints> {
        self.sigma_points_around(&self.mean_state, &self.covariance)
    }

    fn sigma_points_around(
        &self,
        mean: &StateVector,
        covariance: &StateMatrix,
    ) -> Option<SigmaPoints> {
        let n = STATE_SIZE as f64;
        let p = (n + self.lambda) * *covariance;
        let sqrt_p = matrix_square_root(&p)?;
        let mut points = SigmaPoints::zeros();
        points.set_column(0, mean);
        for i in 0..STATE_SIZE {
            points.set_column(i + 1, &(mean + sqrt_p.column(i)));
            points.set_column(i + 1 + STATE_SIZE, &(mean - sqrt_p.column(i)));
        }
        Some(points)
    }

    /// Current covariance estimate.
    pub fn get_certainty(&self) -> StateMatrix {
        self.covariance
    }
}

impl<M: SystemModel> StateEstimator for UnscentedKalmanFilter<M> {
    /// One full predict + correct cycle.
    ///
    /// Failure (`false`) is returned without mutating the filter when:
    /// - the prior covariance yields no sigma-point set,
    /// - the predicted covariance yields no sigma-point set,
    /// - the innovation covariance cannot be solved for the Kalman gain,
    /// - the corrected mean or covariance contains a non-finite value.
    fn update(&mut self, measurement: &MeasurementVector, control: &ControlVector) -> bool {
        // Predict: propagate the sigma points through the state-transition model.
        let Some(sigma_points) = self.get_sigma_points() else {
            return false;
        };
        let mut propagated = SigmaPoints::zeros();
        for i in 0..SIGMA_POINT_COUNT {
            let point = self
                .model
                .predict_state(&sigma_points.column(i).into_owned(), control);
            propagated.set_column(i, &point);
        }
        let mut mu_bar = StateVector::zeros();
        for (i, sigma_point) in propagated.column_iter().enumerate() {
            mu_bar += self.weights_mean[i] * sigma_point;
        }
        let mut p_bar = StateMatrix::zeros();
        for (i, sigma_point) in propagated.column_iter().enumerate() {
            let diff = sigma_point - mu_bar;
            p_bar += self.weights_cov[i] * diff * diff.transpose();
        }
        p_bar += self.process_noise;
        let p_bar = symmetrize(&p_bar);

        // Correct: regenerate sigma points around the prediction and map them into
        // measurement space.
        let Some(sigma_points) = self.sigma_points_around(&mu_bar, &p_bar) else {
            return false;
        };
        let mut measurement_sigma_points = MeasurementSigmaPoints::zeros();
        let mut z_hat = MeasurementVector::zeros();
        for (i, sigma_point) in sigma_points.column_iter().enumerate() {
            let z = self
                .model
                .predict_measurement(&sigma_point.into_owned(), control);
            measurement_sigma_points.set_column(i, &z);
            z_hat += self.weights_mean[i] * z;
        }
        let mut s = MeasurementMatrix::zeros();
        for (i, z) in measurement_sigma_points.column_iter().enumerate() {
            let diff = z - z_hat;
            s += self.weights_cov[i] * diff * diff.transpose();
        }
        s += self.measurement_noise;
        let mut cross_covariance = StateMatrix::zeros();
        for i in 0..SIGMA_POINT_COUNT {
            let state_diff = sigma_points.column(i) - mu_bar;
            let measurement_diff = measurement_sigma_points.column(i) - z_hat;
            cross_covariance += self.weights_cov[i] * state_diff * measurement_diff.transpose();
        }
        let Some(gain_transposed) = chol_solve_spd(&s, &cross_covariance.transpose()) else {
            return false;
        };
        let gain = gain_transposed.transpose();

        let mean = mu_bar + gain * (measurement - z_hat);
        let mut covariance = p_bar - gain * s * gain.transpose();
        covariance = symmetrize(&covariance);
        for i in 0..STATE_SIZE {
            covariance[(i, i)] += COVARIANCE_FLOOR;
        }
        if !mean.iter().all(|v| v.is_finite()) || !covariance.iter().all(|v| v.is_finite()) {
            return false;
        }
        self.mean_state = mean;
        self.covariance = covariance;
        true
    }

    /// Hard reset: mean to the given state, covariance and noise matrices re-seeded from
    /// the given scales, all accumulated filter history discarded.
    fn reset(
        &mut self,
        state: StateVector,
        covariance_scale: f64,
        process_noise_scale: f64,
        measurement_noise_scale: f64,
    ) {
        self.mean_state = state;
        self.covariance = StateMatrix::identity() * covariance_scale;
        self.process_noise = StateMatrix::identity() * process_noise_scale;
        self.measurement_noise = MeasurementMatrix::identity() * measurement_noise_scale;
    }

    fn get_estimate(&self) -> StateVector {
        self.mean_state
    }

    fn predicted_measurement(&self) -> MeasurementVector {
        self.model
            .predict_measurement(&self.mean_state, &ControlVector::zeros())
    }
}
