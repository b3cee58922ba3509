//! Pendulum state-estimation toolbox built around a fixed-rate fusion loop
//!
//! This crate provides a small, self-contained testbed for validating an Unscented Kalman
//! Filter (UKF) against a simulated ground truth. The modeled process is a damped pendulum:
//! a second-order nonlinear ODE reduced to two state variables, angular position and angular
//! velocity. The crate is not a general simulation framework; it models exactly this one
//! process family and exists to exercise the estimator and the periodic loop that drives it.
//!
//! The crate is organized leaves-first:
//! - [`linalg`]: robust covariance square roots for sigma-point generation.
//! - [`models`]: the system-model trait (state transition + measurement prediction) and the
//!   pendulum implementation the filter uses internally.
//! - [`kalman`]: the Unscented Kalman Filter.
//! - [`sim`]: the truth simulator (noise-free physics plus synthetic sensor noise) and the
//!   per-tick record type for run histories.
//! - [`fusion`]: the fixed-period fusion loop controller, including the failure-detection
//!   and estimator-reset policy.
//!
//! Primarily built off of [`nalgebra`](https://crates.io/crates/nalgebra), which provides
//! the statically-sized vectors and matrices used throughout. All vector quantities are
//! fixed-dimension (`SVector`/`SMatrix`), so the numeric core is allocation-free and
//! dimension-checked at compile time. In general, variables and constants are named for the
//! quantity they represent rather than the mathematical symbol: the rod length is
//! `ROD_LENGTH`, not `l`.
//!
//! # Process model
//!
//! The continuous dynamics of a damped pendulum of rod length $l$ with damping coefficient
//! $\alpha$ are
//!
//! $$
//! \ddot{\theta} = -\frac{g}{l} \sin(\theta) - \alpha \dot{\theta}
//! $$
//!
//! discretized by an explicit Euler step at a fixed time step $\Delta t$:
//!
//! $$
//! \theta_{k+1} = \theta_k + \dot{\theta}_k \Delta t, \qquad
//! \dot{\theta}_{k+1} = \dot{\theta}_k + \left( -\frac{g}{l} \sin(\theta_k)
//!     - \alpha \dot{\theta}_k \right) \Delta t
//! $$
//!
//! The angle fed into the transition is first passed through [`wrap_angle`], a single-step
//! range correction (see its documentation for the exact rule).
//!
//! # Observation model
//!
//! The sensor observes the Cartesian position of the pendulum bob:
//!
//! $$
//! y_1 = \sin(\theta) \cdot l, \qquad y_2 = -\cos(\theta) \cdot l
//! $$
//!
//! No wrapping is applied on the observation side; the raw angle from the state is used.
//!
//! The same time step must be shared by the truth simulator and the filter's internal model.
//! The two deliberately keep *independent copies* of the physics (see [`sim`] and [`models`])
//! so that "simulated reality" and "internal model" remain separate concerns, but the time
//! step itself has to match or the filter's propagation diverges from the simulation by
//! construction.

pub mod fusion;
pub mod kalman;
pub mod linalg;
pub mod models;
pub mod sim;

use std::f64::consts::PI;
use std::fmt::{self, Display};

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

/// State vector: angular position (radians) and angular velocity (radians/second).
pub type StateVector = SVector<f64, 2>;
/// Control vector. The pendulum has no actuation, so this is always zero, but it is kept
/// in every model and estimator signature for generality.
pub type ControlVector = SVector<f64, 1>;
/// Measurement vector: Cartesian position of the pendulum bob in meters.
pub type MeasurementVector = SVector<f64, 2>;
/// State-sized square matrix (covariances, process noise).
pub type StateMatrix = SMatrix<f64, 2, 2>;
/// Measurement-sized square matrix (innovation covariance, measurement noise).
pub type MeasurementMatrix = SMatrix<f64, 2, 2>;

/// Gravitational acceleration in m/s^2.
pub const GRAVITY: f64 = 9.81;
/// Pendulum rod length in meters.
pub const ROD_LENGTH: f64 = 1.0;
/// Viscous damping coefficient in 1/s.
pub const DAMPING: f64 = 0.5;
/// Discrete time step shared by the truth simulator and the process model, in seconds.
pub const TIME_STEP: f64 = 0.01;
/// Fusion loop period in milliseconds. Must agree with [`TIME_STEP`].
pub const TICK_PERIOD_MS: u64 = 10;

/// Initial covariance scale applied on every estimator reset.
pub const INITIAL_COVARIANCE: f64 = 1.0;
/// Process noise scale applied on every estimator reset.
pub const PROCESS_NOISE: f64 = 1e-4;
/// Measurement noise scale applied on every estimator reset. Matches the variance of the
/// uniform [-1, 1] meter noise injected on the first measurement component.
pub const MEASUREMENT_NOISE: f64 = 1.0 / 3.0;

/// The pendulum state: angular position and angular velocity.
///
/// Two parallel instances of this state exist during a run: the ground truth owned by the
/// truth simulator, and the estimate owned by the filter (exposed read-only through the
/// [`StateEstimator`] trait). They are never allowed to touch: the estimator only ever sees
/// the measurement vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PendulumState {
    /// Angular position in radians, measured from the stable (hanging) equilibrium.
    pub theta: f64,
    /// Angular velocity in radians per second.
    pub theta_dot: f64,
}

impl Display for PendulumState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PendulumState {{ theta: {:.4} rad, theta_dot: {:.4} rad/s }}",
            self.theta, self.theta_dot
        )
    }
}

impl PendulumState {
    /// Create a new state from angular position (radians) and velocity (radians/second).
    pub fn new(theta: f64, theta_dot: f64) -> PendulumState {
        PendulumState { theta, theta_dot }
    }
    /// Convert the state to a canonical state vector, nalgebra style.
    ///
    /// # Returns
    /// * `StateVector` in the order [theta, theta_dot]
    pub fn to_vector(&self) -> StateVector {
        StateVector::new(self.theta, self.theta_dot)
    }
    /// Create a state from a canonical state vector in the order [theta, theta_dot].
    pub fn new_from_vector(state: StateVector) -> PendulumState {
        PendulumState {
            theta: state[0],
            theta_dot: state[1],
        }
    }
}

/// Single-step angle range correction.
///
/// If the angle exceeds `pi`, subtract `pi`; if it is below `-pi`, add `pi`. Angles already
/// in `(-pi, pi]` pass through untouched. Note that the correction amount is `pi`, not
/// `2*pi`: this is a one-shot nudge that keeps the angle roughly inside `(-2*pi, 2*pi)`
/// from one tick to the next, not a full modulo reduction, and an input more than one
/// period out of range will not land back in `(-pi, pi]` after a single application. The
/// filter tuning in this crate was established against this exact correction; replacing it
/// with a true `2*pi`-periodic reduction changes the estimator's behavior.
///
/// # Example
/// ```rust
/// use pendulum::wrap_angle;
/// use std::f64::consts::PI;
/// assert!((wrap_angle(1.5 * PI) - 0.5 * PI).abs() < 1e-12);
/// assert_eq!(wrap_angle(PI), PI); // already in range: untouched
/// ```
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > PI {
        angle - PI
    } else if angle < -PI {
        angle + PI
    } else {
        angle
    }
}

/// Advance a pendulum state one time step with the explicit-Euler dynamics.
///
/// This is the ground-truth physics used by the truth simulator. The filter's internal
/// model in [`models`] carries its own copy of these equations; keep the two in agreement
/// when changing the dynamics.
///
/// The angular position is passed through [`wrap_angle`] before use, so the trigonometric
/// terms stay well-conditioned across long runs.
///
/// # Arguments
/// * `state` - The state to advance, updated in place.
/// * `dt` - Time step in seconds.
///
/// # Example
/// ```rust
/// use pendulum::{forward, PendulumState, GRAVITY, ROD_LENGTH, TIME_STEP};
/// use std::f64::consts::FRAC_PI_2;
/// let mut state = PendulumState::new(FRAC_PI_2, 0.0);
/// forward(&mut state, TIME_STEP);
/// // Zero initial velocity: the angle holds for one step while velocity picks up.
/// assert!((state.theta - FRAC_PI_2).abs() < 1e-12);
/// assert!((state.theta_dot + GRAVITY / ROD_LENGTH * TIME_STEP).abs() < 1e-12);
/// ```
pub fn forward(state: &mut PendulumState, dt: f64) {
    let theta = wrap_angle(state.theta);
    let theta_dot = state.theta_dot;
    state.theta = theta + theta_dot * dt;
    state.theta_dot = theta_dot + (-(GRAVITY / ROD_LENGTH) * theta.sin() - DAMPING * theta_dot) * dt;
}

/// Map a pendulum state to the noise-free measurement: the Cartesian position of the bob.
///
/// Uses the raw angle from the state; no wrapping is applied on the observation side.
///
/// # Returns
/// * `MeasurementVector` in the order [x, y], meters.
pub fn observe(state: &PendulumState) -> MeasurementVector {
    MeasurementVector::new(
        state.theta.sin() * ROD_LENGTH,
        -state.theta.cos() * ROD_LENGTH,
    )
}

/// Interface the fusion loop requires from a state estimator.
///
/// The loop drives the estimator strictly through this trait: one `update` per tick with
/// the current measurement and control, a hard `reset` when the update reports numerical
/// failure, and read-only accessors for telemetry. Implementations signal failure by
/// returning `false` from `update` and must leave their exposed state untouched in that
/// case; recovery is the caller's decision.
pub trait StateEstimator {
    /// Consume one measurement and control input, running a full predict + correct cycle.
    ///
    /// # Returns
    /// * `true` if the numerical update succeeded, `false` on breakdown (e.g. a
    ///   non-positive-definite covariance or a degenerate sigma-point set).
    fn update(&mut self, measurement: &MeasurementVector, control: &ControlVector) -> bool;
    /// Hard reset to a known state, discarding all accumulated filter history.
    ///
    /// # Arguments
    /// * `state` - State estimate to restart from.
    /// * `covariance_scale` - New covariance is this scale times identity.
    /// * `process_noise_scale` - New process noise is this scale times identity.
    /// * `measurement_noise_scale` - New measurement noise is this scale times identity.
    fn reset(
        &mut self,
        state: StateVector,
        covariance_scale: f64,
        process_noise_scale: f64,
        measurement_noise_scale: f64,
    );
    /// Current state estimate.
    fn get_estimate(&self) -> StateVector;
    /// Measurement-space projection of the current state estimate.
    fn predicted_measurement(&self) -> MeasurementVector;
}
