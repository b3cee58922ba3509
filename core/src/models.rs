//! System models: the state-transition and measurement-prediction hooks the filter uses.
//!
//! The estimator is decoupled from any specific physical system through the [`SystemModel`]
//! trait: one method advances a state hypothesis a single time step, the other maps a state
//! hypothesis into measurement space. Substituting another second-order system means
//! implementing this trait and handing the implementation to the filter; nothing else in
//! the crate changes.
//!
//! [`PendulumModel`] is the one implementation shipped here. It carries its own copy of the
//! pendulum equations rather than calling the ground-truth physics in the crate root: the
//! truth simulator plays "reality" while this model is the filter's *belief* about reality,
//! and the two must be able to drift apart (different initial conditions, future model
//! mismatch experiments) without sharing code paths.

use crate::{wrap_angle, ControlVector, MeasurementVector, StateVector};
use crate::{DAMPING, GRAVITY, ROD_LENGTH, TIME_STEP};

/// State transition and measurement prediction for one physical system.
///
/// Both methods are pure: deterministic, no side effects. The control input is unused by
/// the pendulum (it has no actuation) but stays in the signatures so that actuated systems
/// fit the same interface.
pub trait SystemModel {
    /// Advance a state hypothesis one discrete time step: f(x, u).
    fn predict_state(&self, state: &StateVector, control: &ControlVector) -> StateVector;
    /// Map a state hypothesis to the expected measurement: h(x, u).
    fn predict_measurement(&self, state: &StateVector, control: &ControlVector)
    -> MeasurementVector;
}

/// Damped pendulum model: explicit Euler step of the second-order dynamics.
#[derive(Clone, Copy, Debug)]
pub struct PendulumModel {
    /// Gravitational acceleration in m/s^2.
    pub gravity: f64,
    /// Rod length in meters.
    pub rod_length: f64,
    /// Viscous damping coefficient in 1/s.
    pub damping: f64,
    /// Time step in seconds. Must match the truth simulator's step.
    pub dt: f64,
}

impl Default for PendulumModel {
    fn default() -> Self {
        PendulumModel {
            gravity: GRAVITY,
            rod_length: ROD_LENGTH,
            damping: DAMPING,
            dt: TIME_STEP,
        }
    }
}

impl SystemModel for PendulumModel {
    /// One Euler step. The angular position is passed through [`wrap_angle`] before use;
    /// see that function for the exact (single-step) correction rule.
    fn predict_state(&self, state: &StateVector, _control: &ControlVector) -> StateVector {
        let theta = wrap_angle(state[0]);
        let theta_dot = state[1];
        StateVector::new(
            theta + theta_dot * self.dt,
            theta_dot
                + (-(self.gravity / self.rod_length) * theta.sin() - self.damping * theta_dot)
                    * self.dt,
        )
    }
    /// Cartesian bob position. No wrapping on the observation side; the raw angle is used.
    fn predict_measurement(
        &self,
        state: &StateVector,
        _control: &ControlVector,
    ) -> MeasurementVector {
        MeasurementVector::new(
            state[0].sin() * self.rod_length,
            -state[0].cos() * self.rod_length,
        )
    }
}
