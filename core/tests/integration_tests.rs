//! End-to-end integration tests for the pendulum fusion loop
//!
//! These tests run the full loop — truth simulation, noisy measurement synthesis, UKF
//! update, failure recovery, telemetry — rather than exercising single modules. All runs
//! are seeded, so the noise realizations (and therefore the assertions) repeat exactly.
//!
//! The convergence bound asserted below is not a theoretical limit: it was chosen loosely
//! against the configured noise and damping so the test acts as a regression check, not a
//! performance benchmark. The damped truth settles toward the hanging equilibrium within
//! the run length, and a healthy filter started from a deliberately wrong angle must end
//! up far closer to the truth than it began.

use pendulum::fusion::{FusionConfig, FusionLoop, TelemetryMode, RESET_NOTICE};
use pendulum::kalman::{UnscentedKalmanFilter, UKF_ALPHA, UKF_BETA, UKF_KAPPA};
use pendulum::models::PendulumModel;
use pendulum::sim::{TickRecord, NOISE_AMPLITUDE};
use pendulum::{
    ControlVector, MeasurementVector, PendulumState, StateEstimator, StateVector, GRAVITY,
    INITIAL_COVARIANCE, MEASUREMENT_NOISE, PROCESS_NOISE, ROD_LENGTH, TIME_STEP,
};

use assert_approx_eq::assert_approx_eq;
use std::f64::consts::FRAC_PI_2;

/// Build the default UKF loop writing telemetry into a byte buffer.
fn ukf_loop(config: FusionConfig) -> FusionLoop<UnscentedKalmanFilter<PendulumModel>, Vec<u8>> {
    let estimator = UnscentedKalmanFilter::new(
        PendulumModel::default(),
        config.initial_estimate.to_vector(),
        config.covariance_scale,
        config.process_noise_scale,
        config.measurement_noise_scale,
        UKF_ALPHA,
        UKF_BETA,
        UKF_KAPPA,
    );
    FusionLoop::new(config, estimator, Vec::new())
}

/// Timer gate disabled so bounded runs finish immediately.
fn batch_config() -> FusionConfig {
    FusionConfig {
        period_ms: 0,
        ..FusionConfig::default()
    }
}

fn sink_lines<E: StateEstimator>(fusion: &FusionLoop<E, Vec<u8>>) -> Vec<String> {
    String::from_utf8(fusion.sink().clone())
        .expect("telemetry is ASCII")
        .lines()
        .map(|line| line.to_string())
        .collect()
}

#[test]
fn test_first_tick_matches_hand_computed_dynamics() {
    // From theta = pi/2 at rest: one Euler step holds the angle and kicks the velocity
    // by -(g/l)*dt.
    let mut fusion = ukf_loop(batch_config());
    let record = fusion.tick().expect("tick writes to an in-memory sink");
    assert_approx_eq!(record.truth_theta, FRAC_PI_2, 1e-12);
    assert_approx_eq!(
        record.truth_theta_dot,
        -(GRAVITY / ROD_LENGTH) * TIME_STEP,
        1e-12
    );
    assert_eq!(record.clean_y1, record.truth_theta.sin() * ROD_LENGTH);
}

#[test]
fn test_noise_stays_bounded_over_run() {
    let mut fusion = ukf_loop(batch_config());
    fusion.run(200).unwrap();
    for record in fusion.history() {
        assert!((record.noisy_y1 - record.clean_y1).abs() <= NOISE_AMPLITUDE);
        assert_eq!(record.noisy_y2, record.clean_y2);
    }
}

#[test]
fn test_ukf_converges_from_wrong_initial_angle() {
    let mut fusion = ukf_loop(batch_config());
    fusion.run(1000).unwrap();
    assert_eq!(fusion.history().len(), 1000);
    // A healthy run never trips the recovery path.
    assert_eq!(fusion.reset_count(), 0);
    let last = fusion.history().last().unwrap();
    let initial_error = FRAC_PI_2; // estimate started at zero, truth at pi/2
    let final_error = (last.estimate_theta - last.truth_theta).abs();
    assert!(
        final_error < 0.3,
        "estimate should settle near the truth, final error {final_error}"
    );
    assert!(final_error < initial_error);
}

#[test]
fn test_telemetry_angle_mode_shape() {
    let mut fusion = ukf_loop(batch_config());
    fusion.run(50).unwrap();
    let lines = sink_lines(&fusion);
    assert_eq!(lines.len(), 50);
    for line in &lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(fields.len(), 3);
        for field in fields {
            field.parse::<f64>().expect("telemetry fields are floats");
        }
    }
}

#[test]
fn test_telemetry_measurement_mode_shape() {
    let config = FusionConfig {
        telemetry: TelemetryMode::Measurements,
        ..batch_config()
    };
    let mut fusion = ukf_loop(config);
    fusion.run(10).unwrap();
    let lines = sink_lines(&fusion);
    assert_eq!(lines.len(), 10);
    for (line, record) in lines.iter().zip(fusion.history()) {
        let fields: Vec<f64> = line
            .split_whitespace()
            .map(|field| field.parse().unwrap())
            .collect();
        assert_eq!(fields.len(), 4);
        // Fields carry 3 decimals of the recorded values, in order: compute time,
        // noisy y1, clean y1, estimate-projected y1.
        assert_approx_eq!(fields[1], record.noisy_y1, 5e-4);
        assert_approx_eq!(fields[2], record.clean_y1, 5e-4);
        assert_approx_eq!(fields[3], record.estimate_y1, 5e-4);
    }
}

#[test]
fn test_history_csv_round_trip() {
    let mut fusion = ukf_loop(batch_config());
    fusion.run(32).unwrap();
    let temp_file = std::env::temp_dir().join("pendulum_integration_history.csv");
    let temp_path = temp_file.to_string_lossy().to_string();
    TickRecord::to_csv(fusion.history(), &temp_path).expect("Failed to write CSV");
    let read_back = TickRecord::from_csv(&temp_path).expect("Failed to read CSV");
    assert_eq!(read_back.len(), fusion.history().len());
    assert_eq!(read_back[0].tick, fusion.history()[0].tick);
    assert_approx_eq!(
        read_back[31].estimate_theta,
        fusion.history()[31].estimate_theta,
        1e-9
    );
    let _ = std::fs::remove_file(&temp_path);
}

#[test]
fn test_truth_initial_condition_is_configurable() {
    let config = FusionConfig {
        initial_truth: PendulumState::new(0.1, 0.0),
        ..batch_config()
    };
    let mut fusion = ukf_loop(config);
    let record = fusion.tick().unwrap();
    // One Euler step from (0.1, 0): angle unchanged, velocity kicked by the restoring
    // torque at 0.1 rad.
    assert_approx_eq!(record.truth_theta, 0.1, 1e-12);
    assert_approx_eq!(
        record.truth_theta_dot,
        -(GRAVITY / ROD_LENGTH) * 0.1_f64.sin() * TIME_STEP,
        1e-12
    );
}

/// Estimator stub whose update fails on one chosen tick, recording every reset it is
/// handed so the recovery policy can be asserted exactly.
struct FailingEstimator {
    fail_on: u64,
    calls: u64,
    resets: Vec<(StateVector, f64, f64, f64)>,
    state: StateVector,
}

impl FailingEstimator {
    fn new(fail_on: u64) -> FailingEstimator {
        FailingEstimator {
            fail_on,
            calls: 0,
            resets: Vec::new(),
            state: StateVector::new(0.25, 0.0),
        }
    }
}

impl StateEstimator for FailingEstimator {
    fn update(&mut self, _measurement: &MeasurementVector, _control: &ControlVector) -> bool {
        let tick = self.calls;
        self.calls += 1;
        tick != self.fail_on
    }
    fn reset(
        &mut self,
        state: StateVector,
        covariance_scale: f64,
        process_noise_scale: f64,
        measurement_noise_scale: f64,
    ) {
        self.state = state;
        self.resets.push((
            state,
            covariance_scale,
            process_noise_scale,
            measurement_noise_scale,
        ));
    }
    fn get_estimate(&self) -> StateVector {
        self.state
    }
    fn predicted_measurement(&self) -> MeasurementVector {
        MeasurementVector::new(self.state[0].sin(), -self.state[0].cos())
    }
}

#[test]
fn test_failure_triggers_single_reset_and_loop_continues() {
    let fail_tick = 3;
    let mut fusion = FusionLoop::new(
        batch_config(),
        FailingEstimator::new(fail_tick),
        Vec::<u8>::new(),
    );
    fusion.run(6).unwrap();

    // Exactly one reset, carrying a zero state and the configured tuning scalars.
    assert_eq!(fusion.reset_count(), 1);
    let estimator = fusion.estimator();
    assert_eq!(estimator.resets.len(), 1);
    let (state, covariance_scale, process_noise_scale, measurement_noise_scale) =
        estimator.resets[0];
    assert_eq!(state, StateVector::zeros());
    assert_eq!(covariance_scale, INITIAL_COVARIANCE);
    assert_eq!(process_noise_scale, PROCESS_NOISE);
    assert_eq!(measurement_noise_scale, MEASUREMENT_NOISE);

    // The failing tick is flagged in the history; the loop keeps producing records after.
    assert_eq!(fusion.history().len(), 6);
    assert!(fusion.history()[fail_tick as usize].reset);
    assert!(!fusion.history()[fail_tick as usize + 1].reset);
}

#[test]
fn test_failure_notice_line_precedes_regular_telemetry() {
    let fail_tick = 2;
    let mut fusion = FusionLoop::new(
        batch_config(),
        FailingEstimator::new(fail_tick),
        Vec::<u8>::new(),
    );
    fusion.run(4).unwrap();
    let lines = sink_lines(&fusion);
    // 4 regular lines plus one notice, emitted just before the failing tick's line.
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[fail_tick as usize], RESET_NOTICE);
    // Telemetry resumes on the tick after the failure.
    let after: Vec<&str> = lines[fail_tick as usize + 2].split_whitespace().collect();
    assert_eq!(after.len(), 3);
}
