//! The fixed-period fusion loop: scheduling, failure recovery, and telemetry.
//!
//! `FusionLoop` is the owned context for one simulation + estimation run. It holds the
//! truth simulator, the estimator, and the telemetry sink, and drives them through the
//! strict per-tick order: truth advance, measurement synthesis, estimator update, failure
//! recovery, telemetry emission. Nothing here is global, so multiple independent loops can
//! coexist (and unit tests need no teardown).
//!
//! The loop has two states, RUNNING and RECOVERING, but RECOVERING is transient: a failed
//! estimator update triggers an unconditional, synchronous reset to a zero state with the
//! crate's tuning scalars, a notice line on the telemetry sink, and the loop is RUNNING
//! again before the tick ends. Failure is never fatal and there is no retry or backoff.
//!
//! Scheduling is fixed-period rather than isochronous: the [`Ticker`] is reset to zero
//! *after* the tick's work, so if a tick takes non-negligible time that time drifts the
//! schedule. This mirrors a run-to-completion firmware loop gated on an elapsed-time
//! counter, with the busy-wait replaced by a sleep.

use crate::sim::{TickRecord, TruthSimulator, DEFAULT_SEED};
use crate::{
    ControlVector, PendulumState, StateEstimator, StateVector, INITIAL_COVARIANCE,
    MEASUREMENT_NOISE, PROCESS_NOISE, TICK_PERIOD_MS, TIME_STEP,
};

use std::f64::consts::FRAC_PI_2;
use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Notice line emitted on the telemetry sink when the estimator fails and is reset.
pub const RESET_NOTICE: &str = "estimator update failed; filter reset to recovery state";

/// Resettable elapsed-time source gating the fixed-period loop.
///
/// `wait` sleeps out whatever remains of the period since the last reset (no busy spin),
/// and `reset` restarts the count from zero. Resetting after the tick's work gives the
/// fixed-period (drift-accumulating) schedule described in the module docs.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    started: Instant,
}

impl Ticker {
    pub fn new(period: Duration) -> Ticker {
        Ticker {
            period,
            started: Instant::now(),
        }
    }
    /// Sleep until the configured period has elapsed since the last reset. Returns
    /// immediately if the period has already passed (or is zero).
    pub fn wait(&self) {
        let elapsed = self.started.elapsed();
        if elapsed < self.period {
            thread::sleep(self.period - elapsed);
        }
    }
    /// Restart the elapsed count from zero.
    pub fn reset(&mut self) {
        self.started = Instant::now();
    }
    /// Time since the last reset.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Which fields the per-tick telemetry line carries.
///
/// All lines start with the estimator compute time in milliseconds; the remaining fields
/// compare truth and estimate either in angle space or in measurement space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryMode {
    /// `<compute_ms> <truth_theta> <estimate_theta>`
    #[default]
    Angles,
    /// `<compute_ms> <noisy_y1> <truth_y1> <estimate_y1>`
    Measurements,
}

/// Configuration for one fusion-loop run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Time step in seconds, shared by the truth simulator and the filter's model.
    pub dt: f64,
    /// Loop period in milliseconds. Zero disables the timer gate entirely, running
    /// as fast as possible (batch runs, tests).
    pub period_ms: u64,
    /// RNG seed for the measurement noise.
    pub seed: u64,
    /// Telemetry line format.
    pub telemetry: TelemetryMode,
    /// Covariance scale used for every estimator reset.
    pub covariance_scale: f64,
    /// Process-noise scale used for every estimator reset.
    pub process_noise_scale: f64,
    /// Measurement-noise scale used for every estimator reset.
    pub measurement_noise_scale: f64,
    /// Initial ground-truth state.
    pub initial_truth: PendulumState,
    /// Initial estimator state. Deliberately different from the truth in the default
    /// configuration, to demonstrate convergence from a wrong initial guess.
    pub initial_estimate: PendulumState,
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig {
            dt: TIME_STEP,
            period_ms: TICK_PERIOD_MS,
            seed: DEFAULT_SEED,
            telemetry: TelemetryMode::default(),
            covariance_scale: INITIAL_COVARIANCE,
            process_noise_scale: PROCESS_NOISE,
            measurement_noise_scale: MEASUREMENT_NOISE,
            initial_truth: PendulumState::new(FRAC_PI_2, 0.0),
            initial_estimate: PendulumState::new(0.0, 0.0),
        }
    }
}

/// The periodic fusion loop controller.
///
/// Generic over the estimator (so tests can inject failure stubs) and the telemetry sink
/// (any `io::Write`; stdout in the binary, a buffer in tests).
pub struct FusionLoop<E: StateEstimator, W: Write> {
    config: FusionConfig,
    truth: TruthSimulator,
    estimator: E,
    sink: W,
    history: Vec<TickRecord>,
    ticks: u64,
    resets: u64,
}

impl<E: StateEstimator, W: Write> FusionLoop<E, W> {
    /// Build a loop context from a configuration, an estimator, and a telemetry sink.
    ///
    /// The truth simulator is constructed here from the configuration, so the caller
    /// never holds a handle to the true state.
    pub fn new(config: FusionConfig, estimator: E, sink: W) -> FusionLoop<E, W> {
        let truth = TruthSimulator::new(config.initial_truth, config.dt, config.seed);
        FusionLoop {
            config,
            truth,
            estimator,
            sink,
            history: Vec::new(),
            ticks: 0,
            resets: 0,
        }
    }

    /// Execute one tick of the loop body (everything except the timer gate).
    ///
    /// Order within the tick is strict: truth advance, then measurement synthesis, then
    /// estimator update, then recovery on failure, then telemetry. The estimator must
    /// only ever observe the current tick's measurement.
    pub fn tick(&mut self) -> io::Result<TickRecord> {
        // 1. Advance the truth and synthesize the measurement pair.
        let (truth_state, noisy, clean) = self.truth.tick();
        let control = ControlVector::zeros();

        // 2-4. Timed estimator update, with unconditional reset on failure.
        let started = Instant::now();
        let ok = self.estimator.update(&noisy, &control);
        if !ok {
            self.estimator.reset(
                StateVector::zeros(),
                self.config.covariance_scale,
                self.config.process_noise_scale,
                self.config.measurement_noise_scale,
            );
            self.resets += 1;
            log::warn!(
                "estimator update failed on tick {}; reset to recovery state",
                self.ticks
            );
            writeln!(self.sink, "{RESET_NOTICE}")?;
        }
        let compute_us = started.elapsed().as_micros() as u64;

        // 5. Telemetry.
        let estimate = self.estimator.get_estimate();
        let projected = self.estimator.predicted_measurement();
        let compute_ms = compute_us as f64 / 1000.0;
        match self.config.telemetry {
            TelemetryMode::Angles => writeln!(
                self.sink,
                "{:.3} {:.3} {:.3}",
                compute_ms, truth_state.theta, estimate[0]
            )?,
            TelemetryMode::Measurements => writeln!(
                self.sink,
                "{:.3} {:.3} {:.3} {:.3}",
                compute_ms, noisy[0], clean[0], projected[0]
            )?,
        }

        let record = TickRecord {
            tick: self.ticks,
            compute_us,
            truth_theta: truth_state.theta,
            truth_theta_dot: truth_state.theta_dot,
            noisy_y1: noisy[0],
            noisy_y2: noisy[1],
            clean_y1: clean[0],
            clean_y2: clean[1],
            estimate_theta: estimate[0],
            estimate_theta_dot: estimate[1],
            estimate_y1: projected[0],
            estimate_y2: projected[1],
            reset: !ok,
        };
        self.history.push(record.clone());
        self.ticks += 1;
        Ok(record)
    }

    /// Run a bounded number of ticks at the configured period.
    pub fn run(&mut self, ticks: u64) -> io::Result<()> {
        log::debug!(
            "starting fusion loop: {} ticks at {} ms",
            ticks,
            self.config.period_ms
        );
        let period = Duration::from_millis(self.config.period_ms);
        let mut ticker = Ticker::new(period);
        for _ in 0..ticks {
            if !period.is_zero() {
                ticker.wait();
            }
            self.tick()?;
            // Fixed-period schedule: the count restarts after the work, so compute time
            // drifts the schedule rather than shortening the next sleep.
            ticker.reset();
        }
        Ok(())
    }

    /// Run until the process is interrupted.
    pub fn run_forever(&mut self) -> io::Result<()> {
        log::debug!(
            "starting unbounded fusion loop at {} ms",
            self.config.period_ms
        );
        let period = Duration::from_millis(self.config.period_ms);
        let mut ticker = Ticker::new(period);
        loop {
            if !period.is_zero() {
                ticker.wait();
            }
            self.tick()?;
            ticker.reset();
        }
    }

    /// The per-tick history accumulated so far.
    pub fn history(&self) -> &[TickRecord] {
        &self.history
    }

    /// Number of estimator resets triggered so far.
    pub fn reset_count(&self) -> u64 {
        self.resets
    }

    /// Read-only access to the estimator (telemetry, assertions in tests).
    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    /// Read-only access to the telemetry sink.
    pub fn sink(&self) -> &W {
        &self.sink
    }
}
