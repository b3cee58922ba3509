//! PENDULUM: a fixed-rate UKF validation loop for a damped pendulum.
//!
//! The program simulates the ground-truth pendulum, feeds the estimator one noisy
//! measurement per tick, and prints one telemetry line per tick on stdout. A numerical
//! failure inside the estimator is recovered by an immediate reset and announced with a
//! notice line; the loop itself never stops for it.
//!
//! Run a bounded batch as fast as possible and keep the history for analysis:
//!
//!     pendulum --ticks 2000 --period-ms 0 --csv run.csv
//!
//! Or run at the real-time period indefinitely:
//!
//!     pendulum

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use log::info;

use pendulum::fusion::{FusionConfig, FusionLoop, TelemetryMode};
use pendulum::kalman::{UnscentedKalmanFilter, UKF_ALPHA, UKF_BETA, UKF_KAPPA};
use pendulum::models::PendulumModel;
use pendulum::sim::{TickRecord, DEFAULT_SEED};
use pendulum::{PendulumState, TICK_PERIOD_MS};

/// Command line arguments
#[derive(Parser)]
#[command(
    author,
    version,
    about = "A fixed-rate UKF state-estimation loop for a damped pendulum."
)]
struct Cli {
    /// Number of ticks to run (0 = run until interrupted)
    #[arg(long, default_value_t = 0)]
    ticks: u64,

    /// Loop period in milliseconds (0 = no timer gate, run as fast as possible)
    #[arg(long, default_value_t = TICK_PERIOD_MS)]
    period_ms: u64,

    /// RNG seed for the measurement noise
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Telemetry line format
    #[arg(long, value_enum, default_value = "angles")]
    telemetry: TelemetryMode,

    /// Initial true angular position in radians
    #[arg(long, default_value_t = std::f64::consts::FRAC_PI_2)]
    theta: f64,

    /// Initial true angular velocity in radians/second
    #[arg(long, default_value_t = 0.0)]
    theta_dot: f64,

    /// Initial estimator angular position in radians (wrong on purpose by default)
    #[arg(long, default_value_t = 0.0)]
    estimate_theta: f64,

    /// Write the per-tick run history to this CSV file after a bounded run
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or logger initialization fails.
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    let config = FusionConfig {
        period_ms: cli.period_ms,
        seed: cli.seed,
        telemetry: cli.telemetry,
        initial_truth: PendulumState::new(cli.theta, cli.theta_dot),
        initial_estimate: PendulumState::new(cli.estimate_theta, 0.0),
        ..FusionConfig::default()
    };
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
    let stdout = std::io::stdout().lock();
    let mut fusion = FusionLoop::new(config, estimator, stdout);

    if cli.ticks == 0 {
        info!("running until interrupted (period {} ms)", cli.period_ms);
        fusion.run_forever()?;
    } else {
        info!("running {} ticks (period {} ms)", cli.ticks, cli.period_ms);
        fusion.run(cli.ticks)?;
        if let Some(path) = cli.csv.as_ref() {
            TickRecord::to_csv(fusion.history(), path)?;
            info!(
                "wrote {} history records to {}",
                fusion.history().len(),
                path.display()
            );
        }
    }
    Ok(())
}
