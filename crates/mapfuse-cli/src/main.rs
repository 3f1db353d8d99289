//! `mapfuse` – command-line entry point of the sensor-fusion simulator.
//!
//! Usage: `mapfuse <configuration_file.json>`
//!
//! The binary loads the configuration and the three datasets it names,
//! launches the operator pipeline, and writes the terminal record into the
//! working directory: `output_file.json` on normal termination,
//! `error_output.json` on a handled sensor crash. Both count as a completed
//! run (exit code 0); only startup failures exit non-zero.

mod config;
mod datasets;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use tracing::warn;

use mapfuse_operators::system::{self, CameraFeed, LidarFeed, SensorSuite, SystemConfig};
use mapfuse_types::{FuseError, RunOutcome};

use crate::config::SimConfig;

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the filter (default "info"); MAPFUSE_LOG_FORMAT=json
    // switches to newline-delimited JSON for log aggregators. User-facing
    // status lines below still go through println! for UX consistency.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("MAPFUSE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    println!("{}", "mapfuse – tick-driven sensor-fusion SLAM simulator".bold());

    let Some(config_path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("{} usage: mapfuse <configuration_file.json>", "error:".red().bold());
        return ExitCode::FAILURE;
    };

    match run(&config_path) {
        Ok(outcome) => {
            report(&outcome);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// Load everything, run the pipeline to completion, write the output file.
fn run(config_path: &Path) -> Result<RunOutcome, FuseError> {
    let config = SimConfig::load(config_path)?;
    let suite = build_suite(&config, config_path)?;

    let system_config = SystemConfig {
        tick_period: Duration::from_secs(config.tick_time),
        duration: config.duration,
    };

    // The runtime is created only after tracing is wired up and the datasets
    // are validated; startup failures never spawn an operator.
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| FuseError::Runtime(format!("cannot start runtime: {e}")))?;
    let outcome = runtime.block_on(system::run(system_config, suite))?;

    let cwd = std::env::current_dir()?;
    output::write_outcome(&outcome, &cwd)?;
    Ok(outcome)
}

/// Assemble the in-memory sensor suite from the configured datasets.
fn build_suite(config: &SimConfig, config_path: &Path) -> Result<SensorSuite, FuseError> {
    let pose_path = config.resolve(config_path, &config.pose_json_file);
    let camera_path = config.resolve(config_path, &config.cameras.camera_datas_path);
    let lidar_path = config.resolve(config_path, &config.lidar_workers.lidars_data_path);

    let poses = datasets::load_poses(&pose_path)?;
    let mut camera_frames = datasets::load_camera_frames(&camera_path)?;
    let lidar_records = datasets::load_lidar_records(&lidar_path)?;

    let cameras = config
        .cameras
        .configurations
        .iter()
        .map(|camera| {
            let frames = camera_frames.remove(&camera.camera_key).unwrap_or_else(|| {
                warn!(camera_key = %camera.camera_key, "no frames in camera data; sensor starts empty");
                Vec::new()
            });
            CameraFeed {
                id: camera.id,
                latency: camera.frequency,
                frames,
            }
        })
        .collect();

    let lidars = config
        .lidar_workers
        .configurations
        .iter()
        .map(|lidar| LidarFeed {
            id: lidar.id,
            frequency: lidar.frequency,
        })
        .collect();

    Ok(SensorSuite {
        cameras,
        lidars,
        lidar_records,
        poses,
    })
}

/// One human-readable line about how the run ended.
fn report(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(summary) => {
            println!(
                "{} {} ticks, {} detected, {} tracked, {} landmarks → {}",
                "✓".green().bold(),
                summary.system_runtime,
                summary.num_detected_objects,
                summary.num_tracked_objects,
                summary.num_landmarks,
                output::SUMMARY_FILE.bold(),
            );
        }
        RunOutcome::Crashed(report) => {
            println!(
                "{} {} failed at tick {}: {} → {}",
                "✗".red().bold(),
                report.faulty_sensor,
                report.system_runtime,
                report.error,
                output::CRASH_FILE.bold(),
            );
        }
    }
}
