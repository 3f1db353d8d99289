//! `mapfuse-operators` – the five operator kinds of the simulator and the
//! wiring that runs them together.
//!
//! # Modules
//!
//! - [`world`] – pose-based local→world coordinate transform and the
//!   landmark-merge averaging rule.
//! - [`clock`] – [`ClockOperator`][clock::ClockOperator] and
//!   [`run_timer`][clock::run_timer]: the tick source, sensor bookkeeping,
//!   and the crash latch.
//! - [`camera`] – [`CameraOperator`][camera::CameraOperator]: replays frames
//!   with per-camera latency and raises the fault marker.
//! - [`lidar`] – [`LidarOperator`][lidar::LidarOperator] and the shared
//!   read-only [`LidarDatabase`][lidar::LidarDatabase]: matches camera
//!   detections to point clouds.
//! - [`pose`] – [`PoseOperator`][pose::PoseOperator]: replays the pose track,
//!   one event per matching tick.
//! - [`fusion`] – [`FusionOperator`][fusion::FusionOperator]: the sole owner
//!   of the landmark map and pose history; produces the terminal output.
//! - [`system`] – [`System`][system::System]: constructs bus, statistics, and
//!   operators from a sensor suite and runs the pipeline to completion. No
//!   process-global singletons; every shared resource is built here and
//!   passed in.

pub mod camera;
pub mod clock;
pub mod fusion;
pub mod lidar;
pub mod pose;
pub mod system;
pub mod world;

pub use clock::CLOCK_NAME;
pub use system::{CameraFeed, LidarFeed, SensorSuite, System, SystemConfig};
