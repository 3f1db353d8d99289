//! [`System`] – constructs and runs a complete pipeline.
//!
//! Everything the operators share – the bus, the statistics counters, the
//! lidar database, the clock state – is built here and passed in explicitly;
//! nothing in the workspace is a process-global. `launch` spawns one task per
//! participant plus the clock's timer, all gated on a single start barrier so
//! tick 1 cannot outrun anyone's subscriptions; `wait` joins every task and
//! yields the outcome the fusion operator produced.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Barrier};
use tokio::task::JoinHandle;
use tracing::info;

use mapfuse_bus::{run_operator, MessageBus};
use mapfuse_types::{FuseError, Pose, RunOutcome, StampedCloudPoints, StampedDetection, Statistics, Tick};

use crate::camera::CameraOperator;
use crate::clock::{run_timer, ClockOperator, ClockState};
use crate::fusion::FusionOperator;
use crate::lidar::{LidarDatabase, LidarOperator};
use crate::pose::{PoseOperator, POSE_NAME};

/// One camera: its identity, availability latency, and recorded frames.
#[derive(Debug, Clone)]
pub struct CameraFeed {
    pub id: u32,
    pub latency: Tick,
    pub frames: Vec<StampedDetection>,
}

/// One lidar worker. All workers read the suite-wide lidar records.
#[derive(Debug, Clone)]
pub struct LidarFeed {
    pub id: u32,
    pub frequency: Tick,
}

/// Every dataset the pipeline consumes, already in memory.
#[derive(Debug, Clone, Default)]
pub struct SensorSuite {
    pub cameras: Vec<CameraFeed>,
    pub lidars: Vec<LidarFeed>,
    pub lidar_records: Vec<StampedCloudPoints>,
    pub poses: Vec<Pose>,
}

/// Timing parameters of a run.
#[derive(Debug, Clone, Copy)]
pub struct SystemConfig {
    pub tick_period: Duration,
    pub duration: Tick,
}

/// A launched pipeline. Keep the handle and [`System::wait`] for the outcome.
pub struct System {
    bus: Arc<MessageBus>,
    stats: Arc<Statistics>,
    tasks: Vec<JoinHandle<()>>,
    outcome: oneshot::Receiver<RunOutcome>,
}

impl System {
    /// Spawn every operator and the clock timer. Returns immediately; the
    /// simulation runs in the background until data exhaustion, the
    /// configured duration, or a fault.
    pub fn launch(config: SystemConfig, suite: SensorSuite) -> System {
        let bus = Arc::new(MessageBus::new());
        let stats = Arc::new(Statistics::new());
        let database = Arc::new(LidarDatabase::new(suite.lidar_records));
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let mut sensor_names: HashSet<String> =
            suite.cameras.iter().map(|c| format!("camera{}", c.id)).collect();
        sensor_names.extend(suite.lidars.iter().map(|l| format!("lidar{}", l.id)));
        sensor_names.insert(POSE_NAME.to_string());

        // Counts follow the spawned operators, not the name set, so a
        // misconfigured duplicate id cannot stall the start barrier.
        let sensor_count = suite.cameras.len() + suite.lidars.len() + 1;
        let clock_state = Arc::new(ClockState::new(sensor_count));

        // Participants: sensors + fusion + clock; +1 for the timer task.
        let participants = sensor_count + 2;
        let ready = Arc::new(Barrier::new(participants + 1));

        info!(
            cameras = suite.cameras.len(),
            lidars = suite.lidars.len(),
            duration = config.duration,
            "launching pipeline"
        );

        let mut tasks = Vec::with_capacity(participants + 1);
        for camera in suite.cameras {
            let operator =
                CameraOperator::new(camera.id, camera.latency, camera.frames, Arc::clone(&stats));
            tasks.push(tokio::spawn(run_operator(operator, Arc::clone(&bus), Arc::clone(&ready))));
        }
        for lidar in suite.lidars {
            let operator =
                LidarOperator::new(lidar.id, lidar.frequency, Arc::clone(&database), Arc::clone(&stats));
            tasks.push(tokio::spawn(run_operator(operator, Arc::clone(&bus), Arc::clone(&ready))));
        }
        tasks.push(tokio::spawn(run_operator(
            PoseOperator::new(suite.poses),
            Arc::clone(&bus),
            Arc::clone(&ready),
        )));
        tasks.push(tokio::spawn(run_operator(
            FusionOperator::new(Arc::clone(&stats), outcome_tx),
            Arc::clone(&bus),
            Arc::clone(&ready),
        )));
        tasks.push(tokio::spawn(run_operator(
            ClockOperator::new(sensor_names, Arc::clone(&clock_state)),
            Arc::clone(&bus),
            Arc::clone(&ready),
        )));
        tasks.push(tokio::spawn(run_timer(
            clock_state,
            Arc::clone(&bus),
            Arc::clone(&stats),
            config.tick_period,
            config.duration,
            ready,
        )));

        System { bus, stats, tasks, outcome: outcome_rx }
    }

    /// The bus this pipeline runs on, for observability in tests.
    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    /// The shared statistics counters.
    pub fn stats(&self) -> Arc<Statistics> {
        Arc::clone(&self.stats)
    }

    /// Join every task and return the outcome fusion reported.
    pub async fn wait(self) -> Result<RunOutcome, FuseError> {
        for task in self.tasks {
            task.await
                .map_err(|e| FuseError::Runtime(format!("operator task failed: {e}")))?;
        }
        self.outcome
            .await
            .map_err(|_| FuseError::Runtime("fusion exited without reporting an outcome".to_string()))
    }
}

/// Convenience: launch and wait in one call.
pub async fn run(config: SystemConfig, suite: SensorSuite) -> Result<RunOutcome, FuseError> {
    System::launch(config, suite).wait().await
}
