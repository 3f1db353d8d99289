//! The fusion operator: sole owner of the landmark map and pose history.
//!
//! Fusion ingests three event streams. `RobotPose` events append to the pose
//! history. `TrackedObjects` batches are integrated into the map: each object
//! is paired with the pose recorded at its detection tick, transformed into
//! the world frame, and either inserted as a new landmark or averaged into
//! the existing one with the same id. `DetectObjectsForFusion` frames are
//! only recorded per camera so a crash snapshot can show what each sensor
//! last saw; their promise is deliberately left unresolved.
//!
//! The clock's final broadcast makes fusion the terminal writer: on
//! `Terminated` it produces the run summary, on `Crashed` the crash
//! snapshot, then it hands the outcome to whoever launched the system and
//! leaves the bus.
//!
//! All of this state lives on fusion's own task, so the landmark map needs
//! no synchronization.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use mapfuse_bus::{Context, Operator};
use mapfuse_types::{
    Broadcast, BroadcastKind, CrashReport, Event, EventKind, EventPayload, Landmark, Pose,
    RunOutcome, RunSummary, StampedDetection, Statistics, Tick, TrackedObject,
};

use crate::clock::CLOCK_NAME;
use crate::world;

/// Participant name of the fusion operator.
pub const FUSION_NAME: &str = "fusion";

pub struct FusionOperator {
    landmarks: Vec<Landmark>,
    landmark_index: HashMap<String, usize>,
    pose_history: Vec<Pose>,
    current_tick: Tick,
    last_camera_frames: BTreeMap<String, StampedDetection>,
    last_lidar_frames: BTreeMap<String, Vec<TrackedObject>>,
    stats: Arc<Statistics>,
    outcome: Option<oneshot::Sender<RunOutcome>>,
}

impl FusionOperator {
    pub fn new(stats: Arc<Statistics>, outcome: oneshot::Sender<RunOutcome>) -> Self {
        Self {
            landmarks: Vec::new(),
            landmark_index: HashMap::new(),
            pose_history: Vec::new(),
            current_tick: 0,
            last_camera_frames: BTreeMap::new(),
            last_lidar_frames: BTreeMap::new(),
            stats,
            outcome: Some(outcome),
        }
    }

    /// Landmarks accumulated so far, in first-sighting order.
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    /// Fold a batch of tracked objects into the landmark map.
    fn integrate(&mut self, batch: Vec<TrackedObject>) {
        for object in batch {
            let Some(pose) = self
                .pose_history
                .iter()
                .find(|pose| pose.time == object.time)
                .copied()
            else {
                warn!(object = %object.id, time = object.time, "no pose for tracked object; skipping");
                continue;
            };

            let world_coords = world::to_world_frame(&object.coordinates, &pose);
            match self.landmark_index.get(&object.id).copied() {
                Some(index) => {
                    let merged = world::merge_coordinates(
                        &self.landmarks[index].coordinates,
                        &world_coords,
                    );
                    debug!(landmark = %object.id, "refined existing landmark");
                    self.landmarks[index] = Landmark {
                        id: object.id,
                        description: object.description,
                        coordinates: merged,
                    };
                }
                None => {
                    info!(landmark = %object.id, "new landmark");
                    self.landmark_index.insert(object.id.clone(), self.landmarks.len());
                    self.landmarks.push(Landmark {
                        id: object.id,
                        description: object.description,
                        coordinates: world_coords,
                    });
                    self.stats.add_landmark();
                }
            }
        }
    }

    fn finish(&mut self, outcome: RunOutcome, ctx: &mut Context) {
        if let Some(sender) = self.outcome.take() {
            let _ = sender.send(outcome);
        }
        ctx.terminate();
    }

    fn summarize(&self) -> RunSummary {
        let snapshot = self.stats.snapshot();
        RunSummary {
            system_runtime: snapshot.ticks,
            num_detected_objects: snapshot.detected,
            num_tracked_objects: snapshot.tracked,
            num_landmarks: snapshot.landmarks,
            landmarks: self.landmarks.clone(),
        }
    }

    fn snapshot_crash(&self, error_maker: String, message: String) -> CrashReport {
        let snapshot = self.stats.snapshot();
        CrashReport {
            error: message,
            faulty_sensor: error_maker,
            last_cameras_frame: self.last_camera_frames.clone(),
            last_lidar_frames: self.last_lidar_frames.clone(),
            poses: self.pose_history.clone(),
            system_runtime: self.current_tick,
            num_detected_objects: snapshot.detected,
            num_tracked_objects: snapshot.tracked,
            num_landmarks: self.landmarks.len() as u64,
            landmarks: self.landmarks.clone(),
        }
    }
}

impl Operator for FusionOperator {
    fn name(&self) -> &str {
        FUSION_NAME
    }

    fn init(&mut self, ctx: &mut Context) {
        ctx.subscribe_broadcast(BroadcastKind::Tick);
        ctx.subscribe_broadcast(BroadcastKind::Terminated);
        ctx.subscribe_broadcast(BroadcastKind::Crashed);
        ctx.subscribe_event(EventKind::RobotPose);
        ctx.subscribe_event(EventKind::TrackedObjects);
        ctx.subscribe_event(EventKind::DetectObjectsForFusion);
    }

    fn on_event(&mut self, event: Event, ctx: &mut Context) {
        match event.payload {
            EventPayload::RobotPose { pose, .. } => {
                debug!(time = pose.time, "pose recorded");
                self.pose_history.push(pose);
                ctx.complete(event.id, true);
            }
            EventPayload::TrackedObjects { batch, sender } => {
                self.last_lidar_frames.insert(sender, batch.clone());
                self.integrate(batch);
                ctx.complete(event.id, true);
            }
            EventPayload::DetectObjectsForFusion { frame, sender } => {
                // Snapshot bookkeeping only; the event's promise stays open.
                self.last_camera_frames.insert(sender, frame);
            }
            EventPayload::DetectObjects { .. } => {}
        }
    }

    fn on_broadcast(&mut self, broadcast: Broadcast, ctx: &mut Context) {
        match broadcast {
            Broadcast::Tick { tick } => self.current_tick = tick,
            Broadcast::Terminated { sender } if sender == CLOCK_NAME => {
                let summary = self.summarize();
                info!(
                    runtime = summary.system_runtime,
                    detected = summary.num_detected_objects,
                    tracked = summary.num_tracked_objects,
                    landmarks = summary.num_landmarks,
                    "run complete"
                );
                self.finish(RunOutcome::Completed(summary), ctx);
            }
            Broadcast::Crashed { sender, error_maker, message } if sender == CLOCK_NAME => {
                let report = self.snapshot_crash(error_maker, message);
                error!(
                    sensor = %report.faulty_sensor,
                    error = %report.error,
                    tick = report.system_runtime,
                    cameras = report.last_cameras_frame.len(),
                    lidars = report.last_lidar_frames.len(),
                    poses = report.poses.len(),
                    landmarks = report.landmarks.len(),
                    "run crashed; snapshot captured"
                );
                self.finish(RunOutcome::Crashed(report), ctx);
            }
            _ => {}
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
