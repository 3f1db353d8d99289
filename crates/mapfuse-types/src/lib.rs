//! `mapfuse-types` – shared vocabulary of the mapfuse simulator.
//!
//! Every other crate in the workspace speaks in the types defined here:
//! sensor observations ([`StampedDetection`], [`StampedCloudPoints`],
//! [`TrackedObject`]), the robot's [`Pose`], the map entities ([`Landmark`]),
//! the finite message alphabet routed by `mapfuse-bus` ([`Event`],
//! [`Broadcast`]), the process-wide [`Statistics`] counters, and the two
//! terminal output records ([`RunSummary`], [`CrashReport`]).
//!
//! Simulation time is the integer **tick**: a monotonic counter starting at 1
//! that the clock operator broadcasts to every participant. All timestamps in
//! the data model are tick values, never wall-clock instants.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Discrete simulation time. Tick 1 is the first instant that ever happens.
pub type Tick = u64;

/// Sentinel object/record id that marks a faulty sensor reading.
///
/// A camera frame containing a detection with this id, or a lidar database
/// record carrying it, aborts the run through the crash protocol.
pub const ERROR_ID: &str = "ERROR";

// ────────────────────────────────────────────────────────────────────────────
// Sensor observations
// ────────────────────────────────────────────────────────────────────────────

/// A 2-D point, in the sensor's local frame until the fusion operator rotates
/// and translates it into the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloudPoint {
    pub x: f64,
    pub y: f64,
}

impl CloudPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A single camera-level identification of some object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub id: String,
    pub description: String,
}

impl DetectedObject {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }

    /// True when this detection is the [`ERROR_ID`] fault marker.
    pub fn is_fault(&self) -> bool {
        self.id == ERROR_ID
    }
}

/// Everything one camera saw at one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedDetection {
    pub time: Tick,
    #[serde(rename = "detectedObjects")]
    pub detected_objects: Vec<DetectedObject>,
}

/// A raw lidar return for one object id at one tick, as stored in the lidar
/// database. Points are kept in their on-disk form (`[x, y, ...]` rows);
/// any components past x and y are ignored by [`StampedCloudPoints::points`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedCloudPoints {
    pub id: String,
    pub time: Tick,
    #[serde(rename = "cloudPoints")]
    pub cloud_points: Vec<Vec<f64>>,
}

impl StampedCloudPoints {
    /// The 2-D view of this record. Rows with fewer than two components are
    /// malformed and dropped.
    pub fn points(&self) -> Vec<CloudPoint> {
        self.cloud_points
            .iter()
            .filter(|row| row.len() >= 2)
            .map(|row| CloudPoint::new(row[0], row[1]))
            .collect()
    }
}

/// A camera detection enriched with its matched lidar point cloud.
///
/// `time` is the detection time of the originating camera frame; the fusion
/// operator pairs it with the pose recorded at that same tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: String,
    pub time: Tick,
    pub description: String,
    pub coordinates: Vec<CloudPoint>,
}

/// Robot position and heading at a tick. `yaw` is in degrees,
/// counter-clockwise from +X.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub time: Tick,
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

/// A persistent map entity, keyed by object id, with world-frame coordinates
/// refined by averaging on every repeat sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: String,
    pub description: String,
    pub coordinates: Vec<CloudPoint>,
}

/// Lifecycle flag of a sensor operator.
///
/// `Up → Down` on data exhaustion, `Up → Error` on encountering an
/// [`ERROR_ID`] datum. A terminal operator stops emitting events but keeps
/// draining broadcasts until the clock shuts the system down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Up,
    Down,
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Up => write!(f, "UP"),
            Status::Down => write!(f, "DOWN"),
            Status::Error => write!(f, "ERROR"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Message alphabet
// ────────────────────────────────────────────────────────────────────────────

/// Identity of a posted event, used to look up its promise on completion.
pub type EventId = Uuid;

/// A message delivered to exactly one subscriber of its kind, selected
/// round-robin by the bus. The sender receives a promise that the consumer
/// may resolve through `complete`.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: EventId,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    /// Camera frame handed to a lidar worker for point-cloud matching.
    DetectObjects {
        frame: StampedDetection,
        sender: String,
    },
    /// The same camera frame, copied to fusion for crash snapshotting only.
    DetectObjectsForFusion {
        frame: StampedDetection,
        sender: String,
    },
    /// A lidar worker's batch of matched objects, bound for fusion.
    TrackedObjects {
        batch: Vec<TrackedObject>,
        sender: String,
    },
    /// The pose recorded at `tick`, bound for fusion.
    RobotPose { tick: Tick, pose: Pose },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::DetectObjects { .. } => EventKind::DetectObjects,
            EventPayload::DetectObjectsForFusion { .. } => EventKind::DetectObjectsForFusion,
            EventPayload::TrackedObjects { .. } => EventKind::TrackedObjects,
            EventPayload::RobotPose { .. } => EventKind::RobotPose,
        }
    }
}

/// Discriminant of [`EventPayload`], the key subscriptions are declared under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DetectObjects,
    DetectObjectsForFusion,
    TrackedObjects,
    RobotPose,
}

/// A message fanned out to every subscriber of its kind.
#[derive(Debug, Clone)]
pub enum Broadcast {
    /// One step of simulation time.
    Tick { tick: Tick },
    /// `sender` has finished on its own terms (data exhausted, or the clock
    /// announcing system-wide shutdown).
    Terminated { sender: String },
    /// `sender` relays a fault first raised by `error_maker`.
    Crashed {
        sender: String,
        error_maker: String,
        message: String,
    },
}

impl Broadcast {
    pub fn kind(&self) -> BroadcastKind {
        match self {
            Broadcast::Tick { .. } => BroadcastKind::Tick,
            Broadcast::Terminated { .. } => BroadcastKind::Terminated,
            Broadcast::Crashed { .. } => BroadcastKind::Crashed,
        }
    }
}

/// Discriminant of [`Broadcast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcastKind {
    Tick,
    Terminated,
    Crashed,
}

// ────────────────────────────────────────────────────────────────────────────
// Statistics
// ────────────────────────────────────────────────────────────────────────────

/// Process-wide running counters, incremented concurrently by the operators
/// and read once by whoever writes the terminal output.
///
/// All counters are monotonically non-decreasing.
#[derive(Debug, Default)]
pub struct Statistics {
    ticks: AtomicU64,
    detected: AtomicU64,
    tracked: AtomicU64,
    landmarks: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_detected(&self, count: u64) {
        self.detected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_tracked(&self, count: u64) {
        self.tracked.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_landmark(&self) {
        self.landmarks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            detected: self.detected.load(Ordering::Relaxed),
            tracked: self.tracked.load(Ordering::Relaxed),
            landmarks: self.landmarks.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub ticks: u64,
    pub detected: u64,
    pub tracked: u64,
    pub landmarks: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// Terminal outputs
// ────────────────────────────────────────────────────────────────────────────

/// What a finished run produced: either the normal map summary or the crash
/// snapshot latched when a sensor reported a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Crashed(CrashReport),
}

/// The normal-termination record, serialized to `output_file.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub system_runtime: u64,
    pub num_detected_objects: u64,
    pub num_tracked_objects: u64,
    pub num_landmarks: u64,
    pub landmarks: Vec<Landmark>,
}

/// The crash snapshot, serialized to `error_output.json`.
///
/// `system_runtime` here is the tick at which the fault surfaced, not the
/// statistics counter; the frame maps hold each sensor's last emission so the
/// moment of failure can be reconstructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashReport {
    pub error: String,
    pub faulty_sensor: String,
    pub last_cameras_frame: BTreeMap<String, StampedDetection>,
    #[serde(rename = "lastLiDarWorkerTrackersFrame")]
    pub last_lidar_frames: BTreeMap<String, Vec<TrackedObject>>,
    pub poses: Vec<Pose>,
    pub system_runtime: u64,
    pub num_detected_objects: u64,
    pub num_tracked_objects: u64,
    pub num_landmarks: u64,
    pub landmarks: Vec<Landmark>,
}

// ────────────────────────────────────────────────────────────────────────────
// Error type
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error covering startup and runtime failures.
#[derive(Error, Debug)]
pub enum FuseError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("runtime error: {0}")]
    Runtime(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
