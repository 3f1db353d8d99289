//! Dataset loaders: the three JSON files a run consumes.
//!
//! - Pose track: `[{ "time": 1, "x": 0.0, "y": 0.0, "yaw": 0.0 }, ...]`
//! - Camera data: `{ "<camera_key>": [{ "time": 1, "detectedObjects": [...] }], ... }`
//! - Lidar data: `[{ "id": "Wall_1", "time": 1, "cloudPoints": [[x, y, ...]] }, ...]`
//!
//! Loaders fail fast with a [`FuseError::Dataset`]; the caller reports and
//! exits before any operator is spawned.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use mapfuse_types::{FuseError, Pose, StampedCloudPoints, StampedDetection};

/// Load the time-ordered pose track.
pub fn load_poses(path: &Path) -> Result<Vec<Pose>, FuseError> {
    let poses: Vec<Pose> = parse(path)?;
    info!(path = %path.display(), poses = poses.len(), "pose track loaded");
    Ok(poses)
}

/// Load the camera datasets, keyed by `camera_key`.
pub fn load_camera_frames(
    path: &Path,
) -> Result<HashMap<String, Vec<StampedDetection>>, FuseError> {
    let frames: HashMap<String, Vec<StampedDetection>> = parse(path)?;
    info!(path = %path.display(), cameras = frames.len(), "camera data loaded");
    Ok(frames)
}

/// Load the shared lidar database records, time-ordered.
pub fn load_lidar_records(path: &Path) -> Result<Vec<StampedCloudPoints>, FuseError> {
    let records: Vec<StampedCloudPoints> = parse(path)?;
    info!(path = %path.display(), records = records.len(), "lidar data loaded");
    Ok(records)
}

fn parse<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, FuseError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| FuseError::Dataset(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| FuseError::Dataset(format!("cannot parse {}: {e}", path.display())))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
