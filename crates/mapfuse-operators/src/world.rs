//! World-frame geometry: the pose transform applied to every tracked point
//! cloud, and the averaging rule used when a landmark is sighted again.
//!
//! A [`Pose`] places the robot at `(x, y)` with heading `yaw` degrees
//! counter-clockwise from +X. A point observed in the robot's local frame is
//! rotated by the yaw about the origin and then translated by the position:
//!
//! ```text
//! x' = cos(yaw)·x − sin(yaw)·y + pose.x
//! y' = sin(yaw)·x + cos(yaw)·y + pose.y
//! ```

use mapfuse_types::{CloudPoint, Pose};

/// Transform `points` from the robot's local frame into the world frame
/// using `pose`.
pub fn to_world_frame(points: &[CloudPoint], pose: &Pose) -> Vec<CloudPoint> {
    let yaw = pose.yaw.to_radians();
    let (sin_yaw, cos_yaw) = yaw.sin_cos();

    points
        .iter()
        .map(|p| CloudPoint {
            x: cos_yaw * p.x - sin_yaw * p.y + pose.x,
            y: sin_yaw * p.x + cos_yaw * p.y + pose.y,
        })
        .collect()
}

/// Merge a repeat sighting into a landmark's coordinates.
///
/// Each new sighting is treated as an independent noisy measurement of the
/// same true position, so shared indices are averaged component-wise. When
/// the two sequences differ in length, the averaged prefix covers the shorter
/// one and the tail of the longer sequence is appended unchanged.
pub fn merge_coordinates(existing: &[CloudPoint], fresh: &[CloudPoint]) -> Vec<CloudPoint> {
    let shared = existing.len().min(fresh.len());

    let mut merged: Vec<CloudPoint> = existing[..shared]
        .iter()
        .zip(&fresh[..shared])
        .map(|(old, new)| CloudPoint {
            x: (old.x + new.x) / 2.0,
            y: (old.y + new.y) / 2.0,
        })
        .collect();

    merged.extend_from_slice(&fresh[shared..]);
    merged.extend_from_slice(&existing[shared..]);
    merged
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
