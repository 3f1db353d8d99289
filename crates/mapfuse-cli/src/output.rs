//! Terminal output files.
//!
//! A completed run writes exactly one file into the chosen directory:
//! `output_file.json` for a normal termination, `error_output.json` for a
//! handled crash. Both are pretty-printed JSON with the field names fixed by
//! the output contract (`systemRuntime`, `faultySensor`, ...).

use std::path::{Path, PathBuf};

use tracing::info;

use mapfuse_types::{FuseError, RunOutcome};

/// File name of the normal-termination summary.
pub const SUMMARY_FILE: &str = "output_file.json";

/// File name of the crash snapshot.
pub const CRASH_FILE: &str = "error_output.json";

/// Serialize `outcome` into `dir`, returning the path written.
pub fn write_outcome(outcome: &RunOutcome, dir: &Path) -> Result<PathBuf, FuseError> {
    let (name, json) = match outcome {
        RunOutcome::Completed(summary) => (SUMMARY_FILE, serde_json::to_string_pretty(summary)?),
        RunOutcome::Crashed(report) => (CRASH_FILE, serde_json::to_string_pretty(report)?),
    };

    let path = dir.join(name);
    std::fs::write(&path, json)?;
    info!(path = %path.display(), "output written");
    Ok(path)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use mapfuse_types::{CloudPoint, CrashReport, Landmark, RunSummary};

    fn summary() -> RunSummary {
        RunSummary {
            system_runtime: 12,
            num_detected_objects: 5,
            num_tracked_objects: 4,
            num_landmarks: 2,
            landmarks: vec![Landmark {
                id: "Wall_1".to_string(),
                description: "wall".to_string(),
                coordinates: vec![CloudPoint::new(1.0, 2.0)],
            }],
        }
    }

    #[test]
    fn completed_run_writes_the_summary_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let outcome = RunOutcome::Completed(summary());

        let path = write_outcome(&outcome, dir.path()).expect("write");
        assert_eq!(path.file_name().unwrap(), SUMMARY_FILE);

        let raw = std::fs::read_to_string(&path).expect("read back");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(json["systemRuntime"], 12);
        assert_eq!(json["landmarks"][0]["id"], "Wall_1");
        assert_eq!(json["landmarks"][0]["coordinates"][0]["x"], 1.0);
    }

    #[test]
    fn crashed_run_writes_the_error_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let outcome = RunOutcome::Crashed(CrashReport {
            error: "cam fault".to_string(),
            faulty_sensor: "camera1".to_string(),
            last_cameras_frame: BTreeMap::new(),
            last_lidar_frames: BTreeMap::new(),
            poses: vec![],
            system_runtime: 3,
            num_detected_objects: 1,
            num_tracked_objects: 0,
            num_landmarks: 0,
            landmarks: vec![],
        });

        let path = write_outcome(&outcome, dir.path()).expect("write");
        assert_eq!(path.file_name().unwrap(), CRASH_FILE);

        let raw = std::fs::read_to_string(&path).expect("read back");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(json["error"], "cam fault");
        assert_eq!(json["faultySensor"], "camera1");
        assert_eq!(json["systemRuntime"], 3);
    }
}
