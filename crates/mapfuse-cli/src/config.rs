//! Run configuration – the JSON file named on the command line.
//!
//! The recognized shape:
//!
//! ```json
//! {
//!   "TickTime": 1,
//!   "Duration": 20,
//!   "poseJsonFile": "pose_data.json",
//!   "Cameras": {
//!     "CamerasConfigurations": [{ "id": 1, "frequency": 2, "camera_key": "camera1" }],
//!     "camera_datas_path": "camera_data.json"
//!   },
//!   "LiDarWorkers": {
//!     "LidarConfigurations": [{ "id": 1, "frequency": 2 }],
//!     "lidars_data_path": "lidar_data.json"
//!   }
//! }
//! ```
//!
//! `TickTime` is the duration of one tick in seconds; `Duration` the maximum
//! tick count. Dataset paths are resolved relative to the config file's own
//! directory, so a run can be started from anywhere.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use mapfuse_types::FuseError;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    #[serde(rename = "TickTime")]
    pub tick_time: u64,
    #[serde(rename = "Duration")]
    pub duration: u64,
    #[serde(rename = "poseJsonFile")]
    pub pose_json_file: String,
    #[serde(rename = "Cameras")]
    pub cameras: CamerasConfig,
    #[serde(rename = "LiDarWorkers")]
    pub lidar_workers: LidarWorkersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CamerasConfig {
    #[serde(rename = "CamerasConfigurations")]
    pub configurations: Vec<CameraConfig>,
    pub camera_datas_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub id: u32,
    pub frequency: u64,
    pub camera_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LidarWorkersConfig {
    #[serde(rename = "LidarConfigurations")]
    pub configurations: Vec<LidarConfig>,
    pub lidars_data_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LidarConfig {
    pub id: u32,
    pub frequency: u64,
}

impl SimConfig {
    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, FuseError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FuseError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: SimConfig = serde_json::from_str(&raw)
            .map_err(|e| FuseError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FuseError> {
        if self.tick_time == 0 {
            return Err(FuseError::Config("TickTime must be positive".to_string()));
        }
        if self.duration == 0 {
            return Err(FuseError::Config("Duration must be positive".to_string()));
        }
        Ok(())
    }

    /// Resolve a dataset path against the directory the config file lives in.
    pub fn resolve(&self, config_path: &Path, dataset: &str) -> PathBuf {
        let dataset = Path::new(dataset);
        if dataset.is_absolute() {
            return dataset.to_path_buf();
        }
        match config_path.parent() {
            Some(dir) => dir.join(dataset),
            None => dataset.to_path_buf(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "TickTime": 1,
        "Duration": 20,
        "poseJsonFile": "pose_data.json",
        "Cameras": {
            "CamerasConfigurations": [
                { "id": 1, "frequency": 2, "camera_key": "camera1" }
            ],
            "camera_datas_path": "camera_data.json"
        },
        "LiDarWorkers": {
            "LidarConfigurations": [
                { "id": 1, "frequency": 2 },
                { "id": 2, "frequency": 4 }
            ],
            "lidars_data_path": "lidar_data.json"
        }
    }"#;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("configuration_file.json");
        std::fs::write(&path, contents).expect("write config");
        path
    }

    #[test]
    fn sample_config_parses() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write_config(dir.path(), SAMPLE);

        let config = SimConfig::load(&path).expect("load");
        assert_eq!(config.tick_time, 1);
        assert_eq!(config.duration, 20);
        assert_eq!(config.cameras.configurations.len(), 1);
        assert_eq!(config.cameras.configurations[0].camera_key, "camera1");
        assert_eq!(config.lidar_workers.configurations.len(), 2);
        assert_eq!(config.lidar_workers.configurations[1].frequency, 4);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = SimConfig::load(Path::new("/no/such/config.json")).unwrap_err();
        assert!(matches!(err, FuseError::Config(_)));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write_config(dir.path(), "{ not json");
        let err = SimConfig::load(&path).unwrap_err();
        assert!(matches!(err, FuseError::Config(_)));
    }

    #[test]
    fn zero_tick_time_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let contents = SAMPLE.replace("\"TickTime\": 1", "\"TickTime\": 0");
        let path = write_config(dir.path(), &contents);
        let err = SimConfig::load(&path).unwrap_err();
        assert!(matches!(err, FuseError::Config(_)));
    }

    #[test]
    fn dataset_paths_resolve_against_the_config_directory() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write_config(dir.path(), SAMPLE);
        let config = SimConfig::load(&path).expect("load");

        let resolved = config.resolve(&path, &config.pose_json_file);
        assert_eq!(resolved, dir.path().join("pose_data.json"));

        let absolute = config.resolve(&path, "/data/poses.json");
        assert_eq!(absolute, PathBuf::from("/data/poses.json"));
    }
}
