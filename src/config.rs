use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::driver::{TrialOptions, DEFAULT_CALIBRATION_POINTS, DEFAULT_VALIDATION_POINTS};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub calibration_points: Vec<(f64, f64)>,
    pub validation_points: Vec<(f64, f64)>,
    pub calibration_duration_secs: f64,
    pub validation_duration_secs: f64,
    pub tolerance: f64,
    pub threshold: f64,
    pub face_threshold: f64,
    pub shuffle_points: bool,
    pub show_estimate_marker: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            calibration_points: DEFAULT_CALIBRATION_POINTS.to_vec(),
            validation_points: DEFAULT_VALIDATION_POINTS.to_vec(),
            calibration_duration_secs: 3.0,
            validation_duration_secs: 2.0,
            tolerance: 200.0,
            threshold: 0.7,
            face_threshold: 0.7,
            shuffle_points: true,
            show_estimate_marker: false,
        }
    }
}

impl Config {
    /// Expand the stored settings into full trial options.
    pub fn trial_options(&self) -> TrialOptions {
        TrialOptions {
            face_threshold: self.face_threshold,
            calibration_points: self.calibration_points.iter().map(|&p| p.into()).collect(),
            validation_points: self.validation_points.iter().map(|&p| p.into()).collect(),
            calibration_duration_secs: self.calibration_duration_secs,
            validation_duration_secs: self.validation_duration_secs,
            tolerance: self.tolerance,
            threshold: self.threshold,
            shuffle_points: self.shuffle_points,
            show_estimate_marker: self.show_estimate_marker,
            ..TrialOptions::default()
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "saccade") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("saccade_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            if let Ok(cfg) = serde_json::from_slice::<Config>(&bytes) {
                return cfg;
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            calibration_points: vec![(25.0, 25.0), (75.0, 75.0)],
            validation_points: vec![(50.0, 50.0)],
            calibration_duration_secs: 5.0,
            validation_duration_secs: 4.0,
            tolerance: 150.0,
            threshold: 0.8,
            face_threshold: 0.6,
            shuffle_points: false,
            show_estimate_marker: true,
        };
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::with_path(dir.path().join("nope.json"));
        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn trial_options_carry_config_values() {
        let cfg = Config {
            tolerance: 99.0,
            threshold: 0.42,
            shuffle_points: false,
            ..Config::default()
        };
        let opts = cfg.trial_options();
        assert_eq!(opts.tolerance, 99.0);
        assert_eq!(opts.threshold, 0.42);
        assert!(!opts.shuffle_points);
        assert_eq!(opts.calibration_points.len(), 9);
        assert_eq!(opts.validation_points.len(), 9);
    }
}
