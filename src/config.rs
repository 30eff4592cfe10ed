//! Configuration management for warpcal

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::calibration::TargetSize;
use crate::capture::PatternKind;
use crate::shader::WarpPolicy;

/// Where the calibration artifact lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Configuration root directory
    pub config_root: PathBuf,
    /// Artifact file name, relative to `config_root`
    pub artifact: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_root: PathBuf::from("config"),
            artifact: PathBuf::from("camera_calibration.json"),
        }
    }
}

impl PathsConfig {
    pub fn artifact_path(&self) -> PathBuf {
        self.config_root.join(&self.artifact)
    }
}

/// Estimator defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub pattern: PatternKind,
    /// Checkerboard inner corners per column
    pub rows: usize,
    /// Checkerboard inner corners per row
    pub cols: usize,
    pub target_width_m: f64,
    pub target_height_m: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        let target = TargetSize::default();
        Self {
            pattern: PatternKind::Manual,
            rows: 7,
            cols: 9,
            target_width_m: target.width_m,
            target_height_m: target.height_m,
        }
    }
}

impl EstimatorConfig {
    pub fn target(&self) -> TargetSize {
        TargetSize {
            width_m: self.target_width_m,
            height_m: self.target_height_m,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub warp: WarpPolicy,
}

impl Config {
    /// Load configuration from a file, falling back to defaults if it doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No configuration at {:?}, using defaults", path);
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::Rgba;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(
            config.paths.artifact_path(),
            PathBuf::from("config/camera_calibration.json")
        );
        assert_eq!(config.estimator.rows, 7);
        assert_eq!(config.estimator.cols, 9);
        assert_eq!(config.estimator.target(), TargetSize { width_m: 1.5, height_m: 1.0 });
        assert!(config.warp.clamp_uv);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("warpcal.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(created, loaded);
    }

    #[test]
    fn test_load_missing_file_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warpcal.toml");

        assert_eq!(Config::load(&path).unwrap(), Config::default());
        assert!(!path.exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warpcal.toml");
        std::fs::write(
            &path,
            r#"
[estimator]
pattern = "checkerboard"
rows = 5

[warp]
clamp_uv = false
outside_color = [1.0, 0.0, 1.0, 1.0]
"#,
        )
        .unwrap();

        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config.estimator.pattern, PatternKind::Checkerboard);
        assert_eq!(config.estimator.rows, 5);
        assert_eq!(config.estimator.cols, 9);
        assert!(!config.warp.clamp_uv);
        assert_eq!(config.warp.outside_color, Rgba::new(1.0, 0.0, 1.0, 1.0));
        assert_eq!(config.paths, PathsConfig::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warpcal.toml");
        std::fs::write(&path, "[estimator\nrows = ").unwrap();
        assert!(Config::load_or_create(&path).is_err());
    }
}
