//! Calibration artifact persistence
//!
//! The artifact is the only handoff between the estimator and the media
//! runtime:
//!
//! ```json
//! {
//!   "left_homography": [[f, f, f], [f, f, f], [f, f, f]],
//!   "right_homography": [[f, f, f], [f, f, f], [f, f, f]],
//!   "pixel_to_meter_scale": f
//! }
//! ```
//!
//! Writes go to a temporary file in the destination directory which is then
//! renamed over the final path, so readers only ever see a complete artifact.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::capture::Camera;
use crate::error::{CalibrationError, Result};
use crate::homography::HomographyMatrix;

/// Both camera homographies (rectified -> source texture) and the shared scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub left_homography: HomographyMatrix,
    pub right_homography: HomographyMatrix,
    /// Metres per source pixel at the calibration target
    pub pixel_to_meter_scale: f64,
}

impl CalibrationArtifact {
    pub fn homography(&self, camera: Camera) -> &HomographyMatrix {
        match camera {
            Camera::Left => &self.left_homography,
            Camera::Right => &self.right_homography,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for camera in Camera::BOTH {
            if !self.homography(camera).is_finite() {
                return Err(CalibrationError::InvalidArtifact(format!(
                    "{} homography has non-finite coefficients",
                    camera
                )));
            }
        }
        if !self.pixel_to_meter_scale.is_finite() || self.pixel_to_meter_scale <= 0.0 {
            return Err(CalibrationError::InvalidArtifact(format!(
                "pixel_to_meter_scale must be positive, got {}",
                self.pixel_to_meter_scale
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        // Plain arrays and floats always serialize
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Read and validate an artifact
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CalibrationError::ArtifactReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let artifact: CalibrationArtifact =
            serde_json::from_str(&content).map_err(|e| CalibrationError::ArtifactReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        artifact.validate()?;
        debug!("Loaded calibration artifact from {:?}", path);
        Ok(artifact)
    }

    /// Write the artifact to a temporary file next to `path`, without publishing it
    pub fn stage(&self, path: &Path) -> Result<StagedArtifact> {
        self.validate()?;

        let write_err = |source: std::io::Error| CalibrationError::ArtifactWriteError {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        temp.write_all(self.to_json().as_bytes()).map_err(write_err)?;
        temp.write_all(b"\n").map_err(write_err)?;
        temp.flush().map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;

        debug!("Staged calibration artifact at {:?}", temp.path());
        Ok(StagedArtifact {
            temp,
            path: path.to_path_buf(),
        })
    }

    /// Stage and publish in one step
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        self.stage(path)?.commit()
    }
}

/// A fully written artifact that has not replaced the final path yet.
///
/// Dropping it without [`StagedArtifact::commit`] removes the temporary file
/// and leaves any existing artifact untouched.
#[derive(Debug)]
pub struct StagedArtifact {
    temp: NamedTempFile,
    path: PathBuf,
}

impl StagedArtifact {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Rename the staged file over the final path
    pub fn commit(self) -> Result<()> {
        let path = self.path;
        self.temp
            .persist(&path)
            .map_err(|e| CalibrationError::ArtifactWriteError {
                path: path.clone(),
                source: e.error,
            })?;
        info!("Saved calibration artifact to {:?}", path);
        Ok(())
    }
}
