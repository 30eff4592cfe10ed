//! Error taxonomy for calibration runs and artifact handling

use std::path::PathBuf;
use thiserror::Error;

use crate::capture::Camera;

/// Every way a calibration run (or an artifact load) can fail.
///
/// All estimator failures are terminal for the run: nothing is written to the
/// artifact path once any of these has been raised.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("insufficient correspondences for {camera} camera: got {got}, need at least 4")]
    InsufficientCorrespondences { camera: Camera, got: usize },

    #[error("degenerate calibration for {camera} camera: {reason}")]
    DegenerateCalibration { camera: Camera, reason: String },

    #[error("checkerboard {rows}x{cols} not detected in {camera} image: {reason}")]
    PatternNotDetected {
        camera: Camera,
        rows: usize,
        cols: usize,
        reason: String,
    },

    #[error("failed to load image {path:?}: {source}")]
    ImageLoadError {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write calibration artifact {path:?}: {source}")]
    ArtifactWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read calibration artifact {path:?}: {reason}")]
    ArtifactReadError { path: PathBuf, reason: String },

    #[error("invalid calibration artifact: {0}")]
    InvalidArtifact(String),
}

impl CalibrationError {
    /// Stable failure-kind name, used in CLI messages
    pub fn kind(&self) -> &'static str {
        match self {
            CalibrationError::InsufficientCorrespondences { .. } => "InsufficientCorrespondences",
            CalibrationError::DegenerateCalibration { .. } => "DegenerateCalibration",
            CalibrationError::PatternNotDetected { .. } => "PatternNotDetected",
            CalibrationError::ImageLoadError { .. } => "ImageLoadError",
            CalibrationError::ArtifactWriteError { .. } => "ArtifactWriteError",
            CalibrationError::ArtifactReadError { .. } => "ArtifactReadError",
            CalibrationError::InvalidArtifact(_) => "InvalidArtifact",
        }
    }

    /// Process exit code for this failure kind (never 0)
    pub fn exit_code(&self) -> i32 {
        match self {
            CalibrationError::InsufficientCorrespondences { .. } => 2,
            CalibrationError::DegenerateCalibration { .. } => 3,
            CalibrationError::PatternNotDetected { .. } => 4,
            CalibrationError::ImageLoadError { .. } => 5,
            CalibrationError::ArtifactWriteError { .. } => 6,
            CalibrationError::ArtifactReadError { .. } => 7,
            CalibrationError::InvalidArtifact(_) => 8,
        }
    }
}

pub type Result<T, E = CalibrationError> = std::result::Result<T, E>;
