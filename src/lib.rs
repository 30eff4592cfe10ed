//! warpcal - homography calibration and perspective warp for a two-camera
//! video pipeline
//!
//! Calibration runs offline: it fits one homography per camera from
//! correspondences against a physical target and writes both, with the
//! pixel-to-metre scale, to a JSON artifact. The media runtime then loads the
//! artifact and feeds each matrix to the warp fragment program as uniforms.

pub mod artifact;
pub mod calibration;
pub mod capture;
pub mod checkerboard;
pub mod config;
pub mod error;
pub mod homography;
pub mod shader;
pub mod warp;

#[cfg(test)]
mod testutil;

pub use artifact::CalibrationArtifact;
pub use calibration::{CalibrationResult, Estimator, TargetSize};
pub use capture::{Camera, CheckerboardCapture, CorrespondencePoint, ManualCapture, PatternKind, PointCapture};
pub use error::CalibrationError;
pub use homography::{HomographyMatrix, Point};
pub use shader::{Rgba, ShaderUniformState, WarpPolicy};
pub use warp::{StereoWarp, WarpStage};
