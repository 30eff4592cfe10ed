//! Calibration estimator
//!
//! Runs once, offline: loads one still image per camera, obtains
//! correspondences through a [`PointCapture`], fits a homography per camera and
//! persists both together with the shared pixel-to-metre scale.
//!
//! The fit naturally maps source pixels to the rectified square, but the warp
//! shader samples from output to input. The persisted matrix is therefore the
//! inverse fit: rectified-normalized coordinates to source texture coordinates.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::artifact::CalibrationArtifact;
use crate::capture::{Camera, CorrespondencePoint, PointCapture, UNIT_SQUARE_CORNERS};
use crate::error::{CalibrationError, Result};
use crate::homography::{EstimateError, HomographyMatrix, Point};

/// Physical size of the calibration target (the span of the four reference corners)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetSize {
    pub width_m: f64,
    pub height_m: f64,
}

impl Default for TargetSize {
    fn default() -> Self {
        Self {
            width_m: 1.5,
            height_m: 1.0,
        }
    }
}

/// Per-camera calibration outcome
#[derive(Debug, Clone)]
pub struct CameraCalibration {
    pub camera: Camera,
    pub width: u32,
    pub height: u32,
    pub correspondences: Vec<CorrespondencePoint>,
    /// Source texture -> rectified (the direct fit)
    pub forward: HomographyMatrix,
    /// Rectified -> source texture (what the shader consumes)
    pub homography: HomographyMatrix,
    pub rms_error_px: f64,
    pub max_error_px: f64,
}

impl CameraCalibration {
    /// Rectified -> source pixels
    pub fn rectified_to_pixels(&self) -> HomographyMatrix {
        HomographyMatrix::texture_scale(self.width, self.height).compose(&self.homography)
    }

    /// The rectified unit-square corners located in the source image
    pub fn corners_px(&self) -> Option<[Point; 4]> {
        let h = self.rectified_to_pixels();
        Some([
            h.apply(UNIT_SQUARE_CORNERS[0])?,
            h.apply(UNIT_SQUARE_CORNERS[1])?,
            h.apply(UNIT_SQUARE_CORNERS[2])?,
            h.apply(UNIT_SQUARE_CORNERS[3])?,
        ])
    }
}

/// Both cameras plus the shared scale
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    pub left: CameraCalibration,
    pub right: CameraCalibration,
    pub pixel_to_meter_scale: f64,
}

impl CalibrationResult {
    pub fn artifact(&self) -> CalibrationArtifact {
        CalibrationArtifact {
            left_homography: self.left.homography,
            right_homography: self.right.homography,
            pixel_to_meter_scale: self.pixel_to_meter_scale,
        }
    }
}

/// Load a calibration still
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let img = image::open(path).map_err(|source| CalibrationError::ImageLoadError {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded {:?} ({}x{})", path, img.width(), img.height());
    Ok(img)
}

/// Fit the homography for one camera image
pub fn calibrate_camera(
    camera: Camera,
    image: &DynamicImage,
    capture: &dyn PointCapture,
) -> Result<CameraCalibration> {
    let (width, height) = (image.width(), image.height());
    let correspondences = capture.capture(camera, image)?;
    if correspondences.len() < 4 {
        return Err(CalibrationError::InsufficientCorrespondences {
            camera,
            got: correspondences.len(),
        });
    }

    let source_px: Vec<Point> = correspondences.iter().map(|c| c.source).collect();
    let source_tex: Vec<Point> = source_px.iter().map(|p| p.to_texture(width, height)).collect();
    let dest: Vec<Point> = correspondences.iter().map(|c| c.dest).collect();

    let degenerate = |reason: String| CalibrationError::DegenerateCalibration { camera, reason };

    let forward = HomographyMatrix::estimate(&source_tex, &dest).map_err(|e| match e {
        EstimateError::TooFewPoints(got) => CalibrationError::InsufficientCorrespondences { camera, got },
        EstimateError::Degenerate(reason) => degenerate(reason),
    })?;
    let homography = forward
        .inverse()
        .ok_or_else(|| degenerate("fitted homography is singular".into()))?;

    check_rectified_region(&homography).map_err(degenerate)?;

    let to_pixels = HomographyMatrix::texture_scale(width, height).compose(&homography);
    let (rms_error_px, max_error_px) = to_pixels.reprojection_error(&dest, &source_px);

    info!(
        "{} camera: homography from {} correspondences, reprojection rms {:.3}px max {:.3}px",
        camera,
        correspondences.len(),
        rms_error_px,
        max_error_px
    );

    Ok(CameraCalibration {
        camera,
        width,
        height,
        correspondences,
        forward,
        homography,
        rms_error_px,
        max_error_px,
    })
}

/// The rectified square must stay on one side of the line at infinity
fn check_rectified_region(h: &HomographyMatrix) -> std::result::Result<(), String> {
    let w: Vec<f64> = UNIT_SQUARE_CORNERS
        .iter()
        .map(|p| h.apply_homogeneous(*p).z)
        .collect();
    let max = w.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if max == 0.0 || !max.is_finite() {
        return Err("rectified square maps to infinity".into());
    }
    let same_side = w.iter().all(|v| *v / max > 1e-6) || w.iter().all(|v| *v / max < -1e-6);
    if !same_side {
        return Err("rectified square crosses the horizon of the source image".into());
    }
    Ok(())
}

/// Metres per pixel from one camera's view of the target.
///
/// Pixels per metre are taken along the top edge (against the target width)
/// and the left edge (against the target height), averaged, and inverted.
pub fn pixel_to_meter_scale(cal: &CameraCalibration, target: &TargetSize) -> Result<f64> {
    let degenerate = |reason: String| CalibrationError::DegenerateCalibration {
        camera: cal.camera,
        reason,
    };
    let [tl, tr, _, bl] = cal
        .corners_px()
        .ok_or_else(|| degenerate("target corners map to infinity".into()))?;

    let width_px = tl.distance(&tr);
    let height_px = tl.distance(&bl);
    let pixels_per_meter = (width_px / target.width_m + height_px / target.height_m) / 2.0;
    let scale = 1.0 / pixels_per_meter;

    if !scale.is_finite() || scale <= 0.0 {
        return Err(degenerate(format!(
            "cannot derive pixel scale from {:.1}x{:.1}px target of {}x{}m",
            width_px, height_px, target.width_m, target.height_m
        )));
    }
    debug!(
        "{} camera: target spans {:.1}x{:.1}px, {:.2} px/m",
        cal.camera, width_px, height_px, pixels_per_meter
    );
    Ok(scale)
}

/// Calibrates both cameras with one capture strategy
pub struct Estimator<'a> {
    capture: &'a dyn PointCapture,
    target: TargetSize,
}

impl<'a> Estimator<'a> {
    pub fn new(capture: &'a dyn PointCapture, target: TargetSize) -> Self {
        Self { capture, target }
    }

    /// Calibrate from two image files without touching the artifact
    pub fn run(&self, left_image: &Path, right_image: &Path) -> Result<CalibrationResult> {
        let left_img = load_image(left_image)?;
        let right_img = load_image(right_image)?;
        self.run_images(&left_img, &right_img)
    }

    pub fn run_images(&self, left_img: &DynamicImage, right_img: &DynamicImage) -> Result<CalibrationResult> {
        if (left_img.width(), left_img.height()) != (right_img.width(), right_img.height()) {
            debug!(
                "Camera images differ in size: left {}x{}, right {}x{}",
                left_img.width(),
                left_img.height(),
                right_img.width(),
                right_img.height()
            );
        }

        let left = calibrate_camera(Camera::Left, left_img, self.capture)?;
        let right = calibrate_camera(Camera::Right, right_img, self.capture)?;
        let pixel_to_meter_scale = pixel_to_meter_scale(&left, &self.target)?;

        info!(
            "Calibration complete: {:.2} px/m, {:.6} m/px",
            1.0 / pixel_to_meter_scale,
            pixel_to_meter_scale
        );

        let result = CalibrationResult {
            left,
            right,
            pixel_to_meter_scale,
        };
        result.artifact().validate()?;
        Ok(result)
    }

    /// Calibrate and atomically write the artifact; nothing is written on failure
    pub fn run_and_write(
        &self,
        left_image: &Path,
        right_image: &Path,
        artifact_path: &Path,
    ) -> Result<CalibrationResult> {
        let result = self.run(left_image, right_image)?;
        result.artifact().write_atomic(artifact_path)?;
        Ok(result)
    }
}
