//! Correspondence capture for calibration
//!
//! A [`PointCapture`] turns a camera image into correspondences between source
//! pixels and the rectified unit square. Two captures are provided:
//!
//! - [`ManualCapture`]: four corner clicks supplied by an external UI (or on
//!   the command line), in the order top-left, top-right, bottom-right,
//!   bottom-left
//! - [`CheckerboardCapture`]: automatic inner-corner detection
//!
//! Both report source points in continuous pixel coordinates, where pixel
//! `(i, j)` covers `[i, i + 1) x [j, j + 1)`. Clicks arrive as pixel indices
//! and are moved to the centre of the clicked pixel.

use clap::ValueEnum;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::checkerboard;
use crate::error::{CalibrationError, Result};
use crate::homography::Point;

/// Which of the two cameras
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Camera {
    Left,
    Right,
}

impl Camera {
    pub const BOTH: [Camera; 2] = [Camera::Left, Camera::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Camera::Left => "left",
            Camera::Right => "right",
        }
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How correspondences are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Four corners of the physical target, picked by a human
    #[default]
    Manual,
    /// Inner corners of a printed checkerboard
    Checkerboard,
}

/// Unit-square corners, in the fixed winding order used for manual capture
pub const UNIT_SQUARE_CORNERS: [Point; 4] = [
    Point { x: 0.0, y: 0.0 },
    Point { x: 1.0, y: 0.0 },
    Point { x: 1.0, y: 1.0 },
    Point { x: 0.0, y: 1.0 },
];

pub const CORNER_LABELS: [&str; 4] = ["Top Left", "Top Right", "Bottom Right", "Bottom Left"];

/// A source pixel matched to a point of the rectified unit square
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrespondencePoint {
    /// Source image pixel coordinates
    pub source: Point,
    /// Rectified-normalized coordinates in [0, 1]^2
    pub dest: Point,
}

impl CorrespondencePoint {
    pub fn new(source: Point, dest: Point) -> Self {
        Self { source, dest }
    }
}

/// Capability that produces correspondences for one camera image
pub trait PointCapture {
    fn capture(&self, camera: Camera, image: &DynamicImage) -> Result<Vec<CorrespondencePoint>>;
}

/// Corner clicks supplied up front, one list per camera, as pixel indices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualCapture {
    #[serde(default)]
    pub left: Vec<Point>,
    #[serde(default)]
    pub right: Vec<Point>,
}

impl ManualCapture {
    pub fn new(left: Vec<Point>, right: Vec<Point>) -> Self {
        Self { left, right }
    }

    /// Load clicks from a JSON file: `{"left": [{"x": .., "y": ..}, ..], "right": [..]}`
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read points from {:?}", path))?;
        let points: ManualCapture = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse points from {:?}", path))?;
        Ok(points)
    }

    pub fn points(&self, camera: Camera) -> &[Point] {
        match camera {
            Camera::Left => &self.left,
            Camera::Right => &self.right,
        }
    }
}

impl PointCapture for ManualCapture {
    fn capture(&self, camera: Camera, image: &DynamicImage) -> Result<Vec<CorrespondencePoint>> {
        let points = self.points(camera);
        if points.len() < UNIT_SQUARE_CORNERS.len() {
            return Err(CalibrationError::InsufficientCorrespondences {
                camera,
                got: points.len(),
            });
        }
        if points.len() > UNIT_SQUARE_CORNERS.len() {
            warn!(
                "{} camera: {} points supplied, using the first 4 as corners",
                camera,
                points.len()
            );
        }

        let (w, h) = (image.width() as f64, image.height() as f64);
        let mut out = Vec::with_capacity(4);
        for ((p, dest), label) in points.iter().zip(UNIT_SQUARE_CORNERS).zip(CORNER_LABELS) {
            if p.x < 0.0 || p.y < 0.0 || p.x > w || p.y > h {
                warn!("{} camera: {} corner ({:.1}, {:.1}) lies outside the image", camera, label, p.x, p.y);
            }
            debug!("{} camera: {} = ({:.2}, {:.2})", camera, label, p.x, p.y);
            out.push(CorrespondencePoint::new(pixel_center(*p), dest));
        }
        Ok(out)
    }
}

/// Automatic detection of a `rows x cols` inner-corner checkerboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckerboardCapture {
    pub rows: usize,
    pub cols: usize,
}

impl CheckerboardCapture {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }
}

impl PointCapture for CheckerboardCapture {
    fn capture(&self, camera: Camera, image: &DynamicImage) -> Result<Vec<CorrespondencePoint>> {
        let gray = image.to_luma8();
        let detection = checkerboard::detect(&gray, self.rows, self.cols).map_err(|e| {
            CalibrationError::PatternNotDetected {
                camera,
                rows: self.rows,
                cols: self.cols,
                reason: e.to_string(),
            }
        })?;

        if detection.transposed {
            info!(
                "{} camera: board appears as {} rows x {} cols, corners ordered by image orientation",
                camera, detection.ny, detection.nx
            );
        }
        let [tl, tr, br, bl] = detection.corners();
        info!(
            "{} camera: checkerboard found, corners TL ({:.1}, {:.1}) TR ({:.1}, {:.1}) BR ({:.1}, {:.1}) BL ({:.1}, {:.1})",
            camera, tl.x, tl.y, tr.x, tr.y, br.x, br.y, bl.x, bl.y
        );

        Ok(detection
            .rectified_pairs()
            .into_iter()
            .map(|(source, dest)| CorrespondencePoint::new(source, dest))
            .collect())
    }
}

/// Continuous coordinates of the centre of pixel index `p`
#[inline]
pub fn pixel_center(p: Point) -> Point {
    Point::new(p.x + 0.5, p.y + 0.5)
}

/// Parse `"x,y x,y x,y x,y"` (whitespace or `;` between points)
pub fn parse_points(s: &str) -> std::result::Result<Vec<Point>, String> {
    s.split(|c: char| c.is_whitespace() || c == ';')
        .filter(|t| !t.is_empty())
        .map(|pair| {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| format!("expected x,y but got {:?}", pair))?;
            let x: f64 = x.trim().parse().map_err(|_| format!("invalid x in {:?}", pair))?;
            let y: f64 = y.trim().parse().map_err(|_| format!("invalid y in {:?}", pair))?;
            Ok(Point::new(x, y))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::render_upright_board;

    fn blank(w: u32, h: u32) -> DynamicImage {
        DynamicImage::new_rgb8(w, h)
    }

    #[test]
    fn test_manual_pairs_corners_in_winding_order() {
        let capture = ManualCapture::new(
            vec![
                Point::new(10.0, 12.0),
                Point::new(600.0, 20.0),
                Point::new(590.0, 460.0),
                Point::new(15.0, 450.0),
            ],
            vec![],
        );
        let pts = capture.capture(Camera::Left, &blank(640, 480)).unwrap();
        assert_eq!(pts.len(), 4);
        assert_eq!(pts[0].dest, Point::new(0.0, 0.0));
        assert_eq!(pts[1].dest, Point::new(1.0, 0.0));
        assert_eq!(pts[2].dest, Point::new(1.0, 1.0));
        assert_eq!(pts[3].dest, Point::new(0.0, 1.0));
        assert_eq!(pts[2].source, Point::new(590.5, 460.5));
    }

    #[test]
    fn test_manual_three_points_rejected() {
        let capture = ManualCapture::new(
            vec![],
            vec![Point::new(1.0, 1.0), Point::new(5.0, 1.0), Point::new(5.0, 5.0)],
        );
        let err = capture.capture(Camera::Right, &blank(64, 64)).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::InsufficientCorrespondences { camera: Camera::Right, got: 3 }
        ));
    }

    #[test]
    fn test_checkerboard_capture_returns_full_grid() {
        let img = DynamicImage::ImageLuma8(render_upright_board(400, 320, 4, 5, 30, 100, 80));
        let pts = CheckerboardCapture::new(4, 5).capture(Camera::Left, &img).unwrap();
        assert_eq!(pts.len(), 20);
        assert_eq!(pts[0].dest, Point::new(0.0, 0.0));
        assert_eq!(pts[19].dest, Point::new(1.0, 1.0));
        assert!((pts[0].source.x - 130.0).abs() < 1.0);
        assert!((pts[0].source.y - 110.0).abs() < 1.0);
    }

    #[test]
    fn test_checkerboard_missing_is_pattern_not_detected() {
        let err = CheckerboardCapture::new(7, 9)
            .capture(Camera::Right, &blank(320, 240))
            .unwrap_err();
        assert_eq!(err.kind(), "PatternNotDetected");
        assert!(err.to_string().contains("right"));
    }

    #[test]
    fn test_parse_points() {
        let pts = parse_points("10,20 30.5,40;50,60  70,80").unwrap();
        assert_eq!(pts.len(), 4);
        assert_eq!(pts[1], Point::new(30.5, 40.0));
        assert!(parse_points("10;20").is_err());
        assert!(parse_points("a,1").is_err());
        assert_eq!(parse_points("").unwrap().len(), 0);
    }

    #[test]
    fn test_points_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.json");
        std::fs::write(
            &path,
            r#"{"left": [{"x": 1, "y": 2}, {"x": 3, "y": 4}], "right": []}"#,
        )
        .unwrap();
        let capture = ManualCapture::from_file(&path).unwrap();
        assert_eq!(capture.points(Camera::Left), &[Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
        assert!(capture.points(Camera::Right).is_empty());
    }
}
