//! Planar homography estimation
//!
//! Implements the Direct Linear Transform (DLT) used by the calibration
//! estimator. Exactly four correspondences are solved as an 8x8 linear system;
//! more than four are fitted in the least-squares sense through the SVD of the
//! stacked 2N x 9 DLT matrix. Both paths run on Hartley-normalized points.

use nalgebra::{DMatrix, Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of correspondences for a planar homography
pub const MIN_CORRESPONDENCES: usize = 4;

/// Normalized triangle area below which three points count as collinear
const COLLINEAR_EPS: f64 = 1e-6;

/// Pivot magnitude below which the 8x8 system is treated as singular
const PIVOT_EPS: f64 = 1e-10;

/// Ratio of the two smallest DLT singular values that flags a rank-deficient fit
const RANK_EPS: f64 = 1e-9;

/// A 2D point
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Convert pixel coordinates to normalized texture coordinates
    pub fn to_texture(&self, width: u32, height: u32) -> Self {
        Self {
            x: self.x / width as f64,
            y: self.y / height as f64,
        }
    }

    /// Convert normalized texture coordinates back to pixels
    pub fn to_pixels(&self, width: u32, height: u32) -> Self {
        Self {
            x: self.x * width as f64,
            y: self.y * height as f64,
        }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Why a set of correspondences could not produce a homography
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EstimateError {
    #[error("got {0} correspondences, need at least 4")]
    TooFewPoints(usize),
    #[error("{0}")]
    Degenerate(String),
}

/// 3x3 projective transform.
///
/// Serialized as three row arrays, `[[h00, h01, h02], [h10, h11, h12], [h20, h21, h22]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct HomographyMatrix {
    m: Matrix3<f64>,
}

impl From<[[f64; 3]; 3]> for HomographyMatrix {
    fn from(rows: [[f64; 3]; 3]) -> Self {
        Self::from_rows(rows)
    }
}

impl From<HomographyMatrix> for [[f64; 3]; 3] {
    fn from(h: HomographyMatrix) -> Self {
        h.to_rows()
    }
}

impl Default for HomographyMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl HomographyMatrix {
    pub fn identity() -> Self {
        Self { m: Matrix3::identity() }
    }

    pub fn new(m: Matrix3<f64>) -> Self {
        Self { m }
    }

    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Self {
            m: Matrix3::new(
                rows[0][0], rows[0][1], rows[0][2],
                rows[1][0], rows[1][1], rows[1][2],
                rows[2][0], rows[2][1], rows[2][2],
            ),
        }
    }

    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        let m = &self.m;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.m
    }

    /// Coefficient at (row, col)
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.m[(row, col)]
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().all(|v| v.is_finite())
    }

    /// Homogeneous product `H * (x, y, 1)`
    #[inline]
    pub fn apply_homogeneous(&self, p: Point) -> Vector3<f64> {
        self.m * Vector3::new(p.x, p.y, 1.0)
    }

    /// Map a point through the transform; `None` when it lands at infinity
    pub fn apply(&self, p: Point) -> Option<Point> {
        let v = self.apply_homogeneous(p);
        if v.z.abs() < 1e-12 || !v.z.is_finite() {
            return None;
        }
        Some(Point::new(v.x / v.z, v.y / v.z))
    }

    pub fn inverse(&self) -> Option<Self> {
        self.m.try_inverse().map(|m| Self { m }.normalized())
    }

    /// Scale so the bottom-right coefficient is 1 (falls back to unit Frobenius norm)
    pub fn normalized(&self) -> Self {
        let s = self.m[(2, 2)];
        if s.abs() > 1e-12 {
            Self { m: self.m / s }
        } else {
            let n = self.m.norm();
            if n > 0.0 {
                Self { m: self.m / n }
            } else {
                *self
            }
        }
    }

    /// Composition `self * other` (apply `other` first)
    pub fn compose(&self, other: &HomographyMatrix) -> Self {
        Self { m: self.m * other.m }
    }

    /// Pixel <-> texture scaling for an image of the given size
    pub fn texture_scale(width: u32, height: u32) -> Self {
        Self {
            m: Matrix3::new(
                width as f64, 0.0, 0.0,
                0.0, height as f64, 0.0,
                0.0, 0.0, 1.0,
            ),
        }
    }

    /// Estimate H such that `dst ~ H * src` from point correspondences
    pub fn estimate(src: &[Point], dst: &[Point]) -> Result<Self, EstimateError> {
        let n = src.len().min(dst.len());
        if src.len() != dst.len() {
            return Err(EstimateError::Degenerate(format!(
                "mismatched correspondence sets ({} source, {} destination)",
                src.len(),
                dst.len()
            )));
        }
        if n < MIN_CORRESPONDENCES {
            return Err(EstimateError::TooFewPoints(n));
        }

        let (src_n, t_src) = normalize_points(src)?;
        let (dst_n, t_dst) = normalize_points(dst)?;

        if n == MIN_CORRESPONDENCES {
            check_no_three_collinear(&src_n, "source")?;
            check_no_three_collinear(&dst_n, "destination")?;
        } else {
            check_spread(&src_n, "source")?;
            check_spread(&dst_n, "destination")?;
        }

        let hn = if n == MIN_CORRESPONDENCES {
            solve_four_point(&src_n, &dst_n)?
        } else {
            solve_least_squares(&src_n, &dst_n)?
        };

        // H = T_dst^-1 * Hn * T_src
        let t_dst_inv = t_dst
            .try_inverse()
            .ok_or_else(|| EstimateError::Degenerate("destination normalization is singular".into()))?;
        let h = Self { m: t_dst_inv * hn * t_src }.normalized();

        if !h.is_finite() {
            return Err(EstimateError::Degenerate("homography has non-finite coefficients".into()));
        }
        if h.m.try_inverse().is_none() {
            return Err(EstimateError::Degenerate("homography is not invertible".into()));
        }
        Ok(h)
    }

    /// RMS and max reprojection error of `src -> dst` correspondences
    pub fn reprojection_error(&self, src: &[Point], dst: &[Point]) -> (f64, f64) {
        let mut sum_sq = 0.0;
        let mut max = 0.0f64;
        let mut count = 0usize;
        for (s, d) in src.iter().zip(dst) {
            let err = match self.apply(*s) {
                Some(p) => p.distance(d),
                None => f64::INFINITY,
            };
            sum_sq += err * err;
            max = max.max(err);
            count += 1;
        }
        if count == 0 {
            return (0.0, 0.0);
        }
        ((sum_sq / count as f64).sqrt(), max)
    }
}

/// Hartley normalization: centroid to origin, mean distance sqrt(2)
fn normalize_points(pts: &[Point]) -> Result<(Vec<Point>, Matrix3<f64>), EstimateError> {
    if pts.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(EstimateError::Degenerate("non-finite point coordinates".into()));
    }
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    if mean_dist < 1e-12 {
        return Err(EstimateError::Degenerate("all points coincide".into()));
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = pts
        .iter()
        .map(|p| Point::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Ok((out, t))
}

fn triangle_area(a: &Point, b: &Point, c: &Point) -> f64 {
    0.5 * ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs()
}

/// A minimal 4-point set must not contain any collinear triple
fn check_no_three_collinear(pts: &[Point], which: &str) -> Result<(), EstimateError> {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    for [a, b, c] in TRIPLES {
        if triangle_area(&pts[a], &pts[b], &pts[c]) < COLLINEAR_EPS {
            return Err(EstimateError::Degenerate(format!(
                "{} points {}, {} and {} are collinear",
                which, a, b, c
            )));
        }
    }
    Ok(())
}

/// A larger set must not lie on a single line
fn check_spread(pts: &[Point], which: &str) -> Result<(), EstimateError> {
    // Points are already centered; the smaller eigenvalue of the scatter matrix
    // is zero exactly when they are collinear.
    let n = pts.len() as f64;
    let sxx = pts.iter().map(|p| p.x * p.x).sum::<f64>() / n;
    let syy = pts.iter().map(|p| p.y * p.y).sum::<f64>() / n;
    let sxy = pts.iter().map(|p| p.x * p.y).sum::<f64>() / n;
    let tr = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    let disc = ((tr * tr) / 4.0 - det).max(0.0).sqrt();
    let lambda_min = tr / 2.0 - disc;
    if lambda_min < COLLINEAR_EPS {
        return Err(EstimateError::Degenerate(format!("{} points are collinear", which)));
    }
    Ok(())
}

/// Solve the 8-DOF system for exactly four correspondences, fixing h22 = 1
fn solve_four_point(src: &[Point], dst: &[Point]) -> Result<Matrix3<f64>, EstimateError> {
    // For each correspondence (x,y) -> (x',y') we have two equations:
    // x*h0 + y*h1 + h2 - x'*x*h6 - x'*y*h7 = x'
    // x*h3 + y*h4 + h5 - y'*x*h6 - y'*y*h7 = y'
    let mut a = [[0.0f64; 8]; 8];
    let mut b = [0.0f64; 8];

    for i in 0..4 {
        let (x, y) = (src[i].x, src[i].y);
        let (xp, yp) = (dst[i].x, dst[i].y);

        a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -xp * x, -xp * y];
        b[2 * i] = xp;

        a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -yp * x, -yp * y];
        b[2 * i + 1] = yp;
    }

    let h = solve_linear_system(&mut a, &mut b)
        .ok_or_else(|| EstimateError::Degenerate("correspondence system is singular".into()))?;

    Ok(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Solve an 8x8 linear system using Gaussian elimination with partial pivoting
fn solve_linear_system(a: &mut [[f64; 8]; 8], b: &mut [f64; 8]) -> Option<[f64; 8]> {
    let n = 8;

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for row in (col + 1)..n {
            if a[row][col].abs() > max_val {
                max_val = a[row][col].abs();
                max_row = row;
            }
        }

        if max_row != col {
            a.swap(col, max_row);
            b.swap(col, max_row);
        }

        let pivot = a[col][col];
        if pivot.abs() < PIVOT_EPS {
            return None;
        }

        for row in (col + 1)..n {
            let factor = a[row][col] / pivot;
            for j in col..n {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution
    let mut x = [0.0f64; 8];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
    }

    Some(x)
}

/// Least-squares DLT: h is the right singular vector of the smallest singular value
fn solve_least_squares(src: &[Point], dst: &[Point]) -> Result<Matrix3<f64>, EstimateError> {
    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);

    for k in 0..n {
        let (x, y) = (src[k].x, src[k].y);
        let (u, v) = (dst[k].x, dst[k].y);

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| EstimateError::Degenerate("SVD did not converge".into()))?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&i, &j| {
        svd.singular_values[i]
            .partial_cmp(&svd.singular_values[j])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let smallest = order[0];
    let second = order[1];
    let largest = order[order.len() - 1];

    let s_max = svd.singular_values[largest];
    if s_max <= 0.0 || svd.singular_values[second] / s_max < RANK_EPS {
        return Err(EstimateError::Degenerate(
            "correspondences do not constrain a unique homography".into(),
        ));
    }

    let h = v_t.row(smallest);
    Ok(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]))
}
