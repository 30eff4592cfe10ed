//! Checkerboard inner-corner detection
//!
//! Corner finding and grid labelling are done by `calib-targets` (ChESS
//! corners, then a graph-based chessboard detector that keeps the lattice
//! component matching the requested size). This module only turns its labelled
//! grid into an image-oriented `ny x nx` node array.
//!
//! Orientation is decided by image geometry: the grid corner minimising
//! `x + y` is top-left, and of its two grid neighbours the one with the larger
//! `x - y` is top-right. `nx` counts corners along the top edge as seen in the
//! image, so a board whose `cols` run vertically comes back `transposed`.
//!
//! Returned coordinates use the continuous pixel convention: pixel `(i, j)`
//! covers `[i, i + 1) x [j, j + 1)`.

use calib_targets::detect::{default_chess_config, detect_chessboard_from_gray_u8};
use calib_targets::ChessboardParams;
use image::GrayImage;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::homography::{HomographyMatrix, Point};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectError {
    #[error("pattern needs at least 2x2 inner corners, got {rows}x{cols}")]
    InvalidPattern { rows: usize, cols: usize },
    #[error("unusable image: {0}")]
    InvalidImage(String),
    #[error("no {rows}x{cols} corner grid found")]
    NotFound { rows: usize, cols: usize },
    #[error("found a {found_rows}x{found_cols} grid, expected {rows}x{cols}")]
    GridMismatch {
        rows: usize,
        cols: usize,
        found_rows: usize,
        found_cols: usize,
    },
    #[error("grid is incomplete: {found} of {expected} corners labelled")]
    IncompleteGrid { found: usize, expected: usize },
}

/// A verified inner-corner grid
#[derive(Debug, Clone)]
pub struct BoardDetection {
    /// Corners along the top edge as seen in the image
    pub nx: usize,
    /// Corners along the left edge as seen in the image
    pub ny: usize,
    /// Whether `rows`/`cols` had to be swapped to match the image
    pub transposed: bool,
    /// Detected corners, row-major from the top-left, `ny * nx` entries
    pub nodes: Vec<Point>,
    /// Least-squares fit from grid indices `(i, j)` to image pixels
    pub grid_to_image: HomographyMatrix,
    /// RMS distance between detected corners and the fitted grid, in pixels
    pub rms_error: f64,
}

impl BoardDetection {
    pub fn node(&self, row: usize, col: usize) -> Point {
        self.nodes[row * self.nx + col]
    }

    /// Extreme inner corners: top-left, top-right, bottom-right, bottom-left
    pub fn corners(&self) -> [Point; 4] {
        [
            self.node(0, 0),
            self.node(0, self.nx - 1),
            self.node(self.ny - 1, self.nx - 1),
            self.node(self.ny - 1, 0),
        ]
    }

    /// Each node with its position in the rectified unit square
    pub fn rectified_pairs(&self) -> Vec<(Point, Point)> {
        let sx = (self.nx - 1) as f64;
        let sy = (self.ny - 1) as f64;
        let mut pairs = Vec::with_capacity(self.nodes.len());
        for row in 0..self.ny {
            for col in 0..self.nx {
                pairs.push((self.node(row, col), Point::new(col as f64 / sx, row as f64 / sy)));
            }
        }
        pairs
    }
}

/// Detect a `rows x cols` inner-corner grid
pub fn detect(gray: &GrayImage, rows: usize, cols: usize) -> Result<BoardDetection, DetectError> {
    if rows < 2 || cols < 2 {
        return Err(DetectError::InvalidPattern { rows, cols });
    }
    let expected = rows * cols;

    let params = ChessboardParams {
        min_corners: expected,
        expected_rows: Some(rows as u32),
        expected_cols: Some(cols as u32),
        completeness_threshold: 1.0,
        ..ChessboardParams::default()
    };
    let result = detect_chessboard_from_gray_u8(
        gray.width(),
        gray.height(),
        gray.as_raw(),
        &default_chess_config(),
        params,
    )
    .map_err(|e| DetectError::InvalidImage(e.to_string()))?
    .ok_or(DetectError::NotFound { rows, cols })?;

    // Grid label -> continuous pixel position
    let labelled: Vec<((i32, i32), Point)> = result
        .detection
        .corners
        .iter()
        .filter_map(|c| {
            let g = c.grid?;
            let p = Point::new(c.position.x as f64 + 0.5, c.position.y as f64 + 0.5);
            Some(((g.i, g.j), p))
        })
        .collect();
    debug!(
        "Checkerboard: {} corners, {} with grid labels",
        result.detection.corners.len(),
        labelled.len()
    );
    if labelled.is_empty() {
        return Err(DetectError::NotFound { rows, cols });
    }

    let min_i = labelled.iter().map(|((i, _), _)| *i).min().unwrap_or(0);
    let min_j = labelled.iter().map(|((_, j), _)| *j).min().unwrap_or(0);
    let grid: HashMap<(i32, i32), Point> = labelled
        .into_iter()
        .map(|((i, j), p)| ((i - min_i, j - min_j), p))
        .collect();
    let wi = grid.keys().map(|(i, _)| *i).max().unwrap_or(0) + 1;
    let hj = grid.keys().map(|(_, j)| *j).max().unwrap_or(0) + 1;

    let dims_match = (wi as usize, hj as usize) == (cols, rows) || (wi as usize, hj as usize) == (rows, cols);
    if !dims_match {
        return Err(DetectError::GridMismatch {
            rows,
            cols,
            found_rows: hj as usize,
            found_cols: wi as usize,
        });
    }
    if grid.len() != expected {
        return Err(DetectError::IncompleteGrid {
            found: grid.len(),
            expected,
        });
    }

    orient(&grid, wi, hj, rows, cols)
}

/// Re-index the labelled grid so node `(0, 0)` is the image top-left and
/// row 0 runs along the image top edge
fn orient(
    grid: &HashMap<(i32, i32), Point>,
    wi: i32,
    hj: i32,
    rows: usize,
    cols: usize,
) -> Result<BoardDetection, DetectError> {
    let incomplete = || DetectError::IncompleteGrid {
        found: grid.len(),
        expected: rows * cols,
    };
    let at = |ij: (i32, i32)| grid.get(&ij).copied().ok_or_else(incomplete);

    // Grid corners in cyclic order
    let cyclic = [(0, 0), (wi - 1, 0), (wi - 1, hj - 1), (0, hj - 1)];
    let mut tl_k = 0;
    let mut best = f64::INFINITY;
    for (k, ij) in cyclic.iter().enumerate() {
        let p = at(*ij)?;
        if p.x + p.y < best {
            best = p.x + p.y;
            tl_k = k;
        }
    }
    let tl = cyclic[tl_k];
    let next = cyclic[(tl_k + 1) % 4];
    let prev = cyclic[(tl_k + 3) % 4];
    let (np, pp) = (at(next)?, at(prev)?);
    let (tr, bl) = if np.x - np.y >= pp.x - pp.y { (next, prev) } else { (prev, next) };

    let col_step = ((tr.0 - tl.0).signum(), (tr.1 - tl.1).signum());
    let row_step = ((bl.0 - tl.0).signum(), (bl.1 - tl.1).signum());
    let nx = ((tr.0 - tl.0).abs() + (tr.1 - tl.1).abs() + 1) as usize;
    let ny = ((bl.0 - tl.0).abs() + (bl.1 - tl.1).abs() + 1) as usize;

    let mut nodes = Vec::with_capacity(nx * ny);
    let mut indices = Vec::with_capacity(nx * ny);
    for row in 0..ny as i32 {
        for col in 0..nx as i32 {
            let ij = (
                tl.0 + col * col_step.0 + row * row_step.0,
                tl.1 + col * col_step.1 + row * row_step.1,
            );
            nodes.push(at(ij)?);
            indices.push(Point::new(col as f64, row as f64));
        }
    }

    let grid_to_image = HomographyMatrix::estimate(&indices, &nodes).map_err(|_| DetectError::NotFound { rows, cols })?;
    let (rms_error, _) = grid_to_image.reprojection_error(&indices, &nodes);
    let transposed = (nx, ny) != (cols, rows);
    debug!(
        "Checkerboard: {}x{} grid oriented (transposed: {}, rms {:.3}px)",
        ny, nx, transposed, rms_error
    );

    Ok(BoardDetection {
        nx,
        ny,
        transposed,
        nodes,
        grid_to_image,
        rms_error,
    })
}
