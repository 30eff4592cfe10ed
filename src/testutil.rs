//! Synthetic calibration targets for tests

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use crate::homography::{HomographyMatrix, Point};

const BLACK: Luma<u8> = Luma([20]);
const WHITE: Luma<u8> = Luma([235]);

/// Axis-aligned board with `rows x cols` inner corners.
///
/// The board's outer top-left corner sits at `(ox, oy)`; inner corner
/// `(r, c)` lands at `(ox + square * (c + 1), oy + square * (r + 1))`.
pub fn render_upright_board(
    width: u32,
    height: u32,
    rows: usize,
    cols: usize,
    square: u32,
    ox: i32,
    oy: i32,
) -> GrayImage {
    let mut img = GrayImage::from_pixel(width, height, WHITE);
    for r in 0..=rows {
        for c in 0..=cols {
            if (r + c) % 2 == 0 {
                let rect = Rect::at(ox + (c as u32 * square) as i32, oy + (r as u32 * square) as i32)
                    .of_size(square, square);
                draw_filled_rect_mut(&mut img, rect, BLACK);
            }
        }
    }
    img
}

/// Board seen through `board_to_image`, where board units are squares and
/// inner corner `(r, c)` sits at board point `(c + 1, r + 1)`.
pub fn render_board(
    width: u32,
    height: u32,
    rows: usize,
    cols: usize,
    board_to_image: &HomographyMatrix,
) -> GrayImage {
    const SS: usize = 4;
    let image_to_board = board_to_image.inverse().expect("invertible board pose");
    let (bw, bh) = ((cols + 1) as f64, (rows + 1) as f64);

    GrayImage::from_fn(width, height, |x, y| {
        let mut acc = 0u32;
        for sy in 0..SS {
            for sx in 0..SS {
                let p = Point::new(
                    x as f64 + (sx as f64 + 0.5) / SS as f64,
                    y as f64 + (sy as f64 + 0.5) / SS as f64,
                );
                let value = match image_to_board.apply(p) {
                    Some(b) if b.x >= 0.0 && b.x < bw && b.y >= 0.0 && b.y < bh => {
                        let parity = (b.x.floor() as i64 + b.y.floor() as i64) % 2;
                        if parity == 0 { BLACK.0[0] } else { WHITE.0[0] }
                    }
                    _ => WHITE.0[0],
                };
                acc += value as u32;
            }
        }
        Luma([(acc / (SS * SS) as u32) as u8])
    })
}
