use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use crate::model::constants::{AE_CHANNELS, HEIGHT, WIDTH};
use crate::model::data::mnist::transform_inv;

/// Converts an RGB vector in [-1, 1] to an image. `chw` selects planar
/// (channel-first, as tensors are laid out) instead of interleaved input.
pub fn chw_vec_to_image(
    data: &[f32],
    height: usize,
    width: usize,
    chw: bool,
) -> Option<image::DynamicImage> {
    let expected_len = width * height * AE_CHANNELS;
    if data.len() != expected_len {
        log::error!(
            "Mismatched data length. Expected {}, got {}.",
            expected_len,
            data.len()
        );
        return None;
    }

    let plane = width * height;
    let raw_pixels: Vec<u8> = (0..expected_len)
        .map(|i| {
            let source = if chw {
                // output index i is pixel i / 3, channel i % 3
                (i % AE_CHANNELS) * plane + i / AE_CHANNELS
            } else {
                i
            };
            // Reversing the normalization: (val + 1.0) * 127.5
            let denormalized = (data[source] + 1.0) * 127.5;
            denormalized.clamp(0.0, 255.0) as u8
        })
        .collect();

    let img_buf = image::ImageBuffer::<image::Rgb<u8>, Vec<u8>>::from_raw(
        width as u32,
        height as u32,
        raw_pixels,
    )?;

    Some(image::DynamicImage::ImageRgb8(img_buf))
}

/// Converts a single digit in [0, 1] to a grayscale image.
pub fn gray_vec_to_image(data: &[f32], height: usize, width: usize) -> Option<GrayImage> {
    if data.len() != width * height {
        log::error!(
            "Mismatched data length. Expected {}, got {}.",
            width * height,
            data.len()
        );
        return None;
    }
    let raw_pixels = transform_inv(data)
        .into_iter()
        .map(|v| v.clamp(0.0, 255.0) as u8)
        .collect();
    GrayImage::from_raw(width as u32, height as u32, raw_pixels)
}

const SEPARATOR: Luma<u8> = Luma([96]);

/// Tiles 28x28 digits row by row, `cols` per row, with 1px separators.
pub fn digit_grid(digits: &[Vec<f32>], cols: usize) -> Option<GrayImage> {
    if digits.is_empty() || cols == 0 {
        return None;
    }
    let rows = digits.len().div_ceil(cols);
    let cell_w = WIDTH as u32 + 1;
    let cell_h = HEIGHT as u32 + 1;
    let grid_w = cols as u32 * cell_w + 1;
    let grid_h = rows as u32 * cell_h + 1;

    let mut grid = GrayImage::new(grid_w, grid_h);
    draw_filled_rect_mut(&mut grid, Rect::at(0, 0).of_size(grid_w, grid_h), SEPARATOR);

    for (i, digit) in digits.iter().enumerate() {
        let tile = gray_vec_to_image(digit, HEIGHT, WIDTH)?;
        let x = (i % cols) as i64 * cell_w as i64 + 1;
        let y = (i / cols) as i64 * cell_h as i64 + 1;
        image::imageops::replace(&mut grid, &tile, x, y);
    }
    Some(grid)
}
