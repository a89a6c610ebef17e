//! Variance-of-Laplacian sharpness estimation on a face crop.
//!
//! A confident detection of a motion-blurred face still yields an
//! unreliable embedding, so the gate measures focus directly: crop the
//! face, downsample, and compute the variance of a discrete Laplacian
//! over the luminance plane. Low variance means few edges survived —
//! the crop is blurry.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::types::{BoundingBox, Frame};

/// Longest side of the downsampled working crop.
const WORK_TARGET: u32 = 96;
/// Minimum working-crop dimension per side.
const WORK_MIN: u32 = 24;

/// Luminance weights (BT.709).
const LUMA_R: f32 = 0.2126;
const LUMA_G: f32 = 0.7152;
const LUMA_B: f32 = 0.0722;

/// Estimate the blur variance of `bbox` within `frame`.
///
/// Returns `None` when the metric is not measurable: the crop is
/// degenerate after clamping to frame bounds, the frame buffer is
/// malformed, or no finite Laplacian samples remain. Callers treat
/// `None` as "skip the check", not as a failure.
pub fn blur_variance(frame: &Frame, bbox: &BoundingBox) -> Option<f32> {
    let fw = frame.width as i64;
    let fh = frame.height as i64;

    // Clamp the crop to the frame bounds.
    let x = (bbox.x.floor() as i64).max(0);
    let y = (bbox.y.floor() as i64).max(0);
    let w = (bbox.width.floor() as i64).min(fw - x);
    let h = (bbox.height.floor() as i64).min(fh - y);
    if w <= 0 || h <= 0 {
        return None;
    }

    let image = frame.to_rgb_image()?;
    let crop = imageops::crop_imm(&image, x as u32, y as u32, w as u32, h as u32).to_image();

    // Downsample, aspect-preserving: longest side WORK_TARGET, at least
    // WORK_MIN per side.
    let scale = WORK_TARGET as f32 / (w.max(h) as f32);
    let dw = ((w as f32 * scale).floor() as u32).max(WORK_MIN);
    let dh = ((h as f32 * scale).floor() as u32).max(WORK_MIN);
    let small = imageops::resize(&crop, dw, dh, FilterType::Triangle);

    laplacian_variance(&small)
}

/// Population variance of the 4-neighbor Laplacian over the luminance
/// plane, interior pixels only. Non-finite responses are ignored.
fn laplacian_variance(image: &RgbImage) -> Option<f32> {
    let w = image.width() as usize;
    let h = image.height() as usize;
    if w < 3 || h < 3 {
        return None;
    }

    let mut gray = vec![0.0f32; w * h];
    for (i, pixel) in image.pixels().enumerate() {
        gray[i] = LUMA_R * pixel[0] as f32 + LUMA_G * pixel[1] as f32 + LUMA_B * pixel[2] as f32;
    }

    let mut lap = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let v = 4.0 * gray[i] - gray[i - 1] - gray[i + 1] - gray[i - w] - gray[i + w];
            if v.is_finite() {
                lap.push(v);
            }
        }
    }
    if lap.is_empty() {
        return None;
    }

    let n = lap.len() as f32;
    let mean = lap.iter().sum::<f32>() / n;
    let variance = lap.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    Some(variance)
}
