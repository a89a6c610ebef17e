//! Pixel format conversion — YUYV and GREY to packed RGB.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 integer math.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], with U/V shared
/// across the pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(ConvertError::BufferTooShort {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in yuyv[..expected].chunks_exact(4) {
        let u = quad[1] as i32;
        let v = quad[3] as i32;
        push_yuv_pixel(&mut rgb, quad[0] as i32, u, v);
        push_yuv_pixel(&mut rgb, quad[2] as i32, u, v);
    }
    Ok(rgb)
}

fn push_yuv_pixel(rgb: &mut Vec<u8>, y: i32, u: i32, v: i32) {
    // BT.601 limited-range coefficients, fixed-point.
    let c = 298 * (y - 16);
    let d = u - 128;
    let e = v - 128;
    let r = (c + 409 * e + 128) >> 8;
    let g = (c - 100 * d - 208 * e + 128) >> 8;
    let b = (c + 516 * d + 128) >> 8;
    rgb.push(r.clamp(0, 255) as u8);
    rgb.push(g.clamp(0, 255) as u8);
    rgb.push(b.clamp(0, 255) as u8);
}

/// Replicate an 8-bit grayscale buffer into RGB8.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let pixels = (width * height) as usize;
    if grey.len() < pixels {
        return Err(ConvertError::BufferTooShort {
            expected: pixels,
            actual: grey.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for &value in &grey[..pixels] {
        rgb.extend_from_slice(&[value, value, value]);
    }
    Ok(rgb)
}
