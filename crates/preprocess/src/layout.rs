//! Conversion of the supported source layouts to packed RGB.

use common::span_debug;
use schema::{Frame, PixelLayout};
use std::borrow::Cow;

/// Repack a validated frame as tightly packed RGB (3 bytes per pixel).
///
/// RGB frames are borrowed as-is; every other layout is converted into a new
/// buffer. The caller must have checked the buffer length beforehand.
pub fn to_rgb<'a>(frame: &Frame<'a>) -> Cow<'a, [u8]> {
    let _s = span_debug!("to_rgb");

    match frame.layout {
        PixelLayout::Rgb => Cow::Borrowed(frame.pixels),
        PixelLayout::Bgr => Cow::Owned(swizzle(frame.pixels, 3, [2, 1, 0])),
        PixelLayout::Rgba => Cow::Owned(swizzle(frame.pixels, 4, [0, 1, 2])),
        PixelLayout::Bgra => Cow::Owned(swizzle(frame.pixels, 4, [2, 1, 0])),
        PixelLayout::Yuyv => Cow::Owned(yuyv_to_rgb(frame.pixels, frame.width, frame.height)),
    }
}

fn swizzle(src: &[u8], stride: usize, order: [usize; 3]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(src.len() / stride * 3);
    for px in src.chunks_exact(stride) {
        rgb.extend_from_slice(&[px[order[0]], px[order[1]], px[order[2]]]);
    }
    rgb
}

fn yuyv_to_rgb(raw: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);

    for chunk in raw.chunks_exact(4) {
        // YUYV: [Y0, U, Y1, V]
        let y0 = chunk[0] as i32;
        let u = chunk[1] as i32 - 128;
        let y1 = chunk[2] as i32;
        let v = chunk[3] as i32 - 128;

        // BT.601 fixed-point coefficients (8-bit fraction)
        // R = Y + 1.402*V  -> Y + (359*V >> 8)
        // G = Y - 0.344*U - 0.714*V -> Y - ((88*U + 183*V) >> 8)
        // B = Y + 1.772*U -> Y + (454*U >> 8)
        let rv = (359 * v) >> 8;
        let gu = (88 * u + 183 * v) >> 8;
        let bu = (454 * u) >> 8;

        for y in [y0, y1] {
            rgb.push((y + rv).clamp(0, 255) as u8);
            rgb.push((y - gu).clamp(0, 255) as u8);
            rgb.push((y + bu).clamp(0, 255) as u8);
        }
    }

    rgb
}
