//! Conversion of the float accumulation buffer into displayable 8-bit pixels.

use image::{Rgba, RgbaImage};

use crate::error::RenderError;
use crate::gpu::Extent;

/// Applies the optional exposure curve `1 - exp(-c * exposure)` and scales to
/// 8 bits, clamping to `[0, 255]`. NaN maps to 0.
pub fn tone_map(channel: f32, exposure: Option<f32>) -> u8 {
    let mapped = match exposure {
        Some(exposure) if exposure > 0.0 => 1.0 - (-channel * exposure).exp(),
        _ => channel,
    };
    (mapped * 255.0).clamp(0.0, 255.0) as u8
}

/// Builds an image from RGBA32F rows laid out `row_pixels` apart.
///
/// Alpha is written opaque, matching what the presentation pass outputs.
pub fn rgba_image(
    bytes: &[u8],
    extent: Extent,
    row_pixels: usize,
    exposure: Option<f32>,
) -> Result<RgbaImage, RenderError> {
    let width = extent.width as usize;
    let height = extent.height as usize;
    if width > row_pixels {
        return Err(RenderError::Readback(format!(
            "image width {width} exceeds buffer row of {row_pixels} pixels"
        )));
    }
    let needed = if height == 0 {
        0
    } else {
        ((height - 1) * row_pixels + width) * 16
    };
    if bytes.len() < needed {
        return Err(RenderError::Readback(format!(
            "expected at least {needed} bytes for a {extent} image, got {}",
            bytes.len()
        )));
    }

    let mut image = RgbaImage::new(extent.width, extent.height);
    for (y, row) in image.rows_mut().enumerate() {
        let start = y * row_pixels * 16;
        let texels = bytes[start..start + width * 16].chunks_exact(16);
        for (pixel, texel) in row.zip(texels) {
            let mut channels = texel
                .chunks_exact(4)
                .map(|lane| f32::from_le_bytes([lane[0], lane[1], lane[2], lane[3]]));
            let mut next = || tone_map(channels.next().unwrap_or(0.0), exposure);
            *pixel = Rgba([next(), next(), next(), 255]);
        }
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texel(r: f32, g: f32, b: f32) -> Vec<u8> {
        [r, g, b, 1.0]
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect()
    }

    #[test]
    fn tone_map_clamps() {
        assert_eq!(tone_map(-1.0, None), 0);
        assert_eq!(tone_map(0.5, None), 127);
        assert_eq!(tone_map(4.0, None), 255);
        assert_eq!(tone_map(f32::NAN, None), 0);
    }

    #[test]
    fn exposure_curve_compresses_highlights() {
        assert_eq!(tone_map(0.0, Some(1.0)), 0);
        // 1 - e^-1 = 0.632
        assert_eq!(tone_map(1.0, Some(1.0)), 161);
        assert_eq!(tone_map(100.0, Some(1.0)), 255);
    }

    #[test]
    fn rows_are_read_with_buffer_stride() {
        // Two visible pixels per row, four pixels per buffer row.
        let mut bytes = Vec::new();
        bytes.extend(texel(1.0, 0.0, 0.0));
        bytes.extend(texel(0.0, 1.0, 0.0));
        bytes.extend(texel(9.0, 9.0, 9.0));
        bytes.extend(texel(9.0, 9.0, 9.0));
        bytes.extend(texel(0.0, 0.0, 1.0));
        bytes.extend(texel(1.0, 1.0, 1.0));

        let image = rgba_image(&bytes, Extent::new(2, 2), 4, None).unwrap();
        assert_eq!(image.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(image.get_pixel(1, 0), &Rgba([0, 255, 0, 255]));
        assert_eq!(image.get_pixel(0, 1), &Rgba([0, 0, 255, 255]));
        assert_eq!(image.get_pixel(1, 1), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn short_buffers_are_rejected() {
        let bytes = texel(1.0, 1.0, 1.0);
        assert!(matches!(
            rgba_image(&bytes, Extent::new(2, 1), 2, None),
            Err(RenderError::Readback(_))
        ));
    }
}
