//! Screenshot rendering for the vision path.

use crate::config::VisionConfig;
use crate::errors::VisionError;
use crate::platforms::ScreenCapture;
use base64::{engine::general_purpose, Engine as _};
use deskpilot_decision::ScreenshotPayload;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, Rgba};
use std::io::Cursor;
use tracing::debug;

/// Scale, cap, JPEG-encode and base64 a raw capture.
///
/// Resampling only happens when the configured factor differs from 1.0 or
/// the scaled image exceeds `max_dimension`.
pub fn render(capture: &ScreenCapture, settings: &VisionConfig) -> Result<ScreenshotPayload, VisionError> {
    if !(settings.scale.is_finite() && settings.scale > 0.0) {
        return Err(VisionError::InvalidSettings(format!(
            "scale must be positive, got {}",
            settings.scale
        )));
    }
    let expected = capture.width as usize * capture.height as usize * 4;
    if capture.width == 0 || capture.height == 0 || capture.rgba.len() != expected {
        return Err(VisionError::InvalidSettings(format!(
            "capture is {}x{} with {} bytes",
            capture.width,
            capture.height,
            capture.rgba.len()
        )));
    }

    let (target_w, target_h) = target_size(capture.width, capture.height, settings);

    let (width, height, rgba) = if (target_w, target_h) != (capture.width, capture.height) {
        let img = ImageBuffer::<Rgba<u8>, _>::from_raw(
            capture.width,
            capture.height,
            capture.rgba.as_slice(),
        )
        .ok_or_else(|| VisionError::InvalidSettings("capture buffer size mismatch".into()))?;
        let resized = image::imageops::resize(&img, target_w, target_h, FilterType::Lanczos3);
        (target_w, target_h, resized.into_raw())
    } else {
        (capture.width, capture.height, capture.rgba.clone())
    };

    // JPEG has no alpha channel.
    let rgb: Vec<u8> = rgba
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(Cursor::new(&mut jpeg), settings.jpeg_quality)
        .write_image(&rgb, width, height, ExtendedColorType::Rgb8)?;

    debug!(
        "[vision] {}x{} -> {}x{}, {} bytes jpeg (quality {})",
        capture.width,
        capture.height,
        width,
        height,
        jpeg.len(),
        settings.jpeg_quality
    );

    Ok(ScreenshotPayload {
        mime_type: "image/jpeg".to_string(),
        base64: general_purpose::STANDARD.encode(&jpeg),
        width,
        height,
    })
}

fn target_size(width: u32, height: u32, settings: &VisionConfig) -> (u32, u32) {
    let mut scale = if (settings.scale - 1.0).abs() > f32::EPSILON {
        settings.scale
    } else {
        1.0
    };
    let longest = width.max(height) as f32 * scale;
    if longest > settings.max_dimension as f32 {
        scale *= settings.max_dimension as f32 / longest;
    }
    if scale == 1.0 {
        return (width, height);
    }
    (
        ((width as f32 * scale).round() as u32).max(1),
        ((height as f32 * scale).round() as u32).max(1),
    )
}
