use crate::error::PipelineError;
use crate::metadata;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

/// Compressed, upright copy of an upload, ready to send to the recognizer.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Normalized size over upright original size; `1.0` when not resized.
    pub scale: f64,
}

/// Applies EXIF orientation, shrinks to at most `max_width` pixels wide
/// (never enlarges) and re-encodes as JPEG at `quality`.
pub fn normalize(bytes: &[u8], max_width: u32, quality: u8) -> Result<NormalizedImage, PipelineError> {
    let img = metadata::decode_upright(bytes)?;
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(PipelineError::Decode("image has no pixels".to_string()));
    }

    let (img, scale) = if width > max_width {
        let scale = f64::from(max_width) / f64::from(width);
        let new_height = ((f64::from(height) * scale).round() as u32).max(1);
        (img.resize_exact(max_width, new_height, FilterType::Triangle), scale)
    } else {
        (img, 1.0)
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut jpeg = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)))
        .map_err(|e| PipelineError::Decode(format!("Failed to encode JPEG: {}", e)))?;

    Ok(NormalizedImage {
        jpeg,
        width: rgb.width(),
        height: rgb.height(),
        scale,
    })
}
