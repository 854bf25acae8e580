use crate::error::PipelineError;
use crate::types::ImageMetadata;
use exif::{Exif, In, Tag};
use image::{DynamicImage, ImageReader};
use std::io::Cursor;

/// Reads height and 35mm-equivalent focal length from an encoded image.
///
/// The whole raster is decoded, so a valid header over a corrupt body is
/// still a decode error. EXIF orientations that rotate by 90 degrees swap
/// width and height so the result matches the upright image.
pub fn extract(bytes: &[u8]) -> Result<ImageMetadata, PipelineError> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PipelineError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| PipelineError::Decode(e.to_string()))?;
    let (width, height) = (img.width(), img.height());

    let exif = read_exif(bytes);
    let orientation = exif.as_ref().map(orientation).unwrap_or(1);
    let height_px = if swaps_axes(orientation) { width } else { height };
    if height_px == 0 {
        return Err(PipelineError::Decode("image has zero height".to_string()));
    }

    Ok(ImageMetadata {
        height_px,
        focal_length_35mm: exif.as_ref().and_then(focal_length_35mm),
    })
}

/// Decodes the image and applies its EXIF orientation.
pub fn decode_upright(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    let img = image::load_from_memory(bytes).map_err(|e| PipelineError::Decode(e.to_string()))?;
    let orientation = read_exif(bytes).as_ref().map(orientation).unwrap_or(1);
    Ok(apply_orientation(img, orientation))
}

fn read_exif(bytes: &[u8]) -> Option<Exif> {
    exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()
}

fn orientation(exif: &Exif) -> u32 {
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

fn focal_length_35mm(exif: &Exif) -> Option<f64> {
    exif.get_field(Tag::FocalLengthIn35mmFilm, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        // 0 means "unknown" in EXIF.
        .filter(|&mm| mm > 0)
        .map(f64::from)
}

fn swaps_axes(orientation: u32) -> bool {
    matches!(orientation, 5..=8)
}

fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
