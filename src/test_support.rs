//! In-memory image fixtures shared by the unit tests.

use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), format)
        .unwrap();
    out
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

/// A JPEG with an EXIF APP1 segment carrying the orientation (IFD0) and
/// the 35mm-equivalent focal length (Exif sub-IFD).
pub fn jpeg_with_exif(
    width: u32,
    height: u32,
    orientation: Option<u16>,
    focal_length_35mm: Option<u16>,
) -> Vec<u8> {
    let body = jpeg(width, height);
    let tiff = tiff(orientation, focal_length_35mm);

    let mut out = vec![0xff, 0xd8, 0xff, 0xe1];
    out.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    // Everything after the encoder's own SOI marker.
    out.extend_from_slice(&body[2..]);
    out
}

fn tiff(orientation: Option<u16>, focal_length_35mm: Option<u16>) -> Vec<u8> {
    let ifd0_count = orientation.is_some() as u16 + focal_length_35mm.is_some() as u16;
    assert!(ifd0_count > 0, "an EXIF fixture needs at least one tag");
    let exif_ifd_offset = 8 + 2 + 12 * u32::from(ifd0_count) + 4;

    let mut tiff = vec![b'I', b'I', 0x2a, 0x00, 8, 0, 0, 0];
    tiff.extend_from_slice(&ifd0_count.to_le_bytes());
    if let Some(orientation) = orientation {
        entry(&mut tiff, 0x0112, 3, short(orientation));
    }
    if focal_length_35mm.is_some() {
        entry(&mut tiff, 0x8769, 4, exif_ifd_offset.to_le_bytes());
    }
    tiff.extend_from_slice(&0u32.to_le_bytes());

    if let Some(focal) = focal_length_35mm {
        tiff.extend_from_slice(&1u16.to_le_bytes());
        entry(&mut tiff, 0xa405, 3, short(focal));
        tiff.extend_from_slice(&0u32.to_le_bytes());
    }
    tiff
}

fn entry(out: &mut Vec<u8>, tag: u16, kind: u16, value: [u8; 4]) {
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&value);
}

fn short(value: u16) -> [u8; 4] {
    let [lo, hi] = value.to_le_bytes();
    [lo, hi, 0, 0]
}
