//! Image decoding from raw bytes
//!
//! JPEG 2000 goes through `jpeg2k` (pure Rust openjp2 backend); every other
//! format goes through the `image` crate. Decoded pages are normalised to
//! RGB8, or RGBA8 when the source carries alpha.

use crate::utils::error::{ComicError, Result};
use image::{DynamicImage, ImageReader};
use std::io::Cursor;

use super::magic::ImageFormat;

/// Byte-buffer to bitmap decode capability
///
/// The decode cache only talks to this trait, so tests and embedders can
/// swap in their own codec.
pub trait PageDecoder: Send + Sync {
    fn decode(&self, data: &[u8], format: ImageFormat) -> Result<DynamicImage>;
}

/// Default decoder backed by the `image` and `jpeg2k` crates
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDecoder;

impl PageDecoder for StandardDecoder {
    fn decode(&self, data: &[u8], format: ImageFormat) -> Result<DynamicImage> {
        decode_image(data, format).map(normalize)
    }
}

/// Decode image from raw bytes
///
/// `format` selects the codec. `Unknown` falls back to content sniffing by
/// the `image` crate.
pub fn decode_image(data: &[u8], format: ImageFormat) -> Result<DynamicImage> {
    if data.is_empty() {
        return Err(ComicError::Image("Empty image data".to_string()));
    }

    match format {
        ImageFormat::Jpeg2000 => decode_jpeg2000(data),
        other => decode_with_image_crate(data, other),
    }
}

fn decode_with_image_crate(data: &[u8], format: ImageFormat) -> Result<DynamicImage> {
    let reader = match format.to_image_crate() {
        Some(known) => ImageReader::with_format(Cursor::new(data), known),
        None => ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ComicError::Image(format!("Format detection failed: {}", e)))?,
    };

    reader
        .decode()
        .map_err(|e| ComicError::Image(format!("Failed to decode {} image: {}", format, e)))
}

#[cfg(feature = "jpeg2000")]
fn decode_jpeg2000(data: &[u8]) -> Result<DynamicImage> {
    let jp2 = jpeg2k::Image::from_bytes(data)
        .map_err(|e| ComicError::Image(format!("Failed to decode JPEG2000 image: {}", e)))?;

    DynamicImage::try_from(&jp2)
        .map_err(|e| ComicError::Image(format!("Unsupported JPEG2000 pixel layout: {}", e)))
}

#[cfg(not(feature = "jpeg2000"))]
fn decode_jpeg2000(_data: &[u8]) -> Result<DynamicImage> {
    Err(ComicError::Image(
        "JPEG2000 support not compiled in (enable the `jpeg2000` feature)".to_string(),
    ))
}

/// Collapse exotic colour types to RGB8 / RGBA8
pub fn normalize(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => img,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}
