//! Image format detection using magic headers (file signatures)
//!
//! ## Supported Formats
//!
//! - **JPEG 2000**: `00 00 00 0C 6A 50 20 20 0D 0A 87 0A` (JP2 signature box)
//!   or `FF 4F FF 51` (raw codestream, SOC + SIZ)
//! - **JPEG**: `FF D8 FF`
//! - **PNG**: `89 50 4E 47 0D 0A 1A 0A`
//! - **GIF**: `47 49 46 38` (GIF87a/GIF89a)
//! - **WebP**: `52 49 46 46 ... 57 45 42 50` (RIFF....WEBP)
//! - **BMP**: `42 4D`
//!
//! Anything else is `Unknown`; callers decide whether that is fatal.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// JP2 signature box (length 12, type 'jP  ', content 0D 0A 87 0A)
pub(crate) const JP2_SIGNATURE: &[u8] = &[
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

/// J2K codestream start: SOC marker followed by SIZ marker
pub(crate) const J2K_CODESTREAM: &[u8] = &[0xFF, 0x4F, 0xFF, 0x51];

/// Closed set of page image formats
///
/// Serialized in upper case (`"JPEG2000"`, `"WEBP"`, ...) in index records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageFormat {
    Jpeg2000,
    Jpeg,
    Png,
    Gif,
    WebP,
    Bmp,
    Unknown,
}

impl ImageFormat {
    /// Get format name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg2000 => "JPEG2000",
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Gif => "GIF",
            Self::WebP => "WEBP",
            Self::Bmp => "BMP",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Format implied by a member name's extension
    pub fn from_extension(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());

        match ext.as_deref() {
            Some("jp2") => Self::Jpeg2000,
            Some("jpg") | Some("jpeg") => Self::Jpeg,
            Some("png") => Self::Png,
            Some("gif") => Self::Gif,
            Some("webp") => Self::WebP,
            Some("bmp") => Self::Bmp,
            _ => Self::Unknown,
        }
    }

    /// Matching `image` crate format, `None` for formats it cannot decode
    pub(crate) fn to_image_crate(self) -> Option<image::ImageFormat> {
        match self {
            Self::Jpeg => Some(image::ImageFormat::Jpeg),
            Self::Png => Some(image::ImageFormat::Png),
            Self::Gif => Some(image::ImageFormat::Gif),
            Self::WebP => Some(image::ImageFormat::WebP),
            Self::Bmp => Some(image::ImageFormat::Bmp),
            Self::Jpeg2000 | Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Detect image format from magic bytes
///
/// JPEG 2000 is checked first since it is the dominant page format in the
/// archives this viewer targets.
pub fn detect_image_format(data: &[u8]) -> ImageFormat {
    if data.starts_with(JP2_SIGNATURE) || data.starts_with(J2K_CODESTREAM) {
        return ImageFormat::Jpeg2000;
    }

    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return ImageFormat::Jpeg;
    }

    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return ImageFormat::Png;
    }

    if data.starts_with(b"GIF8") {
        return ImageFormat::Gif;
    }

    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return ImageFormat::WebP;
    }

    if data.starts_with(b"BM") {
        return ImageFormat::Bmp;
    }

    ImageFormat::Unknown
}

/// Resolve a member's format: magic bytes win, the extension is the fallback
pub fn resolve_format(data: &[u8], name: &str) -> ImageFormat {
    match detect_image_format(data) {
        ImageFormat::Unknown => {
            let hinted = ImageFormat::from_extension(name);
            if hinted != ImageFormat::Unknown {
                tracing::debug!(
                    "No recognised signature in {}, trusting extension ({})",
                    name,
                    hinted
                );
            }
            hinted
        }
        detected => detected,
    }
}
