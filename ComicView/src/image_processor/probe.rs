//! Header-only dimension probing
//!
//! Reads just enough of an image to learn its pixel size. JPEG 2000 headers
//! are parsed by hand (`ihdr` box or codestream `SIZ` marker); the other
//! formats use the `image` crate's header readers. A full decode is the
//! last resort.

use crate::utils::error::Result;
use image::ImageReader;
use std::io::Cursor;

use super::decoder::decode_image;
use super::magic::{ImageFormat, J2K_CODESTREAM};

/// Obtain `(width, height)` without decoding pixels where possible
pub fn probe_dimensions(data: &[u8], format: ImageFormat) -> Result<(u32, u32)> {
    if let Some(dims) = probe_header(data, format) {
        return Ok(dims);
    }

    tracing::debug!("Header probe failed for {} data, falling back to full decode", format);
    let img = decode_image(data, format)?;
    Ok((img.width(), img.height()))
}

/// Header-only probe; works on a truncated prefix of the image
pub fn probe_header(data: &[u8], format: ImageFormat) -> Option<(u32, u32)> {
    match format {
        ImageFormat::Jpeg2000 => jpeg2000_dimensions(data),
        other => image_crate_dimensions(data, other),
    }
}

fn image_crate_dimensions(data: &[u8], format: ImageFormat) -> Option<(u32, u32)> {
    let reader = match format.to_image_crate() {
        Some(known) => ImageReader::with_format(Cursor::new(data), known),
        None => ImageReader::new(Cursor::new(data)).with_guessed_format().ok()?,
    };
    reader.into_dimensions().ok()
}

/// Dimensions from a JP2 file or a bare J2K codestream
pub(crate) fn jpeg2000_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.starts_with(J2K_CODESTREAM) {
        return siz_dimensions(data);
    }

    let mut image_header = None;
    let mut codestream = None;
    for (kind, body) in boxes(data) {
        match &kind {
            b"jp2h" => {
                image_header = boxes(body)
                    .find(|(k, _)| k == b"ihdr")
                    .and_then(|(_, ihdr)| ihdr_dimensions(ihdr));
            }
            b"jp2c" => codestream = Some(body),
            _ => {}
        }
        if image_header.is_some() {
            break;
        }
    }

    image_header.or_else(|| codestream.and_then(siz_dimensions))
}

/// `ihdr` box body: HEIGHT(u32) WIDTH(u32) NC(u16) BPC(u8) C(u8) UnkC(u8) IPR(u8)
fn ihdr_dimensions(body: &[u8]) -> Option<(u32, u32)> {
    let height = read_u32(body, 0)?;
    let width = read_u32(body, 4)?;
    (width > 0 && height > 0).then_some((width, height))
}

/// SIZ marker segment following SOC: Lsiz Rsiz Xsiz Ysiz XOsiz YOsiz ...
fn siz_dimensions(codestream: &[u8]) -> Option<(u32, u32)> {
    if !codestream.starts_with(J2K_CODESTREAM) {
        return None;
    }
    let xsiz = read_u32(codestream, 8)?;
    let ysiz = read_u32(codestream, 12)?;
    let x_offset = read_u32(codestream, 16)?;
    let y_offset = read_u32(codestream, 20)?;

    let width = xsiz.checked_sub(x_offset)?;
    let height = ysiz.checked_sub(y_offset)?;
    (width > 0 && height > 0).then_some((width, height))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Iterator over ISO base media style boxes: `(type, body)`
fn boxes<'a>(data: &'a [u8]) -> impl Iterator<Item = ([u8; 4], &'a [u8])> + 'a {
    let mut cursor = 0usize;
    std::iter::from_fn(move || {
        let length = read_u32(data, cursor)? as usize;
        let kind: [u8; 4] = data.get(cursor + 4..cursor + 8)?.try_into().ok()?;

        let (header, total) = match length {
            // Box extends to the end of the data
            0 => (8, data.len() - cursor),
            1 => {
                let high = read_u32(data, cursor + 8)? as u64;
                let low = read_u32(data, cursor + 12)? as u64;
                (16, usize::try_from((high << 32) | low).ok()?)
            }
            n => (8, n),
        };

        if total < header {
            return None;
        }
        let end = cursor.checked_add(total)?;
        let body = data.get(cursor + header..end)?;
        cursor = end;
        Some((kind, body))
    })
}
