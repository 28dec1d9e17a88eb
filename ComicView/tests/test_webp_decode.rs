//! Integration test for WebP pages
//! Verifies that WebP members are detected, probed and decoded end to end

use comicview::image_processor::{detect_image_format, probe_dimensions};
use comicview::{ImageFormat, PageDecoder, StandardDecoder};
use std::io::Write;

/// Minimal valid WebP file (1x1 red pixel, lossy VP8 format)
const MINIMAL_WEBP: &[u8] = &[
    0x52, 0x49, 0x46, 0x46, 0x40, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50, 0x56, 0x50, 0x38, 0x20,
    0x34, 0x00, 0x00, 0x00, 0xF0, 0x01, 0x00, 0x9D, 0x01, 0x2A, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00,
    0x1C, 0x25, 0xA0, 0x02, 0x74, 0xBA, 0x01, 0xF8, 0x00, 0x04, 0x4C, 0x00, 0x00, 0xFE, 0xF5, 0xB8,
    0x7F, 0xFE, 0x9A, 0x47, 0x8D, 0x23, 0xC6, 0x91, 0xF1, 0x70, 0xFF, 0xEE, 0x81, 0x3F, 0x74, 0x09,
    0xFB, 0xA0, 0x4F, 0xFD, 0xCD, 0xA0, 0x00, 0x00,
];

#[test]
fn test_webp_decoding() {
    assert_eq!(detect_image_format(MINIMAL_WEBP), ImageFormat::WebP);

    let result = StandardDecoder.decode(MINIMAL_WEBP, ImageFormat::WebP);
    assert!(
        result.is_ok(),
        "WebP decoding should succeed, but got: {:?}",
        result.err()
    );

    let img = result.unwrap();
    assert_eq!((img.width(), img.height()), (1, 1));
    assert!(matches!(img, image::DynamicImage::ImageRgb8(_) | image::DynamicImage::ImageRgba8(_)));
}

#[test]
fn test_webp_probe() {
    assert_eq!(probe_dimensions(MINIMAL_WEBP, ImageFormat::WebP).unwrap(), (1, 1));
}

#[test]
fn test_webp_page_in_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("webp.cbz");

    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    zip.start_file("001.webp", zip::write::FileOptions::default())
        .unwrap();
    zip.write_all(MINIMAL_WEBP).unwrap();
    zip.finish().unwrap();

    let index = comicview::build_index(&path).unwrap();
    assert_eq!(index.total_pages(), 1);
    assert_eq!(index.pages[0].image_format, ImageFormat::WebP);
    assert_eq!((index.pages[0].pixel_width, index.pages[0].pixel_height), (1, 1));
}
