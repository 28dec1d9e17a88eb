//! Image handling for archive pages
//!
//! - **magic**: the closed `ImageFormat` enum and signature detection
//! - **probe**: header-only dimension probing used while indexing
//! - **decoder**: the `PageDecoder` capability used by the decode cache
//!
//! Every format flows through one of these entry points; `ImageFormat::Unknown`
//! is an explicit value rather than an error so a page with an unrecognised
//! signature can still be indexed and later attempted by content sniffing.

mod decoder;
mod magic;
mod probe;

pub use decoder::{decode_image, normalize, PageDecoder, StandardDecoder};
pub use magic::{detect_image_format, resolve_format, ImageFormat};
pub use probe::{probe_dimensions, probe_header};
