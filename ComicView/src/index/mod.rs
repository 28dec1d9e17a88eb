//! Archive page index
//!
//! An [`ArchiveIndex`] is the ordered, validated list of pages of one archive
//! together with the fingerprint of the file it was built from. It is built
//! once, persisted through an [`IndexStore`], and reused on later opens for
//! as long as the fingerprint still matches the file on disk.
//!
//! Indexes are values: a changed archive produces a fresh index that
//! replaces the stored one, nothing is patched in place.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::image_processor::ImageFormat;

mod builder;
mod fingerprint;
mod store;

pub use builder::{build_index, load_or_rebuild, Validation};
pub use fingerprint::{
    content_hash, format_hash, parse_hash, path_hash, path_key, ArchiveFingerprint,
};
pub(crate) use fingerprint::resolve;
pub use store::{DiskIndexStore, IndexRecord, IndexStore, MemoryIndexStore};

/// Version tag written into every record; records with another tag are rebuilt
pub const INDEX_VERSION: &str = "1.0";

/// Metadata for one page image
///
/// Field names follow the persisted record layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// 0-based position in natural order
    #[serde(rename = "index")]
    pub sequence_index: u32,
    /// Leaf file name
    #[serde(rename = "filename")]
    pub display_name: String,
    /// Full member path inside the archive
    #[serde(rename = "archive_path")]
    pub archive_member_path: String,
    #[serde(rename = "size")]
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    #[serde(rename = "format")]
    pub image_format: ImageFormat,
    #[serde(rename = "width")]
    pub pixel_width: u32,
    #[serde(rename = "height")]
    pub pixel_height: u32,
}

/// Bookkeeping about how an index was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub indexing_duration_ms: u64,
    pub viewer_version: String,
}

impl Default for IndexMetadata {
    fn default() -> Self {
        Self {
            indexing_duration_ms: 0,
            viewer_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Ordered page list of one archive plus the fingerprint it was built against
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveIndex {
    pub format_version: String,
    /// Resolved (absolute) archive path
    pub source_path: PathBuf,
    pub fingerprint: ArchiveFingerprint,
    pub pages: Vec<PageDescriptor>,
    /// RFC 3339 UTC timestamp of the build
    pub created_at: String,
    pub metadata: IndexMetadata,
}

impl ArchiveIndex {
    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&PageDescriptor> {
        self.pages.get(index)
    }

    /// Check that sequence indexes run 0..N-1 in order
    pub fn is_well_formed(&self) -> bool {
        self.pages
            .iter()
            .enumerate()
            .all(|(i, page)| page.sequence_index as usize == i)
    }
}
