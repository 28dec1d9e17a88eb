use crate::utils::error::Result;
///! Archive reading
///!
///! Lists image members of a ZIP/CBZ container and extracts single members
///! fully in memory (no temporary files).
use std::path::Path;
use std::sync::Arc;

pub mod natural;
mod utils;
mod zip;

pub use utils::{
    display_name, is_image_file, is_safe_member_path, IMAGE_EXTENSIONS, MAX_ENTRY_SIZE,
};
pub use zip::ZipArchive;

/// An image member as recorded in the container's directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Full path inside the archive
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
}

/// Read access to the page images of one archive
///
/// Implementations must be shareable between the foreground caller and the
/// preload workers. Serializing container access internally is fine.
pub trait PageArchive: Send + Sync {
    /// Image members in container order (unsafe paths and directories removed)
    ///
    /// Fails with `NoImagesFound` when nothing survives the filter.
    fn list_images(&self) -> Result<Vec<ArchiveEntry>>;

    /// Extract one member's raw bytes into memory
    fn extract(&self, member: &str) -> Result<Vec<u8>>;

    /// Extract at most `limit` leading bytes of a member (enough for header probing)
    fn extract_prefix(&self, member: &str, limit: usize) -> Result<Vec<u8>> {
        let mut data = self.extract(member)?;
        data.truncate(limit);
        Ok(data)
    }

    /// Path of the archive file on disk
    fn path(&self) -> &Path;
}

/// Open an archive from a file path
///
/// Only ZIP containers are supported; the extension is not consulted, so
/// `.cbz`, `.zip` and misnamed files all go through the ZIP reader.
pub fn open_archive(path: &Path) -> Result<Arc<dyn PageArchive>> {
    Ok(Arc::new(ZipArchive::open(path)?))
}

/// Image members sorted by natural order of their archive path
pub fn list_images_sorted(archive: &dyn PageArchive) -> Result<Vec<ArchiveEntry>> {
    let mut entries = archive.list_images()?;
    entries.sort_by(|a, b| natural::compare(&a.name, &b.name));
    Ok(entries)
}
