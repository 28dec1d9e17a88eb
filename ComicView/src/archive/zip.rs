///! ZIP/CBZ archive implementation
///!
///! Member listing and in-memory extraction using the `zip` crate
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zip::ZipArchive as ZipReader;

use super::utils::{is_image_file, is_safe_member_path, MAX_ENTRY_SIZE};
use crate::archive::{ArchiveEntry, PageArchive};
use crate::utils::error::{ComicError, Result};

/// ZIP archive handler
///
/// The underlying reader needs `&mut` for every access, so listing and
/// extraction are serialized behind a mutex. Decoding of the extracted bytes
/// happens outside the lock.
pub struct ZipArchive {
    archive: Mutex<ZipReader<BufReader<File>>>,
    path: PathBuf,
}

impl ZipArchive {
    /// Open a ZIP archive from path
    pub fn open(path: &Path) -> Result<Self> {
        tracing::debug!("Opening ZIP archive: {:?}", path);

        let file = File::open(path).map_err(|e| {
            ComicError::ArchiveUnreadable(format!("{}: {}", path.display(), e))
        })?;

        let archive = ZipReader::new(BufReader::new(file)).map_err(|e| {
            ComicError::ArchiveUnreadable(format!(
                "Invalid or corrupted ZIP file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            archive: Mutex::new(archive),
            path: path.to_path_buf(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ZipReader<BufReader<File>>> {
        // A panic mid-read leaves the reader usable; every access seeks first
        self.archive
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PageArchive for ZipArchive {
    fn list_images(&self) -> Result<Vec<ArchiveEntry>> {
        let mut archive = self.lock();
        let mut images = Vec::new();

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).map_err(|e| {
                ComicError::ArchiveUnreadable(format!("Failed to read entry {}: {}", i, e))
            })?;

            if entry.is_dir() || !is_image_file(entry.name()) {
                continue;
            }

            if !is_safe_member_path(entry.name()) {
                tracing::warn!("Skipping potentially unsafe path: {}", entry.name());
                continue;
            }

            images.push(ArchiveEntry {
                name: entry.name().to_string(),
                size: entry.size(),
                compressed_size: entry.compressed_size(),
            });
        }

        tracing::debug!(
            "ZIP listing: {} entries, {} images in {:?}",
            archive.len(),
            images.len(),
            self.path
        );

        if images.is_empty() {
            return Err(ComicError::NoImagesFound);
        }

        Ok(images)
    }

    fn extract(&self, member: &str) -> Result<Vec<u8>> {
        let extraction_error = |reason: String| ComicError::MemberExtraction {
            member: member.to_string(),
            reason,
        };

        let mut archive = self.lock();
        let mut zip_entry = archive
            .by_name(member)
            .map_err(|e| extraction_error(e.to_string()))?;

        // Guard memory before allocating (central directory size may lie, so cap the read too)
        if zip_entry.size() > MAX_ENTRY_SIZE {
            tracing::warn!(
                "Entry too large: {} is {} bytes (max {})",
                member,
                zip_entry.size(),
                MAX_ENTRY_SIZE
            );
            return Err(extraction_error(format!(
                "entry too large: {} bytes",
                zip_entry.size()
            )));
        }

        let mut buffer = Vec::with_capacity(zip_entry.size() as usize);
        (&mut zip_entry)
            .take(MAX_ENTRY_SIZE + 1)
            .read_to_end(&mut buffer)
            .map_err(|e| extraction_error(e.to_string()))?;

        if buffer.len() as u64 > MAX_ENTRY_SIZE {
            return Err(extraction_error("entry exceeds size limit".to_string()));
        }

        tracing::debug!("Extracted {} ({} bytes)", member, buffer.len());
        Ok(buffer)
    }

    fn extract_prefix(&self, member: &str, limit: usize) -> Result<Vec<u8>> {
        let mut archive = self.lock();
        let zip_entry = archive
            .by_name(member)
            .map_err(|e| ComicError::MemberExtraction {
                member: member.to_string(),
                reason: e.to_string(),
            })?;

        // Only the first `limit` bytes are inflated
        let mut buffer = Vec::with_capacity(limit.min(zip_entry.size() as usize));
        zip_entry
            .take(limit as u64)
            .read_to_end(&mut buffer)
            .map_err(|e| ComicError::MemberExtraction {
                member: member.to_string(),
                reason: e.to_string(),
            })?;

        Ok(buffer)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::{FileOptions, ZipWriter};

    fn create_test_zip_file(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default();

        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content).unwrap();
        }

        zip.finish().unwrap();
    }

    #[test]
    fn test_open_invalid_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invalid.zip");
        std::fs::write(&path, b"not a zip file").unwrap();

        let result = ZipArchive::open(&path);
        assert!(matches!(result, Err(ComicError::ArchiveUnreadable(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ZipArchive::open(&dir.path().join("missing.zip"));
        assert!(matches!(result, Err(ComicError::ArchiveUnreadable(_))));
    }

    #[test]
    fn test_list_images_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.zip");
        create_test_zip_file(
            &path,
            &[
                ("readme.txt", b"text file"),
                ("page10.jp2", b"image 10"),
                ("page2.JP2", b"image 2"),
                ("notes/info.json", b"{}"),
            ],
        );

        let archive = ZipArchive::open(&path).unwrap();
        let names: Vec<String> = archive
            .list_images()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();

        assert_eq!(names, vec!["page10.jp2", "page2.JP2"]);
    }

    #[test]
    fn test_list_images_skips_unsafe_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unsafe.zip");
        create_test_zip_file(
            &path,
            &[("../escape.jpg", b"bad"), ("ok/page1.jpg", b"good")],
        );

        let archive = ZipArchive::open(&path).unwrap();
        let entries = archive.list_images().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "ok/page1.jpg");
    }

    #[test]
    fn test_no_images_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_images.zip");
        create_test_zip_file(&path, &[("readme.txt", b"text"), ("data.json", b"{}")]);

        let archive = ZipArchive::open(&path).unwrap();
        assert!(matches!(
            archive.list_images(),
            Err(ComicError::NoImagesFound)
        ));
    }

    #[test]
    fn test_extract_entry() {
        let content = b"fake jpeg 2000 data";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extract.zip");
        create_test_zip_file(&path, &[("image.jp2", content)]);

        let archive = ZipArchive::open(&path).unwrap();
        let entries = archive.list_images().unwrap();
        assert_eq!(entries[0].size, content.len() as u64);

        let extracted = archive.extract("image.jp2").unwrap();
        assert_eq!(extracted, content);
    }

    #[test]
    fn test_extract_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefix.zip");
        create_test_zip_file(&path, &[("image.jp2", b"0123456789")]);

        let archive = ZipArchive::open(&path).unwrap();
        assert_eq!(archive.extract_prefix("image.jp2", 4).unwrap(), b"0123");
        assert_eq!(archive.extract_prefix("image.jp2", 64).unwrap(), b"0123456789");
    }

    #[test]
    fn test_extract_missing_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing_member.zip");
        create_test_zip_file(&path, &[("image.jp2", b"data")]);

        let archive = ZipArchive::open(&path).unwrap();
        let result = archive.extract("other.jp2");
        assert!(matches!(
            result,
            Err(ComicError::MemberExtraction { ref member, .. }) if member == "other.jp2"
        ));
    }
}
