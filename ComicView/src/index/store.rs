//! Persistent index storage
//!
//! One JSON record per archive, keyed by [`path_key`](super::path_key). The
//! record layout is:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "archive_file": "/comics/demo.zip",
//!   "archive_size": 123456,
//!   "archive_mtime": 1700000000.25,
//!   "archive_hash": "9f86d081884c7d65",
//!   "created_at": "2024-01-01T00:00:00Z",
//!   "total_pages": 3,
//!   "pages": [{ "index": 0, "filename": "page_001.jp2", ... }],
//!   "metadata": { "indexing_duration_ms": 42, "viewer_version": "1.0.0" }
//! }
//! ```
//!
//! Records that fail to parse or are internally inconsistent come back as
//! `IndexCorrupt`; the loader treats that exactly like a missing record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::fingerprint::{format_hash, parse_hash};
use super::{ArchiveFingerprint, ArchiveIndex, IndexMetadata, PageDescriptor};
use crate::utils::error::{ComicError, Result};

/// Persistence backend for archive indexes
pub trait IndexStore: Send + Sync {
    /// `Ok(None)` when no record exists, `Err(IndexCorrupt)` when one exists but is unusable
    fn read(&self, key: &str) -> Result<Option<ArchiveIndex>>;

    /// Replace the record stored under `key`
    fn write(&self, key: &str, index: &ArchiveIndex) -> Result<()>;
}

/// On-disk shape of an [`ArchiveIndex`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub version: String,
    pub archive_file: String,
    pub archive_size: u64,
    pub archive_mtime: f64,
    pub archive_hash: String,
    #[serde(default)]
    pub created_at: String,
    pub total_pages: usize,
    pub pages: Vec<PageDescriptor>,
    #[serde(default)]
    pub metadata: IndexMetadata,
}

impl IndexRecord {
    pub fn from_index(index: &ArchiveIndex) -> Self {
        Self {
            version: index.format_version.clone(),
            archive_file: index.source_path.to_string_lossy().into_owned(),
            archive_size: index.fingerprint.size,
            archive_mtime: index.fingerprint.modified,
            archive_hash: format_hash(index.fingerprint.content_hash),
            created_at: index.created_at.clone(),
            total_pages: index.pages.len(),
            pages: index.pages.clone(),
            metadata: index.metadata.clone(),
        }
    }

    /// Convert back to an index, rejecting inconsistent records
    pub fn into_index(self) -> Result<ArchiveIndex> {
        let content_hash = parse_hash(&self.archive_hash).ok_or_else(|| {
            ComicError::IndexCorrupt(format!("bad archive_hash '{}'", self.archive_hash))
        })?;

        if self.total_pages != self.pages.len() {
            return Err(ComicError::IndexCorrupt(format!(
                "total_pages is {} but {} pages are listed",
                self.total_pages,
                self.pages.len()
            )));
        }

        let index = ArchiveIndex {
            format_version: self.version,
            source_path: PathBuf::from(self.archive_file),
            fingerprint: ArchiveFingerprint {
                size: self.archive_size,
                modified: self.archive_mtime,
                content_hash,
            },
            pages: self.pages,
            created_at: self.created_at,
            metadata: self.metadata,
        };

        if !index.is_well_formed() {
            return Err(ComicError::IndexCorrupt(
                "page indexes are not 0..N-1 in order".to_string(),
            ));
        }

        Ok(index)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ComicError::IndexCorrupt(e.to_string()))
    }
}

/// JSON files in a per-user cache directory
#[derive(Debug, Clone)]
pub struct DiskIndexStore {
    dir: PathBuf,
}

impl DiskIndexStore {
    /// Use `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            ComicError::IndexPersistence(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl IndexStore for DiskIndexStore {
    fn read(&self, key: &str) -> Result<Option<ArchiveIndex>> {
        let path = self.record_path(key);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ComicError::IndexCorrupt(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        IndexRecord::from_json(&text)?.into_index().map(Some)
    }

    fn write(&self, key: &str, index: &ArchiveIndex) -> Result<()> {
        let path = self.record_path(key);
        let tmp = self.dir.join(format!("{}.json.tmp", key));
        let persist_error =
            |e: std::io::Error| ComicError::IndexPersistence(format!("{}: {}", path.display(), e));

        let json = IndexRecord::from_index(index).to_json()?;
        std::fs::write(&tmp, json).map_err(persist_error)?;
        std::fs::rename(&tmp, &path).map_err(persist_error)?;

        tracing::debug!("Index record written: {}", path.display());
        Ok(())
    }
}

/// Process-local store; records still go through the JSON layout
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw record text, for inspection
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Overwrite raw record text
    pub fn put_raw(&self, key: &str, text: impl Into<String>) {
        self.lock().insert(key.to_string(), text.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl IndexStore for MemoryIndexStore {
    fn read(&self, key: &str) -> Result<Option<ArchiveIndex>> {
        match self.raw(key) {
            Some(text) => IndexRecord::from_json(&text)?.into_index().map(Some),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, index: &ArchiveIndex) -> Result<()> {
        let json = IndexRecord::from_index(index).to_json()?;
        self.put_raw(key, json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processor::ImageFormat;
    use crate::index::INDEX_VERSION;

    fn sample_index() -> ArchiveIndex {
        ArchiveIndex {
            format_version: INDEX_VERSION.to_string(),
            source_path: PathBuf::from("/comics/demo.zip"),
            fingerprint: ArchiveFingerprint {
                size: 4096,
                modified: 1_700_000_000.123_456,
                content_hash: 0x0123_4567_89ab_cdef,
            },
            pages: vec![
                PageDescriptor {
                    sequence_index: 0,
                    display_name: "page_001.jp2".to_string(),
                    archive_member_path: "page_001.jp2".to_string(),
                    uncompressed_size: 2000,
                    compressed_size: 1900,
                    image_format: ImageFormat::Jpeg2000,
                    pixel_width: 1988,
                    pixel_height: 3056,
                },
                PageDescriptor {
                    sequence_index: 1,
                    display_name: "page_002.jp2".to_string(),
                    archive_member_path: "page_002.jp2".to_string(),
                    uncompressed_size: 2100,
                    compressed_size: 2000,
                    image_format: ImageFormat::Unknown,
                    pixel_width: 0,
                    pixel_height: 0,
                },
            ],
            created_at: "2024-01-01T00:00:00Z".to_string(),
            metadata: IndexMetadata {
                indexing_duration_ms: 42,
                viewer_version: "1.0.0".to_string(),
            },
        }
    }

    #[test]
    fn test_record_field_names() {
        let json = IndexRecord::from_index(&sample_index()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["version"], "1.0");
        assert_eq!(value["archive_file"], "/comics/demo.zip");
        assert_eq!(value["archive_size"], 4096);
        assert_eq!(value["archive_hash"], "0123456789abcdef");
        assert_eq!(value["total_pages"], 2);
        assert_eq!(value["pages"][1]["filename"], "page_002.jp2");
        assert_eq!(value["pages"][1]["format"], "UNKNOWN");
    }

    #[test]
    fn test_disk_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskIndexStore::new(dir.path().join("cache")).unwrap();
        let index = sample_index();

        assert!(store.read("key_demo.zip").unwrap().is_none());
        store.write("key_demo.zip", &index).unwrap();
        assert!(store.record_path("key_demo.zip").exists());

        let loaded = store.read("key_demo.zip").unwrap().unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_disk_store_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskIndexStore::new(dir.path()).unwrap();
        std::fs::write(store.record_path("bad"), "{ not json").unwrap();

        assert!(matches!(store.read("bad"), Err(ComicError::IndexCorrupt(_))));
    }

    #[test]
    fn test_inconsistent_records_are_corrupt() {
        let store = MemoryIndexStore::new();
        let mut record = IndexRecord::from_index(&sample_index());
        record.total_pages = 5;
        store.put_raw("count", record.to_json().unwrap());
        assert!(matches!(store.read("count"), Err(ComicError::IndexCorrupt(_))));

        let mut record = IndexRecord::from_index(&sample_index());
        record.pages[1].sequence_index = 7;
        store.put_raw("order", record.to_json().unwrap());
        assert!(matches!(store.read("order"), Err(ComicError::IndexCorrupt(_))));

        let mut record = IndexRecord::from_index(&sample_index());
        record.archive_hash = "xyz".to_string();
        store.put_raw("hash", record.to_json().unwrap());
        assert!(matches!(store.read("hash"), Err(ComicError::IndexCorrupt(_))));
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryIndexStore::new();
        assert!(store.is_empty());
        store.write("k", &sample_index()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.read("k").unwrap().unwrap(), sample_index());
    }

    #[test]
    fn test_unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let result = DiskIndexStore::new(blocker.join("cache"));
        assert!(matches!(result, Err(ComicError::IndexPersistence(_))));
    }
}
