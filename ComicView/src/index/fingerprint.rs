///! Archive fingerprinting
///!
///! Size and modification time are the O(1) freshness check; the content
///! hash is the authoritative one. The hash samples the first MiB and, for
///! files larger than 2 MiB, the last MiB, so it stays cheap on multi-GB
///! archives while still catching rewritten headers and central directories.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::utils::error::{ComicError, Result};

/// Bytes hashed from each end of the archive
const HASH_CHUNK: u64 = 1024 * 1024;

/// Identity of an archive file at one point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveFingerprint {
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified: f64,
    pub content_hash: u64,
}

impl ArchiveFingerprint {
    /// Stat and hash the archive
    pub fn compute(path: &Path) -> Result<Self> {
        let (size, modified) = stat(path)?;
        Ok(Self {
            size,
            modified,
            content_hash: content_hash(path)?,
        })
    }

    /// Fast check: size and modification time only
    pub fn matches_metadata(&self, size: u64, modified: f64) -> bool {
        self.size == size && self.modified == modified
    }
}

/// `(size, mtime seconds)` of a file
pub(crate) fn stat(path: &Path) -> Result<(u64, f64)> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok((metadata.len(), modified))
}

/// 64-bit content hash of the archive file (head and tail sample)
pub fn content_hash(path: &Path) -> Result<u64> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = blake3::Hasher::new();

    let mut chunk = Vec::with_capacity(HASH_CHUNK as usize);
    (&mut file).take(HASH_CHUNK).read_to_end(&mut chunk)?;
    hasher.update(&chunk);

    if size > 2 * HASH_CHUNK {
        chunk.clear();
        file.seek(SeekFrom::End(-(HASH_CHUNK as i64)))?;
        (&mut file).take(HASH_CHUNK).read_to_end(&mut chunk)?;
        hasher.update(&chunk);
    }

    Ok(truncate(hasher.finalize()))
}

fn truncate(hash: blake3::Hash) -> u64 {
    let bytes = hash.as_bytes();
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Render a hash as 16 lowercase hex characters
pub fn format_hash(hash: u64) -> String {
    format!("{:016x}", hash)
}

/// Parse the 16-hex-character form produced by [`format_hash`]
pub fn parse_hash(text: &str) -> Option<u64> {
    if text.len() != 16 {
        return None;
    }
    u64::from_str_radix(text, 16).ok()
}

/// Stable storage key for an archive: path hash plus file name
///
/// `path` should already be resolved so that different spellings of the
/// same file share one key.
pub fn path_key(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    format!("{}_{}", path_hash(path), name)
}

/// First 16 hex characters of the BLAKE3 hash of the path text
pub fn path_hash(path: &Path) -> String {
    let hash = blake3::hash(path.to_string_lossy().as_bytes());
    hash.to_hex()[..16].to_string()
}

/// Resolve an archive path to its canonical absolute form
pub(crate) fn resolve(path: &Path) -> Result<std::path::PathBuf> {
    std::fs::canonicalize(path)
        .map_err(|e| ComicError::ArchiveUnreadable(format!("{}: {}", path.display(), e)))
}
