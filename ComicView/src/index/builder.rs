//! Index building and validation
//!
//! `build_index` scans the archive once; `load_or_rebuild` decides whether a
//! stored index can be reused. Size and modification time decide the common
//! case in O(1). The content hash is consulted when the caller asks for a
//! thorough check, and is always recorded for fresh builds.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::fingerprint::{resolve, stat};
use super::{
    path_key, ArchiveFingerprint, ArchiveIndex, IndexMetadata, IndexStore, PageDescriptor,
    INDEX_VERSION,
};
use crate::archive::{self, display_name, ArchiveEntry, PageArchive};
use crate::image_processor::{probe_dimensions, probe_header, resolve_format, ImageFormat};
use crate::utils::error::Result;

/// Leading bytes inflated per member for header probing
const PROBE_PREFIX: usize = 64 * 1024;

/// How much evidence `load_or_rebuild` needs before reusing a stored index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    /// Size and modification time must match
    #[default]
    Fast,
    /// Additionally, the content hash must match
    Thorough,
}

/// Build a fresh index for the archive at `path`
pub fn build_index(path: &Path) -> Result<ArchiveIndex> {
    let resolved = resolve(path)?;
    let opened = stat(&resolved)?;
    let archive = archive::open_archive(&resolved)?;
    build_from(archive.as_ref(), &resolved, opened)
}

/// Build an index from an already opened archive
///
/// `opened` is the `(size, mtime)` taken before `archive` was opened. The
/// fingerprint records those values, so an index built from a file that was
/// replaced mid-scan never matches the replacement on the fast path.
pub(crate) fn build_from(
    archive: &dyn PageArchive,
    resolved: &Path,
    opened: (u64, f64),
) -> Result<ArchiveIndex> {
    let started = Instant::now();

    let entries = archive::list_images_sorted(archive)?;
    let pages: Vec<PageDescriptor> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| describe_page(archive, i as u32, entry))
        .collect();

    let (size, modified) = opened;
    let fingerprint = ArchiveFingerprint {
        size,
        modified,
        content_hash: super::content_hash(resolved)?,
    };
    let elapsed = started.elapsed().as_millis() as u64;

    tracing::info!(
        "Indexed {} pages of {} in {}ms",
        pages.len(),
        resolved.display(),
        elapsed
    );

    Ok(ArchiveIndex {
        format_version: INDEX_VERSION.to_string(),
        source_path: resolved.to_path_buf(),
        fingerprint,
        pages,
        created_at: now_rfc3339(),
        metadata: IndexMetadata {
            indexing_duration_ms: elapsed,
            ..IndexMetadata::default()
        },
    })
}

/// Record container metadata plus format and dimensions for one member
///
/// A page whose header cannot be read is still indexed (with 0x0
/// dimensions) so one damaged image never blocks the whole archive.
fn describe_page(
    archive: &dyn PageArchive,
    sequence_index: u32,
    entry: &ArchiveEntry,
) -> PageDescriptor {
    let (image_format, (pixel_width, pixel_height)) = match probe_entry(archive, entry) {
        Ok(probed) => probed,
        Err(e) => {
            tracing::warn!("Could not read image metadata for {}: {}", entry.name, e);
            (ImageFormat::from_extension(&entry.name), (0, 0))
        }
    };

    tracing::debug!(
        "Page {}: {} {} {}x{}",
        sequence_index,
        entry.name,
        image_format,
        pixel_width,
        pixel_height
    );

    PageDescriptor {
        sequence_index,
        display_name: display_name(&entry.name),
        archive_member_path: entry.name.clone(),
        uncompressed_size: entry.size,
        compressed_size: entry.compressed_size,
        image_format,
        pixel_width,
        pixel_height,
    }
}

fn probe_entry(
    archive: &dyn PageArchive,
    entry: &ArchiveEntry,
) -> Result<(ImageFormat, (u32, u32))> {
    let prefix = archive.extract_prefix(&entry.name, PROBE_PREFIX)?;
    let format = resolve_format(&prefix, &entry.name);

    if let Some(dims) = probe_header(&prefix, format) {
        return Ok((format, dims));
    }

    // Header did not fit in the prefix (or needs a decode): use the whole member
    let data = if (prefix.len() as u64) < entry.size {
        archive.extract(&entry.name)?
    } else {
        prefix
    };
    Ok((format, probe_dimensions(&data, format)?))
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Why a stored index was not reused
#[derive(Debug, Clone, PartialEq)]
enum Staleness {
    Version,
    SourcePath,
    Metadata,
    ContentHash,
}

/// Decide whether `stored` still describes the live archive at `resolved`
fn check_fresh(
    stored: &ArchiveIndex,
    resolved: &Path,
    validation: Validation,
) -> Result<Option<Staleness>> {
    if stored.format_version != INDEX_VERSION {
        return Ok(Some(Staleness::Version));
    }
    if stored.source_path != resolved {
        return Ok(Some(Staleness::SourcePath));
    }

    let (size, modified) = stat(resolved)?;
    if !stored.fingerprint.matches_metadata(size, modified) {
        return Ok(Some(Staleness::Metadata));
    }

    if validation == Validation::Thorough
        && super::content_hash(resolved)? != stored.fingerprint.content_hash
    {
        return Ok(Some(Staleness::ContentHash));
    }

    Ok(None)
}

/// Load the stored index for `path` if it is still valid, otherwise rebuild
///
/// A rebuilt index is written back to `store`, replacing any stale record.
/// Corrupt records are treated as missing and persistence failures are only
/// logged: the returned index is usable either way.
pub fn load_or_rebuild(
    path: &Path,
    store: &dyn IndexStore,
    validation: Validation,
) -> Result<ArchiveIndex> {
    let resolved = resolve(path)?;
    let key = path_key(&resolved);

    match store.read(&key) {
        Ok(Some(stored)) => match check_fresh(&stored, &resolved, validation)? {
            None => {
                tracing::info!("Using cached index: {}", key);
                return Ok(stored);
            }
            Some(reason) => tracing::info!("Index invalid ({:?}), rebuilding", reason),
        },
        Ok(None) => tracing::debug!("No cached index for {}", resolved.display()),
        Err(e) => tracing::warn!("Corrupted index ({}), rebuilding", e),
    }

    tracing::info!("Creating index for {}...", resolved.display());
    let opened = stat(&resolved)?;
    let archive = archive::open_archive(&resolved)?;
    let index = build_from(archive.as_ref(), &resolved, opened)?;

    save_if_unchanged(store, &key, &index);
    Ok(index)
}

/// Persist `index` unless its archive changed on disk while it was built
///
/// Returns whether the record was written.
fn save_if_unchanged(store: &dyn IndexStore, key: &str, index: &ArchiveIndex) -> bool {
    match stat(&index.source_path) {
        Ok((size, modified)) if index.fingerprint.matches_metadata(size, modified) => {}
        Ok(_) => {
            tracing::warn!(
                "{} changed while it was being indexed, not saving the index",
                index.source_path.display()
            );
            return false;
        }
        Err(e) => {
            tracing::warn!("Could not save index, continuing without cache: {}", e);
            return false;
        }
    }

    match store.write(key, index) {
        Ok(()) => {
            tracing::info!(
                "Index created: {} ({}ms)",
                key,
                index.metadata.indexing_duration_ms
            );
            true
        }
        Err(e) => {
            tracing::warn!("Could not save index, continuing without cache: {}", e);
            false
        }
    }
}
