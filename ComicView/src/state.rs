//! Reading position per archive
//!
//! Remembers the last page shown for each archive in
//! `<cache dir>/<path hash>_state.json`. A stored position is only trusted
//! while the archive's path and content hash are unchanged; everything here
//! is best-effort and never fails the caller.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::index::{content_hash, format_hash, path_hash, resolve};
use crate::utils::error::{ComicError, Result};

pub const STATE_VERSION: &str = "1.0";

/// On-disk reading position record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingState {
    pub version: String,
    pub archive_file: String,
    pub archive_hash: String,
    pub last_page: usize,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct ReadingStateStore {
    dir: PathBuf,
}

impl ReadingStateStore {
    /// Use `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            ComicError::IndexPersistence(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    /// State file for an already resolved archive path
    pub fn state_path(&self, resolved: &Path) -> PathBuf {
        self.dir.join(format!("{}_state.json", path_hash(resolved)))
    }

    /// Last page read in `archive`, if a trustworthy record exists
    pub fn load_last_page(&self, archive: &Path) -> Option<usize> {
        match self.try_load(archive) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!("Ignoring reading position for {}: {}", archive.display(), e);
                None
            }
        }
    }

    fn try_load(&self, archive: &Path) -> Result<Option<usize>> {
        let resolved = resolve(archive)?;
        let path = self.state_path(&resolved);

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: ReadingState = serde_json::from_str(&text)?;

        if state.version != STATE_VERSION || state.archive_file != resolved.to_string_lossy() {
            tracing::info!("Reading position for {} is stale", resolved.display());
            return Ok(None);
        }
        if state.archive_hash != format_hash(content_hash(&resolved)?) {
            tracing::info!("Archive modified since last read, starting at page 0");
            return Ok(None);
        }

        Ok(Some(state.last_page))
    }

    /// Remember `page` for `archive`; failures are logged
    pub fn save_last_page(&self, archive: &Path, page: usize) {
        if let Err(e) = self.try_save(archive, page) {
            tracing::warn!("Could not save reading position: {}", e);
        }
    }

    fn try_save(&self, archive: &Path, page: usize) -> Result<()> {
        let resolved = resolve(archive)?;
        let state = ReadingState {
            version: STATE_VERSION.to_string(),
            archive_file: resolved.to_string_lossy().into_owned(),
            archive_hash: format_hash(content_hash(&resolved)?),
            last_page: page,
            updated_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };

        let path = self.state_path(&resolved);
        std::fs::write(&path, serde_json::to_string_pretty(&state)?)?;
        tracing::debug!("Saved page {} for {}", page, resolved.display());
        Ok(())
    }
}
