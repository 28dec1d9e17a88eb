//! Application context and per-archive sessions
//!
//! [`ViewerContext`] owns everything that outlives one archive: configuration,
//! the index store, the decoder and the reading-position store. It is created
//! once by the application and passed to whoever needs it.
//!
//! [`ViewerContext::open_archive`] yields a [`Session`]: the validated index
//! plus a decode cache bound to that archive. Dropping the session stops its
//! preload workers.

use std::path::Path;
use std::sync::Arc;

use crate::archive;
use crate::cache::{PageBitmap, PageCache};
use crate::config::Config;
use crate::image_processor::{PageDecoder, StandardDecoder};
use crate::index::{
    load_or_rebuild, ArchiveIndex, DiskIndexStore, IndexStore, MemoryIndexStore,
};
use crate::state::ReadingStateStore;
use crate::utils::error::Result;

/// Reading direction used to pick preload targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

pub struct ViewerContext {
    config: Config,
    store: Arc<dyn IndexStore>,
    decoder: Arc<dyn PageDecoder>,
    state: Option<ReadingStateStore>,
}

impl ViewerContext {
    /// Context backed by the configured cache directory
    ///
    /// If that directory cannot be used, indexes live in memory for the
    /// lifetime of the context and reading positions are not remembered.
    pub fn new(config: Config) -> Self {
        let cache_dir = config.cache_dir();

        let store: Arc<dyn IndexStore> = match cache_dir.as_deref().map(DiskIndexStore::new) {
            Some(Ok(disk)) => {
                tracing::debug!("Index cache directory: {}", disk.dir().display());
                Arc::new(disk)
            }
            Some(Err(e)) => {
                tracing::warn!("{}; indexes will not be saved", e);
                Arc::new(MemoryIndexStore::new())
            }
            None => {
                tracing::warn!("No cache directory available; indexes will not be saved");
                Arc::new(MemoryIndexStore::new())
            }
        };

        let state = cache_dir.and_then(|dir| match ReadingStateStore::new(dir) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Reading positions disabled: {}", e);
                None
            }
        });

        Self {
            config,
            store,
            decoder: Arc::new(StandardDecoder),
            state,
        }
    }

    /// Context with an explicit index store and decoder, and no reading positions
    pub fn with_parts(
        config: Config,
        store: Arc<dyn IndexStore>,
        decoder: Arc<dyn PageDecoder>,
    ) -> Self {
        Self {
            config,
            store,
            decoder,
            state: None,
        }
    }

    pub fn with_reading_state(mut self, state: ReadingStateStore) -> Self {
        self.state = Some(state);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Load or rebuild the index for `path` and bind a decode cache to it
    ///
    /// Archive-level failures (unreadable container, no images) are returned;
    /// index persistence problems are not.
    pub fn open_archive(&self, path: &Path) -> Result<Session> {
        let index = load_or_rebuild(path, self.store.as_ref(), self.config.validation)?;
        let archive = archive::open_archive(&index.source_path)?;

        tracing::info!(
            "Opened {} ({} pages)",
            index.source_path.display(),
            index.total_pages()
        );

        Ok(Session {
            cache: PageCache::new(
                archive,
                Arc::new(index),
                Arc::clone(&self.decoder),
                self.config.cache_options(),
            ),
            preload_ahead: self.config.preload_ahead,
            state: self.state.clone(),
        })
    }

    /// Stored reading position for `path`, if any
    pub fn last_page(&self, path: &Path) -> Option<usize> {
        self.state.as_ref()?.load_last_page(path)
    }
}

/// One open archive
pub struct Session {
    cache: PageCache,
    preload_ahead: usize,
    state: Option<ReadingStateStore>,
}

impl Session {
    pub fn index(&self) -> &ArchiveIndex {
        self.cache.index()
    }

    pub fn page_count(&self) -> usize {
        self.cache.total_pages()
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn get_page(&self, index: usize) -> Result<PageBitmap> {
        self.cache.get(index)
    }

    /// Hint that the reader is at `index` moving in `direction`
    pub fn preload_around(&self, index: usize, direction: Direction) {
        let targets = preload_targets(index, direction, self.preload_ahead, self.page_count());
        if !targets.is_empty() {
            self.cache.schedule_preload(&targets);
        }
    }

    /// Page to show first: the stored position if it is still in range
    pub fn resume_page(&self) -> usize {
        let Some(state) = &self.state else {
            return 0;
        };
        match state.load_last_page(&self.index().source_path) {
            Some(page) if page < self.page_count() => page,
            _ => 0,
        }
    }

    pub fn save_position(&self, page: usize) {
        if let Some(state) = &self.state {
            state.save_last_page(&self.index().source_path, page);
        }
    }
}

/// Up to `ahead` neighbours of `index` in `direction`, nearest first, within `0..total`
fn preload_targets(
    index: usize,
    direction: Direction,
    ahead: usize,
    total: usize,
) -> Vec<usize> {
    match direction {
        Direction::Forward => (1..=ahead)
            .filter_map(|step| index.checked_add(step))
            .take_while(|&i| i < total)
            .collect(),
        Direction::Backward => (1..=ahead)
            .map_while(|step| index.checked_sub(step))
            .filter(|&i| i < total)
            .collect(),
    }
}
