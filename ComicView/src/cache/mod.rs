//! Decode cache
//!
//! Bounds memory spent on decoded pages while keeping page turns fast. Each
//! page index is in one of three observable states:
//!
//! - **Empty**: nothing cached, nothing in flight
//! - **Loading**: one decode in flight; later requests join it
//! - **Ready**: decoded bitmap held in the LRU
//!
//! Eviction moves a Ready page back to Empty. Capacity is an entry count;
//! at typical comic-page resolution the default of 5 stays around 50 MB.
//!
//! Bitmaps are handed out as [`PageBitmap`] (`Arc<DecodedPage>`), so a page
//! evicted while a caller still displays it stays alive until that caller
//! drops its handle.
//!
//! Failed loads are not cached: the next request for that page tries again.

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use image::DynamicImage;

use crate::archive::PageArchive;
use crate::image_processor::{resolve_format, ImageFormat, PageDecoder};
use crate::index::ArchiveIndex;
use crate::utils::error::{ComicError, PageError, Result};

mod flight;
mod preload;

use flight::{Flight, FlightResult};
use preload::PreloadPool;

/// Pages kept decoded by default
pub const DEFAULT_CAPACITY: usize = 5;

/// A decoded page image
#[derive(Debug)]
pub struct DecodedPage {
    pub index: usize,
    pub format: ImageFormat,
    pub image: DynamicImage,
}

impl DecodedPage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Shared handle to a decoded page
pub type PageBitmap = Arc<DecodedPage>;

/// Observable state of one page index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Loading,
    Ready,
}

/// Counters since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Decode attempts, successful or not
    pub decodes: u64,
    pub evictions: u64,
    pub preload_failures: u64,
}

/// Sizing of a [`PageCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Maximum number of Ready pages (0 is treated as 1)
    pub capacity: usize,
    /// Background preload threads (0 is treated as 1)
    pub preload_workers: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            preload_workers: 1,
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    decodes: AtomicU64,
    evictions: AtomicU64,
    preload_failures: AtomicU64,
}

struct CacheState {
    ready: LruCache<usize, PageBitmap>,
    loading: HashMap<usize, Arc<Flight>>,
}

/// Everything a preload worker needs to load a page
struct Shared {
    archive: Arc<dyn PageArchive>,
    index: Arc<ArchiveIndex>,
    decoder: Arc<dyn PageDecoder>,
    state: Mutex<CacheState>,
    counters: Counters,
}

/// Bounded LRU of decoded pages with single-flight loading and background preload
pub struct PageCache {
    shared: Arc<Shared>,
    pool: PreloadPool,
}

enum Claim {
    Lead(Arc<Flight>),
    Join(Arc<Flight>),
}

impl PageCache {
    pub fn new(
        archive: Arc<dyn PageArchive>,
        index: Arc<ArchiveIndex>,
        decoder: Arc<dyn PageDecoder>,
        options: CacheOptions,
    ) -> Self {
        let capacity = NonZeroUsize::new(options.capacity).unwrap_or(NonZeroUsize::MIN);
        tracing::debug!(
            "Page cache: capacity {}, {} preload workers, {} pages",
            capacity,
            options.preload_workers,
            index.total_pages()
        );

        Self {
            shared: Arc::new(Shared {
                archive,
                index,
                decoder,
                state: Mutex::new(CacheState {
                    ready: LruCache::new(capacity),
                    loading: HashMap::new(),
                }),
                counters: Counters::default(),
            }),
            pool: PreloadPool::new(options.preload_workers),
        }
    }

    /// Decoded page `index`, loading it on this thread if nobody else is
    ///
    /// A Ready page returns immediately and becomes most recently used. A
    /// page already being loaded (by a preload or another caller) is waited
    /// for rather than decoded twice. A page whose preload is still queued is
    /// loaded here and the queued job becomes a no-op.
    pub fn get(&self, index: usize) -> Result<PageBitmap> {
        self.check_range(index)?;

        let claim = {
            let mut state = self.shared.lock();
            if let Some(hit) = state.ready.get(&index) {
                self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(hit));
            }
            match state.loading.get(&index) {
                Some(flight) => Claim::Join(Arc::clone(flight)),
                None => {
                    let flight = Arc::new(Flight::claimed());
                    state.loading.insert(index, Arc::clone(&flight));
                    Claim::Lead(flight)
                }
            }
        };
        self.shared.counters.misses.fetch_add(1, Ordering::Relaxed);

        let result = match claim {
            // Queued preload not started yet: load it here instead of waiting behind the queue
            Claim::Join(flight) if flight.claim() => {
                tracing::debug!("Page {} queued for preload, loading now", index);
                self.shared.run(index, &flight)
            }
            Claim::Join(flight) => {
                tracing::debug!("Page {} already loading, waiting", index);
                flight.wait()
            }
            Claim::Lead(flight) => self.shared.run(index, &flight),
        };
        result.map_err(ComicError::from)
    }

    /// Start background loads for `indices` without blocking
    ///
    /// Indices that are out of range, Ready or already Loading are skipped.
    /// Failures are logged and counted, never returned; a `get` that joined
    /// the failed load still sees the error.
    pub fn schedule_preload(&self, indices: &[usize]) {
        for &index in indices {
            if index >= self.total_pages() {
                continue;
            }

            let flight = {
                let mut state = self.shared.lock();
                if state.ready.contains(&index) || state.loading.contains_key(&index) {
                    continue;
                }
                let flight = Arc::new(Flight::new());
                state.loading.insert(index, Arc::clone(&flight));
                flight
            };

            tracing::debug!("Preloading page {}", index);
            let shared = Arc::clone(&self.shared);
            let job_flight = Arc::clone(&flight);
            let job = Box::new(move || {
                if !job_flight.claim() {
                    tracing::debug!("Page {} was loaded by a foreground request", index);
                    return;
                }
                if let Err(e) = shared.run(index, &job_flight) {
                    shared.counters.preload_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Preload of page {} failed: {}", index, e);
                }
            });

            if self.pool.submit(job).is_err() && flight.claim() {
                tracing::warn!("No preload worker available for page {}", index);
                self.shared.abandon(index, &flight, "preload not scheduled");
            }
        }
    }

    pub fn slot_state(&self, index: usize) -> SlotState {
        let state = self.shared.lock();
        if state.ready.contains(&index) {
            SlotState::Ready
        } else if state.loading.contains_key(&index) {
            SlotState::Loading
        } else {
            SlotState::Empty
        }
    }

    /// Ready page indices, most recently used first
    pub fn cached_indices(&self) -> Vec<usize> {
        self.shared.lock().ready.iter().map(|(k, _)| *k).collect()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().ready.cap().get()
    }

    pub fn total_pages(&self) -> usize {
        self.shared.index.total_pages()
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.shared.index
    }

    /// Drop every Ready page; in-flight loads are left to finish
    pub fn clear(&self) {
        self.shared.lock().ready.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.shared.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            decodes: c.decodes.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            preload_failures: c.preload_failures.load(Ordering::Relaxed),
        }
    }

    fn check_range(&self, index: usize) -> Result<()> {
        let total = self.total_pages();
        if index >= total {
            return Err(ComicError::PageOutOfRange { index, total });
        }
        Ok(())
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load `index` as the leader of `flight` and publish the outcome
    fn run(&self, index: usize, flight: &Arc<Flight>) -> FlightResult {
        let guard = LeaderGuard {
            shared: self,
            index,
            flight,
            armed: true,
        };
        let result = self.load(index);
        guard.complete(result)
    }

    /// Extract and decode outside the lock
    fn load(&self, index: usize) -> FlightResult {
        let page = self.index.page(index).ok_or_else(|| PageError::Decode {
            index,
            cause: "page not in index".to_string(),
        })?;
        let member = &page.archive_member_path;

        let data = self.archive.extract(member).map_err(|e| match e {
            ComicError::MemberExtraction { member, reason } => {
                PageError::Extraction { member, reason }
            }
            other => PageError::Extraction {
                member: member.clone(),
                reason: other.to_string(),
            },
        })?;

        let format = match page.image_format {
            ImageFormat::Unknown => resolve_format(&data, member),
            known => known,
        };

        self.counters.decodes.fetch_add(1, Ordering::Relaxed);
        let image = self
            .decoder
            .decode(&data, format)
            .map_err(|e| PageError::Decode {
                index,
                cause: e.to_string(),
            })?;

        tracing::debug!(
            "Decoded page {} ({}, {}x{})",
            index,
            format,
            image.width(),
            image.height()
        );

        Ok(Arc::new(DecodedPage {
            index,
            format,
            image,
        }))
    }

    /// Move `index` out of Loading, into Ready on success, then wake waiters
    fn settle(&self, index: usize, flight: &Flight, result: FlightResult) -> FlightResult {
        {
            let mut state = self.lock();
            state.loading.remove(&index);
            if let Ok(bitmap) = &result {
                if let Some((evicted, _)) = state.ready.push(index, Arc::clone(bitmap)) {
                    if evicted != index {
                        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Evicted page {} from cache", evicted);
                    }
                }
            }
        }
        flight.finish(result.clone());
        result
    }

    fn abandon(&self, index: usize, flight: &Flight, cause: &str) {
        let _ = self.settle(
            index,
            flight,
            Err(PageError::Decode {
                index,
                cause: cause.to_string(),
            }),
        );
    }
}

/// Releases the Loading slot even if the leader unwinds mid-decode
struct LeaderGuard<'a> {
    shared: &'a Shared,
    index: usize,
    flight: &'a Arc<Flight>,
    armed: bool,
}

impl LeaderGuard<'_> {
    fn complete(mut self, result: FlightResult) -> FlightResult {
        self.armed = false;
        self.shared.settle(self.index, self.flight, result)
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared
                .abandon(self.index, self.flight, "decoder panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveEntry;
    use crate::index::{ArchiveFingerprint, IndexMetadata, PageDescriptor, INDEX_VERSION};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Page bytes are `[width - 1]`; 0xFF fails to decode, 0xFE is a slow 1x1 page,
    /// missing members fail to extract
    struct FakeArchive {
        members: HashMap<String, Vec<u8>>,
        path: PathBuf,
    }

    impl PageArchive for FakeArchive {
        fn list_images(&self) -> Result<Vec<ArchiveEntry>> {
            Ok(Vec::new())
        }

        fn extract(&self, member: &str) -> Result<Vec<u8>> {
            self.members
                .get(member)
                .cloned()
                .ok_or_else(|| ComicError::MemberExtraction {
                    member: member.to_string(),
                    reason: "no such member".to_string(),
                })
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    #[derive(Default)]
    struct CountingDecoder {
        calls: AtomicUsize,
    }

    impl PageDecoder for CountingDecoder {
        fn decode(&self, data: &[u8], _format: ImageFormat) -> Result<DynamicImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match data.first() {
                Some(0xFF) | None => {
                    thread::sleep(Duration::from_millis(200));
                    Err(ComicError::Image("corrupt page".to_string()))
                }
                Some(0xFE) => {
                    thread::sleep(Duration::from_millis(300));
                    Ok(DynamicImage::new_rgb8(1, 1))
                }
                Some(&w) => {
                    thread::sleep(Duration::from_millis(30));
                    Ok(DynamicImage::new_rgb8(w as u32 + 1, 1))
                }
            }
        }
    }

    /// `pages[i]` is the byte stored for page i (`None` = missing member)
    fn cache_with(pages: &[Option<u8>], capacity: usize) -> (PageCache, Arc<CountingDecoder>) {
        cache_with_workers(pages, capacity, 2)
    }

    fn cache_with_workers(
        pages: &[Option<u8>],
        capacity: usize,
        preload_workers: usize,
    ) -> (PageCache, Arc<CountingDecoder>) {
        let mut members = HashMap::new();
        let mut descriptors = Vec::new();
        for (i, byte) in pages.iter().enumerate() {
            let name = format!("p{:02}.png", i);
            if let Some(b) = byte {
                members.insert(name.clone(), vec![*b]);
            }
            descriptors.push(PageDescriptor {
                sequence_index: i as u32,
                display_name: name.clone(),
                archive_member_path: name,
                uncompressed_size: 1,
                compressed_size: 1,
                image_format: ImageFormat::Png,
                pixel_width: 0,
                pixel_height: 0,
            });
        }

        let index = ArchiveIndex {
            format_version: INDEX_VERSION.to_string(),
            source_path: PathBuf::from("/comics/fake.zip"),
            fingerprint: ArchiveFingerprint {
                size: 0,
                modified: 0.0,
                content_hash: 0,
            },
            pages: descriptors,
            created_at: String::new(),
            metadata: IndexMetadata::default(),
        };
        let archive = Arc::new(FakeArchive {
            members,
            path: PathBuf::from("/comics/fake.zip"),
        });
        let decoder = Arc::new(CountingDecoder::default());
        let cache = PageCache::new(
            archive,
            Arc::new(index),
            decoder.clone(),
            CacheOptions {
                capacity,
                preload_workers,
            },
        );
        (cache, decoder)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_hit_returns_same_bitmap() {
        let (cache, decoder) = cache_with(&[Some(3), Some(4)], 5);

        let first = cache.get(1).unwrap();
        assert_eq!(first.width(), 5);
        assert_eq!(first.index, 1);
        let second = cache.get(1).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.decodes), (1, 1, 1));
    }

    #[test]
    fn test_lru_eviction_after_six_pages() {
        let (cache, _) = cache_with(&[Some(0); 8], DEFAULT_CAPACITY);

        for i in 0..6 {
            cache.get(i).unwrap();
        }

        assert_eq!(cache.len(), 5);
        assert_eq!(cache.slot_state(0), SlotState::Empty);
        assert_eq!(cache.cached_indices(), vec![5, 4, 3, 2, 1]);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let (cache, _) = cache_with(&[Some(0); 8], 5);

        for i in 0..5 {
            cache.get(i).unwrap();
        }
        cache.get(0).unwrap();
        cache.get(5).unwrap();

        assert_eq!(cache.slot_state(0), SlotState::Ready);
        assert_eq!(cache.slot_state(1), SlotState::Empty);
    }

    #[test]
    fn test_evicted_bitmap_outlives_cache_entry() {
        let (cache, _) = cache_with(&[Some(7), Some(0)], 1);

        let held = cache.get(0).unwrap();
        cache.get(1).unwrap();

        assert_eq!(cache.slot_state(0), SlotState::Empty);
        assert_eq!(held.width(), 8);
    }

    #[test]
    fn test_concurrent_get_decodes_once() {
        let (cache, decoder) = cache_with(&[Some(0), Some(0), Some(0), Some(9)], 5);
        let cache = Arc::new(cache);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get(3).unwrap()
                })
            })
            .collect();

        let results: Vec<PageBitmap> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        assert_eq!(results[0].width(), 10);
    }

    #[test]
    fn test_concurrent_failure_is_shared() {
        let (cache, decoder) = cache_with(&[Some(0xFF)], 5);
        let cache = Arc::new(cache);
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get(0)
                })
            })
            .collect();

        for handle in handles {
            let result = handle.join().unwrap();
            assert!(matches!(result, Err(ComicError::DecodeFailed { index: 0, .. })));
        }
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.slot_state(0), SlotState::Empty);
    }

    #[test]
    fn test_extraction_failure() {
        let (cache, decoder) = cache_with(&[None], 5);

        let result = cache.get(0);
        assert!(matches!(
            result,
            Err(ComicError::MemberExtraction { ref member, .. }) if member == "p00.png"
        ));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_out_of_range() {
        let (cache, _) = cache_with(&[Some(0), Some(0)], 5);
        assert!(matches!(
            cache.get(2),
            Err(ComicError::PageOutOfRange { index: 2, total: 2 })
        ));
    }

    #[test]
    fn test_preload_then_get_decodes_once() {
        let (cache, decoder) = cache_with(&[Some(0), Some(1), Some(2)], 5);

        cache.schedule_preload(&[2]);
        let page = cache.get(2).unwrap();

        assert_eq!(page.width(), 3);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_preload_populates_ready() {
        let (cache, decoder) = cache_with(&[Some(0), Some(1), Some(2)], 5);

        cache.schedule_preload(&[1, 2, 7]);
        wait_for(|| cache.len() == 2);

        assert_eq!(cache.slot_state(1), SlotState::Ready);
        assert_eq!(cache.slot_state(2), SlotState::Ready);

        // Already Ready: no new work
        cache.schedule_preload(&[1, 2]);
        cache.get(1).unwrap();
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_preloaded_page_counts_as_recent() {
        let (cache, _) = cache_with(&[Some(0); 4], 2);

        cache.get(0).unwrap();
        cache.get(1).unwrap();
        cache.schedule_preload(&[2]);
        wait_for(|| cache.slot_state(2) == SlotState::Ready);

        assert_eq!(cache.cached_indices(), vec![2, 1]);
    }

    #[test]
    fn test_preload_failure_is_swallowed() {
        let (cache, decoder) = cache_with(&[Some(0), Some(0xFF)], 5);

        cache.schedule_preload(&[1]);
        wait_for(|| cache.stats().preload_failures == 1);
        assert_eq!(cache.slot_state(1), SlotState::Empty);

        // Failures are not cached: a foreground request retries and reports
        assert!(matches!(
            cache.get(1),
            Err(ComicError::DecodeFailed { index: 1, .. })
        ));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_get_joins_failing_preload() {
        let (cache, decoder) = cache_with(&[Some(0), Some(0xFF)], 5);

        cache.schedule_preload(&[1]);
        wait_for(|| decoder.calls.load(Ordering::SeqCst) == 1);
        assert_eq!(cache.slot_state(1), SlotState::Loading);

        assert!(matches!(
            cache.get(1),
            Err(ComicError::DecodeFailed { index: 1, .. })
        ));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        wait_for(|| cache.stats().preload_failures == 1);
        assert_eq!(cache.slot_state(1), SlotState::Empty);
    }

    #[test]
    fn test_get_takes_over_queued_preload() {
        let pages = [Some(0xFE), Some(0xFE), Some(0xFE), Some(4)];
        let (cache, decoder) = cache_with_workers(&pages, 5, 1);

        cache.schedule_preload(&[0, 1, 2, 3]);
        let started = Instant::now();
        let page = cache.get(3).unwrap();

        // Page 0 alone keeps the only worker busy for 300ms
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(page.width(), 5);

        wait_for(|| cache.len() == 4);
        drop(cache);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_clear() {
        let (cache, _) = cache_with(&[Some(0), Some(0)], 5);
        cache.get(0).unwrap();
        cache.get(1).unwrap();
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 5);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let (cache, _) = cache_with(&[Some(0), Some(0)], 0);
        cache.get(0).unwrap();
        cache.get(1).unwrap();
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.cached_indices(), vec![1]);
    }
}
