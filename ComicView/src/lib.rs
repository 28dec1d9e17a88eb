//! ComicView - index and decode cache core for ZIP/CBZ comic archives
//!
//! Builds a durable, validated page index for an archive and serves decoded
//! pages through a bounded LRU cache with single-flight loading and
//! background preloading. Windowing, input handling and file dialogs are
//! left to the embedding application, which drives everything through a
//! [`ViewerContext`]:
//!
//! ```no_run
//! use comicview::{Config, Direction, ViewerContext};
//! use std::path::Path;
//!
//! let context = ViewerContext::new(Config::load());
//! let session = context.open_archive(Path::new("demo.cbz"))?;
//! let page = session.get_page(0)?;
//! session.preload_around(0, Direction::Forward);
//! println!("{}x{}", page.width(), page.height());
//! # Ok::<(), comicview::ComicError>(())
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod image_processor;
pub mod index;
pub mod session;
pub mod state;
mod utils;

pub use cache::{CacheOptions, CacheStats, DecodedPage, PageBitmap, PageCache, SlotState};
pub use config::Config;
pub use image_processor::{ImageFormat, PageDecoder, StandardDecoder};
pub use index::{
    build_index, load_or_rebuild, ArchiveIndex, DiskIndexStore, IndexStore, MemoryIndexStore,
    PageDescriptor, Validation,
};
pub use session::{Direction, Session, ViewerContext};
pub use state::ReadingStateStore;
pub use utils::error::{ComicError, PageError, Result};
