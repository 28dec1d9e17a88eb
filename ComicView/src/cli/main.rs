///! comicview - command-line front end for the ComicView core
///!
///! Inspect indexes, decode pages through the cache and check stored reading
///! positions without a GUI.
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use comicview::index::{format_hash, ArchiveFingerprint};
use comicview::{Config, Direction, Validation, ViewerContext};

#[derive(Parser)]
#[command(name = "comicview")]
#[command(version, about = "Index and decode pages of ZIP/CBZ comic archives", long_about = None)]
struct Cli {
    /// Index/state cache directory (overrides config and COMICVIEW_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load or rebuild the page index and print the page table
    Index {
        archive: PathBuf,

        /// Verify the content hash even when size and mtime match
        #[arg(long)]
        thorough: bool,
    },

    /// Decode one page (0-based) and print its size and format
    Page {
        archive: PathBuf,

        page: usize,

        /// Also preload the following pages in the background
        #[arg(long)]
        preload: bool,
    },

    /// Print the archive fingerprint
    Hash { archive: PathBuf },

    /// Print the stored reading position
    Resume { archive: PathBuf },
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(dir) = cli.cache_dir {
        config.override_cache_dir(dir);
    }

    match cli.command {
        Commands::Index { archive, thorough } => {
            if thorough {
                config.validation = Validation::Thorough;
            }
            let context = ViewerContext::new(config);
            print_index(&context, &archive)
        }
        Commands::Page {
            archive,
            page,
            preload,
        } => {
            let context = ViewerContext::new(config);
            show_page(&context, &archive, page, preload)
        }
        Commands::Hash { archive } => print_hash(&archive),
        Commands::Resume { archive } => {
            let context = ViewerContext::new(config);
            match context.last_page(&archive) {
                Some(page) => println!("{}", page),
                None => println!("no stored position"),
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("comicview=info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_index(context: &ViewerContext, archive: &Path) -> anyhow::Result<()> {
    let session = context
        .open_archive(archive)
        .with_context(|| format!("cannot open {}", archive.display()))?;
    let index = session.index();

    println!(
        "{} ({} pages, hash {})",
        index.source_path.display(),
        index.total_pages(),
        format_hash(index.fingerprint.content_hash)
    );
    for page in &index.pages {
        println!(
            "{:>5}  {:<9} {:>5}x{:<5} {:>10}  {}",
            page.sequence_index,
            page.image_format,
            page.pixel_width,
            page.pixel_height,
            page.uncompressed_size,
            page.archive_member_path
        );
    }
    Ok(())
}

fn show_page(
    context: &ViewerContext,
    archive: &Path,
    page: usize,
    preload: bool,
) -> anyhow::Result<()> {
    let session = context
        .open_archive(archive)
        .with_context(|| format!("cannot open {}", archive.display()))?;

    let started = Instant::now();
    let bitmap = session.get_page(page)?;
    println!(
        "page {}: {} {}x{} ({}ms)",
        page,
        bitmap.format,
        bitmap.width(),
        bitmap.height(),
        started.elapsed().as_millis()
    );

    if preload {
        session.preload_around(page, Direction::Forward);
    }
    session.save_position(page);

    // Dropping the session waits for queued preloads
    drop(session);
    Ok(())
}

fn print_hash(archive: &Path) -> anyhow::Result<()> {
    let fingerprint = ArchiveFingerprint::compute(archive)
        .with_context(|| format!("cannot read {}", archive.display()))?;
    println!("size:     {}", fingerprint.size);
    println!("modified: {:.6}", fingerprint.modified);
    println!("hash:     {}", format_hash(fingerprint.content_hash));
    Ok(())
}
