///! Error types for ComicView
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComicError {
    /// The container could not be opened (corrupt header, unsupported compression, missing file)
    #[error("Archive unreadable: {0}")]
    ArchiveUnreadable(String),

    /// No member with a supported image extension survived filtering
    #[error("No image files found in archive")]
    NoImagesFound,

    #[error("Failed to extract '{member}': {reason}")]
    MemberExtraction { member: String, reason: String },

    #[error("Failed to decode page {index}: {cause}")]
    DecodeFailed { index: usize, cause: String },

    #[error("Image processing error: {0}")]
    Image(String),

    #[error("Invalid page index: {index} (archive has {total} pages)")]
    PageOutOfRange { index: usize, total: usize },

    #[error("Index persistence error: {0}")]
    IndexPersistence(String),

    #[error("Index record corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ComicError {
    /// True for failures that invalidate the whole archive rather than one page
    pub fn is_archive_fatal(&self) -> bool {
        matches!(self, Self::ArchiveUnreadable(_) | Self::NoImagesFound)
    }
}

/// Page-scoped failure shared between every waiter of one in-flight load
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("Failed to extract '{member}': {reason}")]
    Extraction { member: String, reason: String },

    #[error("Failed to decode page {index}: {cause}")]
    Decode { index: usize, cause: String },
}

impl From<PageError> for ComicError {
    fn from(err: PageError) -> ComicError {
        match err {
            PageError::Extraction { member, reason } => {
                ComicError::MemberExtraction { member, reason }
            }
            PageError::Decode { index, cause } => ComicError::DecodeFailed { index, cause },
        }
    }
}

pub type Result<T> = std::result::Result<T, ComicError>;
