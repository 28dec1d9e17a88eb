///! Shared utilities for archive processing
///!
///! Provides image filtering by extension and member path validation
use std::path::{Component, Path};

/// Maximum uncompressed size for a single member (256MB)
/// Large JPEG 2000 scans stay well under this; anything bigger is treated as corrupt
pub const MAX_ENTRY_SIZE: u64 = 256 * 1024 * 1024;

/// Supported image extensions (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["jp2", "jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Check if a member name is an image based on extension
pub fn is_image_file(name: &str) -> bool {
    match Path::new(name).extension().and_then(|s| s.to_str()) {
        Some(ext) => IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Reject member paths that are absolute or climb out of the archive root
///
/// `a/../b.jpg` is fine (stays inside), `../b.jpg` and `/etc/b.jpg` are not.
pub fn is_safe_member_path(name: &str) -> bool {
    let mut depth: usize = 0;

    for component in Path::new(name).components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return false,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::Normal(_) => depth += 1,
        }
    }

    // Windows-style absolute paths are not recognised as such on unix
    !name.starts_with('\\') && !name.contains(":\\")
}

/// Leaf file name of a member path (`chapter1/page01.jp2` -> `page01.jp2`)
pub fn display_name(member_path: &str) -> String {
    member_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(member_path)
        .to_string()
}
