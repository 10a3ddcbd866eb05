//! Input archive extraction.

use std::fs::File;
use std::io;
use std::path::{Component, Path};

/// Default minimum number of usable images for a reconstruction.
pub const MIN_INPUT_IMAGES: usize = 3;

/// File extensions counted as usable input images (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("not a valid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("entry '{0}' escapes the extraction directory")]
    UnsafePath(String),

    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Whether `path` has one of the [`IMAGE_EXTENSIONS`], case-insensitively.
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// macOS resource-fork noise that archivers add next to real files.
fn is_resource_fork(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name == "__MACOSX" || name.starts_with("._")
        }
        _ => false,
    })
}

/// Extract the zip at `archive` into `dest` and return the number of image
/// files written.
///
/// Directory structure inside the archive is preserved. Entries whose names
/// would resolve outside `dest` abort the extraction. This is blocking I/O;
/// async callers should run it on the blocking pool.
pub fn extract_images(archive: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    std::fs::create_dir_all(dest)?;

    let mut images = 0usize;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafePath(entry.name().to_string()))?;

        if is_resource_fork(&relative) {
            continue;
        }

        let target = dest.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;

        if is_image(&relative) {
            images += 1;
        }
    }

    Ok(images)
}
