//! Recursive filesystem discovery of supported image files (§4.C).

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions the file index will track; matched case-insensitively.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];

pub fn discover_images(directory: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();

    images.sort();
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discovers_supported_extensions_recursively() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("photo1.jpg"), b"").unwrap();
        fs::write(dir.path().join("photo2.PNG"), b"").unwrap();
        fs::write(dir.path().join("document.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();
        fs::write(dir.path().join("subdir/photo3.jpeg"), b"").unwrap();

        let images = discover_images(dir.path());
        assert_eq!(images.len(), 3);
    }
}
