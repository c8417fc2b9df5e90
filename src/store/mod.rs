//! Content-addressed store (§4.B): hashing, organized on-disk layout and
//! thumbnail generation.
//!
//! Grounded on the predecessor's `scanner/hashing.rs` (streaming SHA-256) and
//! `scanner/thumbnails.rs` (resize + EXIF-rotation idiom), combined with
//! `centralise/mod.rs`'s copy-into-organized-tree pattern. MD5 and the
//! perceptual hash the predecessor computed alongside SHA-256 have no
//! counterpart here — dropped, see DESIGN.md.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Result of [`generate`]: everything the pipeline needs to place and
/// reference a newly ingested file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub hash: String,
    pub short_hash: String,
    pub hashed_filename: String,
    pub relative_path: PathBuf,
    pub full_path: PathBuf,
    pub size: u64,
}

/// Keeps `[A-Za-z0-9_-]` only and truncates to 50 chars, so stems survive
/// unicode filenames and spaces without colliding on case-insensitive
/// filesystems any more than the source names already would.
fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let cleaned = if cleaned.is_empty() { "file".to_string() } else { cleaned };
    cleaned.chars().take(50).collect()
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Computes the `FileInfo` for a freshly discovered source file. `taken_at`
/// drives the `YYYY/MM` bucket; falls back to the file's mtime when absent
/// (§4.E date-priority fallback terminates at mtime).
pub fn generate(source_path: &Path, taken_at: Option<DateTime<Utc>>, processed_dir: &Path) -> Result<FileInfo> {
    let metadata = fs::metadata(source_path)?;
    let size = metadata.len();
    let hash = sha256_file(source_path)?;
    let short_hash = hash[..8].to_string();

    let date = taken_at.unwrap_or_else(|| {
        metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now())
    });

    let ext = source_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    let stem = source_path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(sanitize_stem)
        .unwrap_or_else(|| "file".to_string());

    let hashed_filename = format!("{stem}_{short_hash}{ext}");
    let relative_path = PathBuf::from(date.format("%Y").to_string())
        .join(date.format("%m").to_string())
        .join(&hashed_filename);
    let full_path = processed_dir.join("media").join(&relative_path);

    Ok(FileInfo { hash, short_hash, hashed_filename, relative_path, full_path, size })
}

pub fn ensure_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

/// Copies `source` to `info.full_path`, creating parent directories first.
/// Copies to a sibling temp file then renames into place so a reader never
/// observes a partially-written destination.
pub fn copy_to_organized(source: &Path, info: &FileInfo) -> Result<()> {
    ensure_dirs(&info.full_path)?;
    let tmp_path = info.full_path.with_extension("tmp-copy");
    fs::copy(source, &tmp_path).with_context(|| format!("copying {} to {}", source.display(), tmp_path.display()))?;
    fs::rename(&tmp_path, &info.full_path)?;
    Ok(())
}

/// Rehashes the destination and compares against the recorded hash — the
/// store's core integrity invariant (§8.2).
pub fn verify_integrity(full_path: &Path, expected_hash: &str) -> Result<bool> {
    let actual = sha256_file(full_path)?;
    Ok(actual == expected_hash)
}

pub fn face_filename(stem: &str, short_hash: &str, index: usize, ext: &str) -> String {
    format!("{}_{}__face_{}{}", sanitize_stem(stem), short_hash, index, ext)
}

pub fn media_url(relative_path: &Path) -> String {
    format!("/media/{}", relative_path.display())
}

pub fn thumbnail_url(relative_path: &Path) -> String {
    format!("/thumbnails/{}", relative_path.display())
}

pub fn face_url(face_filename: &str) -> String {
    format!("/faces/{}", face_filename)
}

fn apply_rotation(img: DynamicImage, rotation_degrees: i32) -> DynamicImage {
    match rotation_degrees.rem_euclid(360) {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}

fn thumbnail_path_for(relative_path: &Path, processed_dir: &Path) -> Option<PathBuf> {
    let stem = relative_path.file_stem()?.to_str()?;
    let ext = relative_path.extension().and_then(|e| e.to_str()).unwrap_or("jpg");
    let parent = relative_path.parent()?;
    Some(processed_dir.join("thumbnails").join(parent).join(format!("{stem}_thumb.{ext}")))
}

/// Generates (or returns the cached) thumbnail for an organized-tree image.
/// `relative_path` is the image's `YYYY/MM/{stem}_{short8}{ext}` path.
/// Cached by destination path for the common unrotated case; any non-zero
/// rotation always regenerates since the cache key carries no rotation tag.
pub fn generate_thumbnail(
    full_path: &Path,
    relative_path: &Path,
    processed_dir: &Path,
    rotation_degrees: i32,
    max_size: u32,
    jpeg_quality: u8,
) -> Result<PathBuf> {
    let dest = thumbnail_path_for(relative_path, processed_dir)
        .with_context(|| format!("deriving thumbnail path for {}", relative_path.display()))?;

    if dest.exists() && rotation_degrees == 0 {
        return Ok(dest);
    }

    ensure_dirs(&dest)?;
    let img = image::open(full_path).with_context(|| format!("opening {}", full_path.display()))?;
    let thumbnail = img.thumbnail(max_size, max_size);
    let rotated = apply_rotation(thumbnail, rotation_degrees);

    let mut out = File::create(&dest)?;
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, jpeg_quality);
    rotated.write_with_encoder(encoder)?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_stem_strips_unsafe_characters_and_truncates() {
        let long = "a".repeat(80);
        assert_eq!(sanitize_stem("My Photo! (2024).jpg"), "MyPhoto2024jpg");
        assert_eq!(sanitize_stem(&long).len(), 50);
    }

    #[test]
    fn generate_produces_year_month_relative_path() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("vacation.jpg");
        fs::write(&source, b"fake-jpeg-bytes").unwrap();

        let taken_at = DateTime::parse_from_rfc3339("2023-07-04T12:00:00Z").unwrap().with_timezone(&Utc);
        let processed_dir = dir.path().join("processed");
        let info = generate(&source, Some(taken_at), &processed_dir).unwrap();

        assert_eq!(info.relative_path, PathBuf::from("2023").join("07").join(format!("vacation_{}.jpg", info.short_hash)));
        assert_eq!(info.short_hash.len(), 8);
        assert_eq!(info.size, 15);
    }

    #[test]
    fn copy_then_rehash_matches_recorded_hash() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"content").unwrap();

        let processed_dir = dir.path().join("processed");
        let info = generate(&source, None, &processed_dir).unwrap();
        copy_to_organized(&source, &info).unwrap();

        assert!(verify_integrity(&info.full_path, &info.hash).unwrap());
    }

    #[test]
    fn face_filename_embeds_index() {
        let name = face_filename("vacation", "deadbeef", 2, ".jpg");
        assert_eq!(name, "vacation_deadbeef__face_2.jpg");
    }
}
