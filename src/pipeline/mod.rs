//! Per-image enrichment pipeline (§4.E).
//!
//! Grounded on the predecessor's `scanner/mod.rs` `scan_single_file`: extract
//! in parallel, swallow sub-extractor failures with a default value, then
//! persist sequentially in one pass. Generalized here to the full step list
//! (objects, faces + crops, astro, screenshot, geolocation, smart albums).

pub mod astro;
pub mod color;
pub mod exif;
pub mod faces_crop;
pub mod screenshot;

use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::faces::NewFace;
use crate::db::images::NewImage;
use crate::db::objects::{BoundingBox, DetectedObject};
use crate::db::Database;
use crate::error::EngineError;
use crate::pipeline::exif::ExifData;
use crate::{geo, smart_albums, store};

/// A detected face as reported by an external face-detection collaborator,
/// in *display* (EXIF-orientation-corrected) pixel coordinates.
#[derive(Debug, Clone)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    pub detection_confidence: f64,
    pub gender: Option<String>,
    pub gender_confidence: Option<f64>,
    pub age_low: Option<i64>,
    pub age_high: Option<i64>,
    pub age_confidence: Option<f64>,
    pub landmarks_json: Option<String>,
}

/// Face detection's numeric internals are an external collaborator (§1
/// Non-goals); this is the contract the pipeline drives against.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, path: &Path) -> Result<Vec<FaceCandidate>>;
}

/// Object detection's numeric internals are likewise out of scope; only the
/// input/output contract is specified.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, path: &Path) -> Result<Vec<DetectedObject>>;
}

/// Used when a detector is disabled by config rather than absent — keeps the
/// pipeline's parallel-extraction step uniform whether or not a feature is on.
pub struct NullObjectDetector;
impl ObjectDetector for NullObjectDetector {
    fn detect(&self, _path: &Path) -> Result<Vec<DetectedObject>> {
        Ok(Vec::new())
    }
}

pub struct NullFaceDetector;
impl FaceDetector for NullFaceDetector {
    fn detect(&self, _path: &Path) -> Result<Vec<FaceCandidate>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub image_id: i64,
    pub faces_detected: usize,
    pub objects_detected: usize,
    pub is_screenshot: bool,
    pub is_astro: bool,
    pub geolocated: bool,
    pub albums_matched: usize,
}

struct Extraction {
    exif: ExifData,
    dominant_color: String,
    faces: Vec<FaceCandidate>,
    objects: Vec<DetectedObject>,
    astro: astro::AstroVerdict,
}

/// Runs the full enrichment chain for one source file and persists the
/// result. Returns `EngineError::DuplicateFile` (step 2) if the content hash
/// already has a live `Image` row.
pub fn process_image(db: &Database, config: &Config, source_path: &Path, face_detector: &dyn FaceDetector, object_detector: &dyn ObjectDetector) -> Result<PipelineReport> {
    let file_info = store::generate(source_path, None, &config.storage.processed_dir)?;

    if let Some(existing) = db.find_duplicate_by_hash(&file_info.hash)? {
        return Err(EngineError::DuplicateFile { hash: file_info.hash, existing_id: existing.id }.into());
    }

    store::copy_to_organized(source_path, &file_info)?;

    let extraction = extract_parallel(&file_info.full_path, config, face_detector, object_detector);

    let objects: Vec<DetectedObject> = extraction
        .objects
        .into_iter()
        .filter(|o| o.confidence >= config.processing.object_detection.confidence_detection as f64)
        .collect();

    let (width, height) = image_dimensions(&file_info.full_path);
    let mime = mime_for(source_path);
    let orientation = orientation_code(&extraction.exif);

    let screenshot_input = screenshot::ScreenshotInput {
        filename: source_path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
        exif: &extraction.exif,
        objects: &objects,
        width,
        height,
        mime: mime.as_deref(),
    };
    let screenshot_verdict = screenshot::detect(&screenshot_input);

    let mtime: chrono::DateTime<chrono::Utc> = std::fs::metadata(source_path)
        .and_then(|m| m.modified())
        .map(chrono::DateTime::from)
        .unwrap_or_else(|_| chrono::Utc::now());
    let taken_at = exif::resolve_taken_at(&extraction.exif, mtime);

    let new_image = NewImage {
        hash: file_info.hash.clone(),
        source_path: source_path.to_string_lossy().to_string(),
        relative_path: file_info.relative_path.to_string_lossy().to_string(),
        size_bytes: file_info.size as i64,
        mime,
        width: width.map(|w| w as i64),
        height: height.map(|h| h as i64),
        taken_at: Some(taken_at.to_rfc3339()),
        dominant_color: Some(extraction.dominant_color),
        is_screenshot: screenshot_verdict.is_screenshot,
        screenshot_confidence: Some(screenshot_verdict.score),
        screenshot_reasons: serde_json::to_string(&screenshot_verdict.reasons).ok(),
        is_astrophotography: extraction.astro.is_astro,
        astro_confidence: Some(extraction.astro.confidence),
        astro_classification: extraction.astro.classification.map(|c| c.as_str().to_string()),
        astro_details: Some(format!("{{\"star_count\":{}}}", extraction.astro.star_count)),
        gps_latitude: extraction.exif.gps_latitude,
        gps_longitude: extraction.exif.gps_longitude,
        gps_altitude: extraction.exif.gps_altitude,
    };

    let image_id = db.insert_image(&new_image)?;
    db.insert_image_metadata(image_id, &extraction.exif)?;
    db.insert_detected_objects(image_id, &objects)?;

    let faces_persisted = persist_faces(db, config, image_id, &file_info, orientation, &extraction.faces, source_path)?;

    if let (Some(lat), Some(lon)) = (new_image.gps_latitude, new_image.gps_longitude) {
        if config.features.geolocation {
            if let Err(err) = geo::link_image(db, image_id, lat, lon, geo::DEFAULT_RADIUS_MILES) {
                warn!(image_id, error = %err, "geolocation linking failed, continuing");
            }
        }
    }

    let mut albums_matched = 0;
    if config.features.smart_albums {
        match smart_albums::evaluate_image(db, image_id) {
            Ok(matches) => albums_matched = matches,
            Err(err) => warn!(image_id, error = %err, "smart album evaluation failed, continuing"),
        }
    }

    info!(image_id, hash = %new_image.hash, faces = faces_persisted, objects = objects.len(), "image processed");

    Ok(PipelineReport {
        image_id,
        faces_detected: faces_persisted,
        objects_detected: objects.len(),
        is_screenshot: new_image.is_screenshot,
        is_astro: new_image.is_astrophotography,
        geolocated: new_image.gps_latitude.is_some() && config.features.geolocation,
        albums_matched,
    })
}

/// Step 4: EXIF is read first since astro detection needs its exposure/ISO
/// values; dominant color, faces, objects and astro then run in parallel.
/// Any single failure degrades to a default instead of failing the whole
/// image.
fn extract_parallel(full_path: &Path, config: &Config, face_detector: &dyn FaceDetector, object_detector: &dyn ObjectDetector) -> Extraction {
    let color_path = full_path.to_path_buf();
    let face_path = full_path.to_path_buf();
    let object_path = full_path.to_path_buf();
    let astro_path = full_path.to_path_buf();

    let face_detection_enabled = config.processing.face_detection.enabled;
    let object_detection_enabled = config.processing.object_detection.enabled;

    let exif = exif::extract(full_path).unwrap_or_else(|err| {
        warn!(error = %err, "exif extraction failed, using defaults");
        ExifData::default()
    });
    let astro_input = astro::AstroInput { exposure_secs: exif.exposure_secs, iso: exif.iso };

    let (color_result, (faces_result, (objects_result, astro_result))) = rayon::join(
        || color::dominant_color(&color_path),
        || {
            rayon::join(
                || {
                    if face_detection_enabled {
                        face_detector.detect(&face_path)
                    } else {
                        Ok(Vec::new())
                    }
                },
                || {
                    rayon::join(
                        || {
                            if object_detection_enabled {
                                object_detector.detect(&object_path)
                            } else {
                                Ok(Vec::new())
                            }
                        },
                        || astro::detect(&astro_path, &astro_input),
                    )
                },
            )
        },
    );

    let dominant_color = color_result.unwrap_or_else(|err| {
        warn!(error = %err, "dominant color extraction failed, using default");
        color::default_color()
    });
    let faces = faces_result.unwrap_or_else(|err| {
        warn!(error = %err, "face detection failed, continuing with no faces");
        Vec::new()
    });
    let objects = objects_result.unwrap_or_else(|err| {
        warn!(error = %err, "object detection failed, continuing with no objects");
        Vec::new()
    });
    let astro = astro_result.unwrap_or_else(|err| {
        warn!(error = %err, "astro detection failed, using default verdict");
        astro::AstroVerdict { is_astro: false, confidence: 0.0, classification: None, star_count: 0 }
    });

    Extraction { exif, dominant_color, faces, objects, astro }
}

fn persist_faces(
    db: &Database,
    config: &Config,
    image_id: i64,
    file_info: &store::FileInfo,
    orientation: u16,
    faces: &[FaceCandidate],
    source_path: &Path,
) -> Result<usize> {
    if faces.is_empty() {
        return Ok(0);
    }

    let stem = file_info.hashed_filename.split('.').next().unwrap_or("file");
    let ext = source_path.extension().and_then(|e| e.to_str()).map(|e| format!(".{e}")).unwrap_or_default();
    let relative_parent = file_info.relative_path.parent().unwrap_or(Path::new(""));
    let faces_dir = config.storage.processed_dir.join("faces").join(relative_parent);

    let mut new_faces = Vec::with_capacity(faces.len());
    for (idx, candidate) in faces.iter().enumerate() {
        let face_filename = store::face_filename(stem, &file_info.short_hash, idx, &ext);
        let dest_path = faces_dir.join(&face_filename);

        let crop_result = faces_crop::extract_face_crop(&file_info.full_path, &dest_path, &candidate.bbox, orientation);
        let face_image_path = match crop_result {
            Ok(()) => Some(dest_path.to_string_lossy().to_string()),
            Err(err) => {
                warn!(error = %err, "face crop extraction failed for one face, recording detection without a crop");
                None
            }
        };

        new_faces.push(NewFace {
            bbox: candidate.bbox.clone(),
            detection_confidence: candidate.detection_confidence,
            gender: candidate.gender.clone(),
            gender_confidence: candidate.gender_confidence,
            age_low: candidate.age_low,
            age_high: candidate.age_high,
            age_confidence: candidate.age_confidence,
            landmarks_json: candidate.landmarks_json.clone(),
            face_image_path,
        });
    }

    db.insert_detected_faces(image_id, &new_faces)?;
    Ok(new_faces.len())
}

fn image_dimensions(path: &Path) -> (Option<u32>, Option<u32>) {
    match image::image_dimensions(path) {
        Ok((w, h)) => (Some(w), Some(h)),
        Err(_) => (None, None),
    }
}

fn mime_for(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    Some(
        match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "bmp" => "image/bmp",
            "tiff" => "image/tiff",
            "webp" => "image/webp",
            _ => "application/octet-stream",
        }
        .to_string(),
    )
}

/// EXIF orientation code (1–8), defaulting to 1 (no transform) if absent.
fn orientation_code(exif_data: &ExifData) -> u16 {
    exif_data
        .raw_exif_json
        .as_deref()
        .and_then(|json| serde_json::from_str::<serde_json::Value>(json).ok())
        .and_then(|value| value.get("primary:Orientation").and_then(|v| v.as_u64()))
        .map(|v| v as u16)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubFaces(Vec<FaceCandidate>);
    impl FaceDetector for StubFaces {
        fn detect(&self, _path: &Path) -> Result<Vec<FaceCandidate>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn duplicate_hash_is_rejected_before_any_extraction_runs() {
        let dir = tempfile::tempdir().unwrap();
        let source_dir = dir.path().join("source");
        std::fs::create_dir_all(&source_dir).unwrap();
        let source = source_dir.join("a.jpg");
        std::fs::write(&source, b"same-bytes").unwrap();

        let mut config = Config::default();
        config.storage.source_dir = source_dir;
        config.storage.processed_dir = dir.path().join("processed");

        let db = Database::open_in_memory().unwrap();
        let file_info = crate::store::generate(&source, None, &config.storage.processed_dir).unwrap();
        db.insert_image(&NewImage { hash: file_info.hash.clone(), size_bytes: 10, ..Default::default() }).unwrap();

        let result = process_image(&db, &config, &source, &NullFaceDetector, &NullObjectDetector);
        assert!(matches!(result.unwrap_err().downcast::<EngineError>().unwrap(), EngineError::DuplicateFile { .. }));
    }

    #[test]
    fn mime_is_derived_from_extension() {
        assert_eq!(mime_for(Path::new("a.PNG")), Some("image/png".to_string()));
        assert_eq!(mime_for(Path::new("a.jpg")), Some("image/jpeg".to_string()));
    }
}
