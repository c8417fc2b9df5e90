//! Screenshot heuristic (§4.E "Screenshot heuristic").
//!
//! No predecessor counterpart; the scored-signal shape mirrors the
//! astrophotography scorer alongside it in this module.

use crate::db::objects::DetectedObject;
use crate::pipeline::exif::ExifData;

/// Resolutions screenshots commonly carry (desktop + common mobile panels).
const KNOWN_SCREEN_RESOLUTIONS: &[(u32, u32)] = &[
    (1920, 1080),
    (2560, 1440),
    (3840, 2160),
    (1366, 768),
    (1440, 900),
    (1280, 800),
    (1080, 1920),
    (1170, 2532),
    (1284, 2778),
    (828, 1792),
    (1125, 2436),
];

const UI_OBJECT_CLASSES: &[&str] = &["laptop", "tv", "cell phone", "keyboard", "mouse", "monitor"];
const PHOTO_SUBJECT_CLASSES: &[&str] = &["person", "dog", "cat", "car", "tree", "food", "mountain"];

const THRESHOLD: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct ScreenshotVerdict {
    pub is_screenshot: bool,
    pub score: f64,
    pub reasons: Vec<String>,
}

pub struct ScreenshotInput<'a> {
    pub filename: &'a str,
    pub exif: &'a ExifData,
    pub objects: &'a [DetectedObject],
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub mime: Option<&'a str>,
}

pub fn detect(input: &ScreenshotInput) -> ScreenshotVerdict {
    let mut score = 0.0;
    let mut reasons = Vec::new();
    let mut signals = 0;

    if filename_matches(input.filename) {
        score += 40.0;
        signals += 1;
        reasons.push("filename matches a screenshot naming pattern".to_string());
    }

    if input.exif.camera_make.is_none() && input.exif.camera_model.is_none() {
        score += 15.0;
        signals += 1;
        reasons.push("no camera make/model in metadata".to_string());
    }

    if input
        .exif
        .software
        .as_deref()
        .map(|s| s.to_lowercase().contains("screenshot"))
        .unwrap_or(false)
    {
        score += 25.0;
        signals += 1;
        reasons.push("software field names a screenshot tool".to_string());
    }

    if input.exif.focal_length.is_none() && input.exif.aperture.is_none() && input.exif.iso.is_none() {
        score += 10.0;
        signals += 1;
        reasons.push("missing focal length, aperture and ISO".to_string());
    }

    if input.mime == Some("image/png") {
        score += 15.0;
        signals += 1;
        reasons.push("PNG mime type".to_string());
    }

    if let (Some(w), Some(h)) = (input.width, input.height) {
        if KNOWN_SCREEN_RESOLUTIONS.contains(&(w, h)) || KNOWN_SCREEN_RESOLUTIONS.contains(&(h, w)) {
            score += 20.0;
            signals += 1;
            reasons.push("resolution matches a known screen size".to_string());
        }

        let ratio = w.max(h) as f64 / w.min(h).max(1) as f64;
        if ratio < 1.1 {
            score += 5.0;
            signals += 1;
            reasons.push("near-square aspect ratio".to_string());
        }
    }

    if input.objects.iter().any(|o| UI_OBJECT_CLASSES.contains(&o.class.as_str())) {
        score += 15.0;
        signals += 1;
        reasons.push("detected UI/device objects".to_string());
    }

    if !input.objects.is_empty() && !input.objects.iter().any(|o| PHOTO_SUBJECT_CLASSES.contains(&o.class.as_str())) {
        score += 10.0;
        signals += 1;
        reasons.push("absence of typical photo-subject objects".to_string());
    }

    if signals >= 3 {
        score += 5.0;
        reasons.push("bonus: at least three independent signals".to_string());
    }

    ScreenshotVerdict { is_screenshot: score >= THRESHOLD, score, reasons }
}

fn filename_matches(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    lower.starts_with("screenshot")
        || lower.starts_with("screen shot")
        || lower.starts_with("screen_shot")
        || lower.contains("scrnshot")
        || lower.contains("img_scr")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(filename: &'a str, exif: &'a ExifData, objects: &'a [DetectedObject]) -> ScreenshotInput<'a> {
        ScreenshotInput { filename, exif, objects, width: Some(1170), height: Some(2532), mime: Some("image/png") }
    }

    #[test]
    fn filename_and_png_and_missing_camera_crosses_threshold() {
        let exif = ExifData::default();
        let verdict = detect(&input("Screenshot_2024-01-01.png", &exif, &[]));
        assert!(verdict.is_screenshot);
        assert!(verdict.score >= THRESHOLD);
    }

    #[test]
    fn ordinary_camera_photo_is_not_flagged() {
        let mut exif = ExifData::default();
        exif.camera_make = Some("Canon".to_string());
        exif.camera_model = Some("EOS R5".to_string());
        exif.focal_length = Some(50.0);
        exif.aperture = Some(1.8);
        exif.iso = Some(100);

        let objects = vec![crate::db::objects::DetectedObject {
            class: "person".to_string(),
            confidence: 0.9,
            bbox: crate::db::objects::BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
        }];

        let verdict = detect(&ScreenshotInput {
            filename: "IMG_4021.jpg",
            exif: &exif,
            objects: &objects,
            width: Some(4000),
            height: Some(3000),
            mime: Some("image/jpeg"),
        });
        assert!(!verdict.is_screenshot);
    }
}
